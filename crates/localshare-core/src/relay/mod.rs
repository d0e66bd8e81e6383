//! Websocket relay server.
//!
//! The relay is the only piece of shared infrastructure. It answers two
//! questions for its clients: who else is on my network and what do they
//! share, and how do I get a message to one of them. File bytes never pass
//! through it.
//!
//! ## Endpoints
//!
//! | Method | Endpoint | Description |
//! |--------|----------|-------------|
//! | WS | /ws | Relay protocol (path configurable) |
//! | GET | /* | Static UI bundle (if a static directory is configured) |

mod connection;

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::services::ServeDir;

use crate::config::RelayConfig;
use crate::error::Result;
use crate::registry::Registry;

/// Registry shared by every connection task.
pub type SharedRegistry = Arc<Mutex<Registry>>;

#[derive(Clone)]
struct RelayState {
    registry: SharedRegistry,
    outbound_capacity: usize,
    trust_forwarded_for: bool,
}

/// The relay server instance.
#[derive(Debug)]
pub struct RelayServer {
    config: RelayConfig,
    registry: SharedRegistry,
}

impl RelayServer {
    /// Create a new relay server with the given configuration.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        let registry = Arc::new(Mutex::new(Registry::new()));
        Self { config, registry }
    }

    /// Get the server configuration.
    #[must_use]
    pub const fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Handle to the presence registry.
    #[must_use]
    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    /// Address the server binds to.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.bind, self.config.port)
    }

    /// Build the HTTP router.
    pub fn router(&self) -> Router {
        let state = RelayState {
            registry: self.registry(),
            outbound_capacity: self.config.outbound_capacity,
            trust_forwarded_for: self.config.trust_forwarded_for,
        };

        let router = Router::new()
            .route(&self.config.ws_path, get(ws_handler))
            .with_state(state);

        match &self.config.static_dir {
            Some(dir) => router.fallback_service(ServeDir::new(dir)),
            None => router,
        }
    }

    /// Bind and serve until the process is stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound or the server fails.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.bind_addr()).await?;
        self.serve(listener, std::future::pending()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            "Relay listening on ws://{}{}",
            addr,
            self.config.ws_path
        );

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("Relay stopped");
        Ok(())
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<RelayState>,
) -> Response {
    let addr = client_addr(&headers, peer.ip(), state.trust_forwarded_for);
    tracing::debug!("Websocket upgrade from {} (seen as {})", peer, addr);
    ws.on_upgrade(move |socket| {
        connection::handle_socket(socket, addr, state.registry, state.outbound_capacity)
    })
}

/// Address used for grouping: the first `X-Forwarded-For` entry when
/// trusted and parseable, the socket peer otherwise.
fn client_addr(headers: &HeaderMap, peer: IpAddr, trust_forwarded_for: bool) -> IpAddr {
    if !trust_forwarded_for {
        return peer;
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .unwrap_or(peer)
}
