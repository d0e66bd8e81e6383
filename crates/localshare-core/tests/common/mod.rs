//! Common test utilities for `LocalShare` integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;

use localshare_core::client::{ClientEvent, ClientHandle};
use localshare_core::config::{Config, RelayConfig};
use localshare_core::relay::RelayServer;

/// Generous upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(10);

/// A relay running on an ephemeral loopback port.
pub struct TestRelay {
    /// Websocket URL clients connect to
    pub url: String,
    /// Bound address
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestRelay {
    /// Bind and start a relay.
    pub async fn start() -> Self {
        Self::start_with(RelayConfig::default()).await
    }

    /// Bind and start a relay with custom settings.
    pub async fn start_with(mut config: RelayConfig) -> Self {
        config.bind = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let listener = TcpListener::bind(SocketAddr::new(config.bind, 0))
            .await
            .expect("Failed to bind relay");
        Self::serve(listener, config)
    }

    /// Start a relay on a specific address, such as one returned by
    /// [`free_addr`].
    pub async fn start_at(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr)
            .await
            .expect("Failed to bind relay");
        Self::serve(listener, RelayConfig::default())
    }

    fn serve(listener: TcpListener, config: RelayConfig) -> Self {
        let addr = listener.local_addr().expect("relay address");
        let url = format!("ws://{}{}", addr, config.ws_path);

        let (tx, rx) = oneshot::channel::<()>();
        let server = RelayServer::new(config);
        tokio::spawn(async move {
            let _ = server
                .serve(listener, async {
                    let _ = rx.await;
                })
                .await;
        });

        Self {
            url,
            addr,
            shutdown: Some(tx),
        }
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// A loopback address with nothing listening on it yet.
pub async fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("Failed to bind");
    listener.local_addr().expect("local address")
}

/// Websocket URL a relay started at `addr` will serve.
pub fn relay_url(addr: SocketAddr) -> String {
    format!("ws://{}{}", addr, RelayConfig::default().ws_path)
}

/// Client configuration pointing at `relay_url` with short timeouts.
pub fn client_config(relay_url: &str) -> Config {
    let mut config = Config::default();
    config.client.relay_url = relay_url.to_string();
    config.client.reconnect_backoff = Duration::from_millis(200);
    config.client.advertise_addr = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
    config.transfer.chunk_size = 4096;
    config
}

/// Create a temporary directory for test files.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Wait for the first event matching `pick`, skipping the rest.
pub async fn wait_for<T>(
    client: &mut ClientHandle,
    mut pick: impl FnMut(ClientEvent) -> Option<T>,
) -> T {
    within(async {
        loop {
            let event = client.next_event().await.expect("client stopped");
            if let Some(found) = pick(event) {
                return found;
            }
        }
    })
    .await
}

/// Fail the test if `future` takes longer than [`WAIT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out waiting")
}
