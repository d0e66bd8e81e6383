//! Relay command implementation.

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use localshare_core::relay::RelayServer;

use super::RelayArgs;

/// Run the relay until Ctrl-C.
pub async fn run(args: RelayArgs) -> Result<()> {
    let mut config = super::load_config().relay;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if args.static_dir.is_some() {
        config.static_dir = args.static_dir;
    }

    let server = RelayServer::new(config);
    let addr = server.bind_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind relay to {addr}"))?;

    println!();
    println!("LocalShare relay v{}", localshare_core::VERSION);
    println!("{}", "-".repeat(37));
    println!();
    println!("  Listening on {}", addr);
    println!("  Press Ctrl-C to stop.");
    println!();

    server
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
