//! List command implementation.

use std::time::Duration;

use anyhow::{bail, Result};

use localshare_core::client::{ClientEvent, ClientHandle};
use localshare_core::protocol::{AdvertisedFile, ClientId};

use super::ListArgs;
use crate::ui::{parse_timeout, print_files};

/// Connect, print the group's shared files and exit.
pub async fn run(args: ListArgs, relay: Option<String>) -> Result<()> {
    let mut client = super::start_client(relay);
    let timeout = parse_timeout(&args.timeout, Duration::from_secs(5));

    let snapshot = first_snapshot(&mut client, timeout).await;
    client.shutdown().await;
    let Some((own_id, device_count, files)) = snapshot else {
        bail!("No answer from the relay within {}", args.timeout);
    };

    if args.json {
        let output = serde_json::json!({
            "client_id": own_id.as_str(),
            "device_count": device_count,
            "files": files,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!();
        println!("  {} device(s) on this network", device_count);
        println!();
        print_files(&files, Some(own_id.as_str()));
        println!();
    }
    Ok(())
}

/// Wait for registration and the group snapshot that follows it.
pub async fn first_snapshot(
    client: &mut ClientHandle,
    timeout: Duration,
) -> Option<(ClientId, usize, Vec<AdvertisedFile>)> {
    let wait = async {
        let mut own_id = None;
        while let Some(event) = client.next_event().await {
            match event {
                ClientEvent::Registered(id) => own_id = Some(id),
                ClientEvent::Snapshot {
                    device_count,
                    files,
                } => {
                    if let Some(id) = own_id.take() {
                        return Some((id, device_count, files));
                    }
                }
                _ => {}
            }
        }
        None
    };
    tokio::time::timeout(timeout, wait).await.ok().flatten()
}
