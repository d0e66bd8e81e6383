//! Get command implementation.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};

use localshare_core::client::ClientEvent;
use localshare_core::file::format_size;
use localshare_core::protocol::{AdvertisedFile, ClientId};

use super::list::first_snapshot;
use super::GetArgs;
use crate::ui::{parse_timeout, print_progress};

/// Download the named files one at a time and save them.
pub async fn run(args: GetArgs, relay: Option<String>) -> Result<()> {
    let config = super::load_config();
    let output_dir = args
        .output
        .clone()
        .or_else(|| config.client.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let timeout = parse_timeout(&args.timeout, Duration::from_secs(5));

    let mut client = super::start_client(relay);
    let Some((own_id, _, shared)) = first_snapshot(&mut client, timeout).await else {
        client.shutdown().await;
        bail!("No answer from the relay within {}", args.timeout);
    };

    let from = args.from.as_deref().map(ClientId::from);
    let mut wanted = Vec::new();
    for name in &args.files {
        match resolve(&shared, name, from.as_ref(), &own_id) {
            Ok(owner) => wanted.push((owner, name.clone())),
            Err(e) => {
                client.shutdown().await;
                return Err(e);
            }
        }
    }

    let mut outstanding = HashSet::new();
    for (owner, name) in wanted {
        let (request, position) = client.enqueue(owner, name).await?;
        if !args.quiet {
            println!("  Queued {} (position {})", request.file_name, position);
        }
        outstanding.insert(request.transfer_id);
    }

    let mut failures = 0usize;
    while !outstanding.is_empty() {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = client.next_event() => event,
        };
        let Some(event) = event else {
            break;
        };

        match event {
            ClientEvent::Progress(progress) if !args.quiet => print_progress(&progress),
            ClientEvent::FileReceived(file) if outstanding.remove(&file.transfer_id) => {
                let path = file.save_to(&output_dir).await?;
                if !args.quiet {
                    println!();
                    println!(
                        "  ✓ Saved {} ({})",
                        path.display(),
                        format_size(file.data.len() as u64)
                    );
                }
            }
            ClientEvent::TransferAborted {
                transfer_id,
                file_name,
                reason,
                ..
            } if outstanding.remove(&transfer_id) => {
                failures += 1;
                println!();
                println!("  ✗ {} failed: {}", file_name, reason);
            }
            ClientEvent::Disconnected if !args.quiet => {
                println!("  Relay connection lost, reconnecting...");
            }
            _ => {}
        }
    }

    let interrupted = outstanding.len();
    client.shutdown().await;

    if failures + interrupted > 0 {
        bail!("{} download(s) did not complete", failures + interrupted);
    }
    Ok(())
}

/// Pick the owner of `name`, preferring `from` when given.
fn resolve(
    shared: &[AdvertisedFile],
    name: &str,
    from: Option<&ClientId>,
    own_id: &ClientId,
) -> Result<ClientId> {
    let owners: Vec<&ClientId> = shared
        .iter()
        .filter(|f| f.name == name && f.owner_id != *own_id)
        .filter(|f| from.is_none_or(|from| f.owner_id == *from))
        .map(|f| &f.owner_id)
        .collect();

    match owners.as_slice() {
        [] => bail!("Nobody on this network shares '{name}'"),
        [owner] => Ok((*owner).clone()),
        many => {
            let ids: Vec<&str> = many.iter().map(|o| o.as_str()).collect();
            bail!(
                "'{name}' is shared by several devices ({}); pick one with --from",
                ids.join(", ")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, owner: &str) -> AdvertisedFile {
        AdvertisedFile {
            name: name.to_string(),
            size: 1,
            owner_id: ClientId::from(owner),
        }
    }

    #[test]
    fn test_resolve_owner() {
        let me = ClientId::from("me");
        let shared = vec![
            file("a.txt", "alice"),
            file("b.txt", "alice"),
            file("b.txt", "bob"),
            file("c.txt", "me"),
        ];

        assert_eq!(resolve(&shared, "a.txt", None, &me).unwrap().as_str(), "alice");
        assert!(resolve(&shared, "b.txt", None, &me).is_err());
        assert_eq!(
            resolve(&shared, "b.txt", Some(&ClientId::from("bob")), &me)
                .unwrap()
                .as_str(),
            "bob"
        );
        assert!(resolve(&shared, "c.txt", None, &me).is_err());
        assert!(resolve(&shared, "missing", None, &me).is_err());
    }
}
