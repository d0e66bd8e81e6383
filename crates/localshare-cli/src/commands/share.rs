//! Share command implementation.

use anyhow::Result;

use localshare_core::client::ClientEvent;
use localshare_core::file::format_size;

use super::ShareArgs;
use crate::ui::print_progress;

/// Share files until Ctrl-C, serving every download request.
pub async fn run(args: ShareArgs, relay: Option<String>) -> Result<()> {
    let mut client = super::start_client(relay);

    let files = match client.share(args.paths.clone()).await {
        Ok(files) => files,
        Err(e) => {
            client.shutdown().await;
            return Err(e.into());
        }
    };
    let total_size: u64 = files.iter().map(|f| f.size).sum();

    if !args.quiet {
        println!();
        println!("LocalShare v{}", localshare_core::VERSION);
        println!("{}", "-".repeat(37));
        println!();
        println!("  Sharing {} files ({})", files.len(), format_size(total_size));
        println!();
        for file in &files {
            println!("    {} ({})", file.name, format_size(file.size));
        }
        println!();
        println!("  Press Ctrl-C to stop sharing.");
        println!();
    }

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = client.next_event() => event,
        };
        let Some(event) = event else {
            break;
        };
        if args.quiet {
            continue;
        }

        match event {
            ClientEvent::Registered(id) => println!("  Connected to relay as {}", id),
            ClientEvent::Disconnected => println!("  Relay connection lost, reconnecting..."),
            ClientEvent::Snapshot { device_count, .. } => {
                println!("  {} device(s) on this network", device_count);
            }
            ClientEvent::Progress(progress) => print_progress(&progress),
            ClientEvent::FileSent {
                peer,
                file_name,
                bytes,
                ..
            } => {
                println!();
                println!("  ✓ Sent {} ({}) to {}", file_name, format_size(bytes), peer);
            }
            ClientEvent::TransferAborted {
                peer,
                file_name,
                reason,
                ..
            } => {
                println!();
                println!("  ✗ {} with {} aborted: {}", file_name, peer, reason);
            }
            ClientEvent::QueueStatus { .. } | ClientEvent::FileReceived(_) => {}
        }
    }

    if !args.quiet {
        println!();
        println!("  Stopped sharing.");
    }
    let _ = client.stop_sharing();
    client.shutdown().await;
    Ok(())
}
