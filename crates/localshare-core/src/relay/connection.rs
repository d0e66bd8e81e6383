//! One websocket connection to the relay.

use std::net::IpAddr;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::SharedRegistry;
use crate::protocol::{ClientId, RelayClientMessage};
use crate::registry::Outbox;

/// Serve one client until it disconnects or is evicted.
///
/// Outbound messages are produced by the registry into a bounded queue owned
/// by this task. The queue sender moves into the registry on `register`, so
/// once the record is dropped the queue closes and the connection ends.
pub(super) async fn handle_socket(
    socket: WebSocket,
    addr: IpAddr,
    registry: SharedRegistry,
    outbound_capacity: usize,
) {
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut outbound) = mpsc::channel(outbound_capacity);
    let mut outbox = Some(outbox);
    let mut client_id: Option<ClientId> = None;

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_text(&registry, text.as_str(), addr, &mut client_id, &mut outbox).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("Websocket error from {}: {}", addr, e);
                    break;
                }
            },
            outgoing = outbound.recv() => {
                let Some(message) = outgoing else {
                    tracing::debug!("Outbound queue closed for {}", addr);
                    break;
                };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!("Failed to encode relay message: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(id) = client_id {
        registry.lock().await.disconnect(&id);
    }
    let _ = sink.close().await;
}

async fn handle_text(
    registry: &SharedRegistry,
    text: &str,
    addr: IpAddr,
    client_id: &mut Option<ClientId>,
    outbox: &mut Option<Outbox>,
) {
    let message: RelayClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!("Ignoring malformed message from {}: {}", addr, e);
            return;
        }
    };

    let mut registry = registry.lock().await;
    match (message, client_id.as_ref()) {
        (RelayClientMessage::Register, None) => {
            if let Some(outbox) = outbox.take() {
                *client_id = Some(registry.register(addr, outbox));
            }
        }
        (RelayClientMessage::Register, Some(id)) => {
            tracing::debug!("Client {} registered twice", id);
        }
        (_, None) => {
            tracing::debug!("Ignoring message from {} before register", addr);
        }
        (RelayClientMessage::Share { files }, Some(id)) => {
            registry.update_shared_files(id, files);
        }
        (RelayClientMessage::StopSharing, Some(id)) => registry.stop_sharing(id),
        (RelayClientMessage::Signal { target_id, signal }, Some(id)) => {
            registry.relay_signal(id, &target_id, signal);
        }
    }
}
