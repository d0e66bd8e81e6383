//! Websocket connection from a client to the relay, with reconnect.

use std::net::IpAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream};
use tokio_util::sync::CancellationToken;

use crate::protocol::{RelayClientMessage, RelayServerMessage};

/// Reported by the relay link.
#[derive(Debug)]
pub enum RelayEvent {
    /// A connection is up; nothing has been sent on it yet
    Connected {
        /// Local address of the connection, usable as a LAN address hint
        local_ip: Option<IpAddr>,
    },
    /// Message from the relay
    Message(RelayServerMessage),
    /// The connection dropped; a reconnect follows after the backoff
    Disconnected,
}

/// Spawn the relay link.
///
/// Messages queued on `outgoing` while disconnected are discarded when the
/// next connection comes up, before [`RelayEvent::Connected`] is reported.
pub fn spawn_relay_link(
    url: String,
    backoff: Duration,
    mut outgoing: mpsc::UnboundedReceiver<RelayClientMessage>,
    events: mpsc::UnboundedSender<RelayEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let connected = tokio::select! {
                () = cancel.cancelled() => return,
                connected = connect_async(url.as_str()) => connected,
            };

            match connected {
                Ok((ws, _)) => {
                    let local_ip = match ws.get_ref() {
                        MaybeTlsStream::Plain(stream) => stream.local_addr().ok().map(|a| a.ip()),
                        _ => None,
                    };
                    tracing::info!("Connected to relay at {}", url);

                    while outgoing.try_recv().is_ok() {}
                    if events.send(RelayEvent::Connected { local_ip }).is_err() {
                        return;
                    }

                    let (mut sink, mut stream) = ws.split();
                    loop {
                        tokio::select! {
                            () = cancel.cancelled() => {
                                let _ = sink.close().await;
                                return;
                            }
                            message = outgoing.recv() => {
                                let Some(message) = message else {
                                    let _ = sink.close().await;
                                    return;
                                };
                                let text = match serde_json::to_string(&message) {
                                    Ok(text) => text,
                                    Err(e) => {
                                        tracing::warn!("Failed to encode relay message: {}", e);
                                        continue;
                                    }
                                };
                                if let Err(e) = sink.send(Message::Text(text.into())).await {
                                    tracing::warn!("Relay send failed: {}", e);
                                    break;
                                }
                            }
                            incoming = stream.next() => match incoming {
                                Some(Ok(Message::Text(text))) => {
                                    match serde_json::from_str::<RelayServerMessage>(text.as_str()) {
                                        Ok(message) => {
                                            if events.send(RelayEvent::Message(message)).is_err() {
                                                return;
                                            }
                                        }
                                        Err(e) => tracing::debug!("Ignoring relay message: {}", e),
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    tracing::warn!("Relay connection error: {}", e);
                                    break;
                                }
                            },
                        }
                    }

                    tracing::warn!("Lost connection to relay");
                    if events.send(RelayEvent::Disconnected).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!("Relay unreachable at {}: {}", url, e);
                }
            }

            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(backoff) => {}
            }
        }
    })
}
