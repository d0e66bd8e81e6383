//! Task that owns one transport and runs session actions against it.
//!
//! Actions execute strictly one after another, in the order the state
//! machine produced them. Results and transport events flow back to the
//! client event loop tagged with the peer and session epoch, so events from
//! a superseded session can be told apart.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::SessionAction;
use crate::error::Result;
use crate::protocol::{ChannelMessage, ClientId, Signal};
use crate::transport::{PeerChannel, Transport, TransportEvent};

/// Reported by a driver to the event loop.
#[derive(Debug)]
pub enum DriverEvent {
    /// Signal to relay to the peer
    Signal(Signal),
    /// The remote description was applied
    RemoteApplied,
    /// An action failed
    Failed(String),
    /// Channel usable
    ChannelOpen(PeerChannel),
    /// Message received on the channel
    Message(ChannelMessage),
    /// The transport closed on its own
    Closed(Option<String>),
}

/// A driver event with its origin.
#[derive(Debug)]
pub struct TaggedDriverEvent {
    /// Remote peer
    pub peer: ClientId,
    /// Session epoch the event belongs to
    pub epoch: u64,
    /// The event
    pub event: DriverEvent,
}

/// Handle to a running driver.
#[derive(Debug)]
pub struct SessionDriver {
    actions: mpsc::UnboundedSender<SessionAction>,
    task: JoinHandle<()>,
}

impl SessionDriver {
    /// Queue actions for execution.
    pub fn execute(&self, actions: impl IntoIterator<Item = SessionAction>) {
        for action in actions {
            if self.actions.send(action).is_err() {
                break;
            }
        }
    }

    /// Close the transport and stop the driver.
    pub fn close(&self) {
        let _ = self.actions.send(SessionAction::CloseTransport);
    }

    /// Whether the driver task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a driver owning `transport`.
///
/// `transport_events` must be the receiving end of the channel the transport
/// was created with.
pub fn spawn_driver<T: Transport>(
    peer: ClientId,
    epoch: u64,
    transport: T,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    out: mpsc::UnboundedSender<TaggedDriverEvent>,
) -> SessionDriver {
    let (actions_tx, actions_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(
        Reporter { peer, epoch, out },
        transport,
        transport_events,
        actions_rx,
    ));
    SessionDriver {
        actions: actions_tx,
        task,
    }
}

struct Reporter {
    peer: ClientId,
    epoch: u64,
    out: mpsc::UnboundedSender<TaggedDriverEvent>,
}

impl Reporter {
    fn report(&self, event: DriverEvent) {
        let _ = self.out.send(TaggedDriverEvent {
            peer: self.peer.clone(),
            epoch: self.epoch,
            event,
        });
    }
}

async fn run<T: Transport>(
    reporter: Reporter,
    mut transport: T,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    mut actions: mpsc::UnboundedReceiver<SessionAction>,
) {
    let mut events_open = true;

    loop {
        tokio::select! {
            action = actions.recv() => match action {
                None | Some(SessionAction::CloseTransport) => break,
                Some(action) => {
                    if let Err(e) = execute(&reporter, &mut transport, action).await {
                        reporter.report(DriverEvent::Failed(e.to_string()));
                    }
                }
            },
            event = transport_events.recv(), if events_open => match event {
                Some(TransportEvent::LocalCandidate(candidate)) => {
                    reporter.report(DriverEvent::Signal(Signal::Candidate(candidate)));
                }
                Some(TransportEvent::ChannelOpen(channel)) => {
                    reporter.report(DriverEvent::ChannelOpen(channel));
                }
                Some(TransportEvent::Message(message)) => {
                    reporter.report(DriverEvent::Message(message));
                }
                Some(TransportEvent::Closed(reason)) => {
                    reporter.report(DriverEvent::Closed(reason));
                }
                None => events_open = false,
            },
        }
    }

    transport.close().await;
    tracing::debug!("Session driver for {} stopped", reporter.peer);
}

async fn execute<T: Transport>(
    reporter: &Reporter,
    transport: &mut T,
    action: SessionAction,
) -> Result<()> {
    match action {
        SessionAction::SendOffer => {
            let offer = transport.create_offer().await?;
            transport.set_local_description(offer.clone()).await?;
            reporter.report(DriverEvent::Signal(Signal::Description(offer)));
        }
        SessionAction::SendAnswer => {
            let answer = transport.create_answer().await?;
            transport.set_local_description(answer.clone()).await?;
            reporter.report(DriverEvent::Signal(Signal::Description(answer)));
        }
        SessionAction::ApplyRemote(description) => {
            transport.set_remote_description(description).await?;
            reporter.report(DriverEvent::RemoteApplied);
        }
        SessionAction::ApplyCandidate(candidate) => {
            transport.add_ice_candidate(candidate).await?;
        }
        SessionAction::CloseTransport => transport.close().await,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::{Candidate, SessionDescription};
    use std::sync::{Arc, Mutex};

    /// Records calls and fails candidates containing "bad".
    struct RecordingTransport {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Transport for RecordingTransport {
        async fn create_offer(&mut self) -> Result<SessionDescription> {
            self.calls.lock().unwrap().push("create_offer".into());
            Ok(SessionDescription::offer("o"))
        }

        async fn create_answer(&mut self) -> Result<SessionDescription> {
            self.calls.lock().unwrap().push("create_answer".into());
            Ok(SessionDescription::answer("a"))
        }

        async fn set_local_description(&mut self, d: SessionDescription) -> Result<()> {
            self.calls.lock().unwrap().push(format!("set_local {}", d.sdp));
            Ok(())
        }

        async fn set_remote_description(&mut self, d: SessionDescription) -> Result<()> {
            self.calls.lock().unwrap().push(format!("set_remote {}", d.sdp));
            Ok(())
        }

        async fn add_ice_candidate(&mut self, c: Candidate) -> Result<()> {
            self.calls.lock().unwrap().push(format!("candidate {}", c.candidate));
            if c.candidate.contains("bad") {
                return Err(Error::InvalidSignal("bad candidate".into()));
            }
            Ok(())
        }

        async fn close(&mut self) {
            self.calls.lock().unwrap().push("close".into());
        }
    }

    #[tokio::test]
    async fn test_actions_run_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let transport = RecordingTransport {
            calls: Arc::clone(&calls),
        };
        let (_events_tx, events_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();

        let driver = spawn_driver(ClientId::from("p"), 7, transport, events_rx, out_tx);
        driver.execute([
            SessionAction::ApplyRemote(SessionDescription::offer("remote")),
            SessionAction::ApplyCandidate(Candidate::new("c1")),
            SessionAction::ApplyCandidate(Candidate::new("bad")),
            SessionAction::SendAnswer,
        ]);

        let first = out_rx.recv().await.unwrap();
        assert_eq!(first.epoch, 7);
        assert!(matches!(first.event, DriverEvent::RemoteApplied));
        assert!(matches!(
            out_rx.recv().await.unwrap().event,
            DriverEvent::Failed(_)
        ));
        match out_rx.recv().await.unwrap().event {
            DriverEvent::Signal(Signal::Description(d)) => assert_eq!(d.sdp, "a"),
            other => panic!("expected answer signal, got {other:?}"),
        }

        driver.close();
        assert!(out_rx.recv().await.is_none());

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "set_remote remote",
                "candidate c1",
                "candidate bad",
                "create_answer",
                "set_local a",
                "close",
            ]
        );
    }
}
