//! Transport capability used by peer sessions.
//!
//! A transport turns an offer/answer/candidate exchange into a reliable,
//! ordered, message-based channel to one remote peer. Sessions drive it
//! through [`Transport`] and learn about its progress from the
//! [`TransportEvent`] stream handed to [`TransportFactory::create`].
//!
//! The bundled implementation is [`tcp::TcpTransport`].

pub mod tcp;

pub use tcp::{TcpTransport, TcpTransportFactory};

use std::future::Future;
use std::net::IpAddr;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::{Candidate, ChannelMessage, SessionDescription};

/// Something a transport reports to its session.
#[derive(Debug)]
pub enum TransportEvent {
    /// A local candidate to relay to the remote peer
    LocalCandidate(Candidate),
    /// The channel is usable
    ChannelOpen(PeerChannel),
    /// A message arrived on the channel
    Message(ChannelMessage),
    /// The channel or the setup failed; no further events follow
    Closed(Option<String>),
}

/// Cloneable sending handle of an open peer channel.
#[derive(Debug, Clone)]
pub struct PeerChannel {
    tx: mpsc::Sender<ChannelMessage>,
}

impl PeerChannel {
    /// Wrap the outgoing queue of a channel.
    #[must_use]
    pub fn new(tx: mpsc::Sender<ChannelMessage>) -> Self {
        Self { tx }
    }

    /// A channel whose outgoing messages land in the returned receiver.
    #[must_use]
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<ChannelMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Queue a message, waiting for room if the channel is busy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the channel is gone.
    pub async fn send(&self, message: impl Into<ChannelMessage>) -> Result<()> {
        self.tx
            .send(message.into())
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// Whether the channel can still carry messages.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Offer/answer/candidate driven connection to one peer.
///
/// Methods are called one at a time by the session driver.
pub trait Transport: Send + 'static {
    /// Produce a local offer.
    fn create_offer(&mut self) -> impl Future<Output = Result<SessionDescription>> + Send;

    /// Produce a local answer to the applied remote offer.
    fn create_answer(&mut self) -> impl Future<Output = Result<SessionDescription>> + Send;

    /// Commit the local description; candidate gathering may start.
    fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Apply the remote peer's description.
    fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Apply a remote candidate.
    fn add_ice_candidate(&mut self, candidate: Candidate)
        -> impl Future<Output = Result<()>> + Send;

    /// Tear everything down. No events follow.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Creates one transport per peer session.
pub trait TransportFactory: Send + Sync + 'static {
    /// Transport type produced.
    type Transport: Transport;

    /// Create a transport reporting into `events`.
    ///
    /// `local_ip` is the best known address of this host on the LAN, used
    /// for candidates when nothing better is configured.
    fn create(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
        local_ip: Option<IpAddr>,
    ) -> Self::Transport;
}
