//! Peer sessions.
//!
//! - [`machine`]: the per-peer state machine
//! - [`driver`]: the task that owns a transport and executes session actions
//! - [`SessionTable`]: at most one session per remote peer, with the glare
//!   and staleness policies

pub mod driver;
pub mod machine;

pub use driver::{spawn_driver, DriverEvent, SessionDriver, TaggedDriverEvent};
pub use machine::{PeerSession, SessionAction, SessionEvent, SessionState};

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::protocol::ClientId;

/// What to do with an offer arriving from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDecision {
    /// No usable session exists; start a new one
    Accept,
    /// A stale or closed session exists; replace it
    Supersede,
    /// A live session exists; ignore the offer
    Reject,
}

/// Why a session is being closed by the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    /// Did not connect within the setup timeout
    SetupTimeout,
    /// Connected but unused for the idle timeout
    Idle,
}

/// Sessions keyed by remote peer.
#[derive(Debug)]
pub struct SessionTable {
    sessions: HashMap<ClientId, PeerSession>,
    setup_timeout: Duration,
    idle_timeout: Duration,
    next_epoch: u64,
}

impl SessionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new(setup_timeout: Duration, idle_timeout: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            setup_timeout,
            idle_timeout,
            next_epoch: 1,
        }
    }

    /// Session with `peer`, if any.
    #[must_use]
    pub fn get(&self, peer: &ClientId) -> Option<&PeerSession> {
        self.sessions.get(peer)
    }

    /// Mutable session with `peer`, if any.
    pub fn get_mut(&mut self, peer: &ClientId) -> Option<&mut PeerSession> {
        self.sessions.get_mut(peer)
    }

    /// Whether `peer` has a live (not closed) session.
    #[must_use]
    pub fn is_active(&self, peer: &ClientId) -> bool {
        self.sessions.get(peer).is_some_and(PeerSession::is_active)
    }

    /// Glare and staleness policy for an incoming offer.
    #[must_use]
    pub fn classify_offer(&self, peer: &ClientId, now: Instant) -> OfferDecision {
        match self.sessions.get(peer) {
            None => OfferDecision::Accept,
            Some(s) if !s.is_active() || s.is_stale(now, self.setup_timeout) => {
                OfferDecision::Supersede
            }
            Some(_) => OfferDecision::Reject,
        }
    }

    /// Insert a fresh `Idle` session, replacing any previous one.
    ///
    /// Returns the replaced session so its driver can be shut down.
    pub fn open(&mut self, peer: ClientId, now: Instant) -> (&mut PeerSession, Option<PeerSession>) {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        let previous = self.sessions.remove(&peer);
        let session = self
            .sessions
            .entry(peer.clone())
            .or_insert_with(|| PeerSession::new(peer, epoch, now));
        (session, previous)
    }

    /// Feed an event to the session with `peer`.
    ///
    /// Events for unknown peers are dropped.
    pub fn handle(&mut self, peer: &ClientId, event: SessionEvent) -> Vec<SessionAction> {
        match self.sessions.get_mut(peer) {
            Some(session) => session.handle(event),
            None => {
                tracing::debug!("No session with {}, dropping {:?}", peer, event);
                Vec::new()
            }
        }
    }

    /// Forget the session with `peer`.
    pub fn remove(&mut self, peer: &ClientId) -> Option<PeerSession> {
        self.sessions.remove(peer)
    }

    /// Sessions the periodic sweep should close.
    ///
    /// Connected sessions for which `busy` returns true are never idle.
    pub fn expired(
        &self,
        now: Instant,
        busy: impl Fn(&ClientId) -> bool,
    ) -> Vec<(ClientId, ExpiryReason)> {
        self.sessions
            .values()
            .filter_map(|s| {
                if s.is_stale(now, self.setup_timeout) {
                    Some((s.peer().clone(), ExpiryReason::SetupTimeout))
                } else if s.is_idle(now, self.idle_timeout) && !busy(s.peer()) {
                    Some((s.peer().clone(), ExpiryReason::Idle))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Peers with a session of any state.
    pub fn peers(&self) -> impl Iterator<Item = &ClientId> {
        self.sessions.keys()
    }

    /// Number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
