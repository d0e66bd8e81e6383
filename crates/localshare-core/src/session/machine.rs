//! Offer/answer/candidate state machine for one remote peer.
//!
//! [`PeerSession::handle`] is a pure step function: it takes an event, updates
//! the state and returns the actions the driver must perform. Nothing here
//! touches a transport.

use std::time::{Duration, Instant};

use crate::protocol::{Candidate, ClientId, SdpKind, SessionDescription};

/// Lifecycle of a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing negotiated yet
    Idle,
    /// Local offer relayed, waiting for the answer and the channel
    OfferSent,
    /// Remote offer being applied
    OfferReceived,
    /// Local answer relayed, waiting for the channel
    AnswerSent,
    /// Channel usable
    Connected,
    /// Torn down; no further transitions
    Closed,
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Local side wants a channel (download initiation)
    Initiate,
    /// Offer relayed from the peer
    RemoteOffer(SessionDescription),
    /// Answer relayed from the peer
    RemoteAnswer(SessionDescription),
    /// The transport accepted the remote description
    RemoteApplied,
    /// Candidate relayed from the peer
    RemoteCandidate(Candidate),
    /// The transport reports the channel usable
    ChannelOpen,
    /// Any transport or negotiation failure
    Failed(String),
    /// Explicit local close
    Close,
}

/// Work the driver performs on behalf of the state machine, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Create an offer, set it locally and relay it
    SendOffer,
    /// Apply the remote description
    ApplyRemote(SessionDescription),
    /// Apply a remote candidate
    ApplyCandidate(Candidate),
    /// Create an answer, set it locally and relay it
    SendAnswer,
    /// Close the transport
    CloseTransport,
}

/// Negotiation state for one remote peer.
#[derive(Debug)]
pub struct PeerSession {
    peer: ClientId,
    epoch: u64,
    state: SessionState,
    remote_applied: bool,
    pending_candidates: Vec<Candidate>,
    created_at: Instant,
    last_activity: Instant,
}

impl PeerSession {
    /// A fresh `Idle` session.
    #[must_use]
    pub fn new(peer: ClientId, epoch: u64, now: Instant) -> Self {
        Self {
            peer,
            epoch,
            state: SessionState::Idle,
            remote_applied: false,
            pending_candidates: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Remote peer id.
    #[must_use]
    pub fn peer(&self) -> &ClientId {
        &self.peer
    }

    /// Distinguishes this session from earlier ones with the same peer.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Candidates waiting for the remote description, in arrival order.
    #[must_use]
    pub fn pending_candidates(&self) -> &[Candidate] {
        &self.pending_candidates
    }

    /// Whether the session has not been closed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state != SessionState::Closed
    }

    /// Whether the channel is usable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Whether setup has been pending for at least `setup_timeout`.
    #[must_use]
    pub fn is_stale(&self, now: Instant, setup_timeout: Duration) -> bool {
        !matches!(self.state, SessionState::Connected | SessionState::Closed)
            && now.saturating_duration_since(self.created_at) >= setup_timeout
    }

    /// Whether a connected session saw no activity for `idle_timeout`.
    #[must_use]
    pub fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        self.state == SessionState::Connected
            && now.saturating_duration_since(self.last_activity) >= idle_timeout
    }

    /// Record channel activity.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Advance the state machine.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<SessionAction> {
        use SessionState as S;

        if self.state == S::Closed {
            tracing::debug!("Session with {} closed, dropping {:?}", self.peer, event);
            return Vec::new();
        }

        match event {
            SessionEvent::Failed(reason) => {
                tracing::warn!("Session with {} failed: {}", self.peer, reason);
                self.close()
            }
            SessionEvent::Close => self.close(),

            SessionEvent::Initiate if self.state == S::Idle => {
                self.state = S::OfferSent;
                vec![SessionAction::SendOffer]
            }

            SessionEvent::RemoteOffer(description) if self.state == S::Idle => {
                if description.kind != SdpKind::Offer {
                    return self.close();
                }
                self.state = S::OfferReceived;
                vec![SessionAction::ApplyRemote(description)]
            }
            SessionEvent::RemoteOffer(_) => {
                tracing::info!(
                    "Ignoring offer from {} while a session is {:?}",
                    self.peer,
                    self.state
                );
                Vec::new()
            }

            SessionEvent::RemoteAnswer(description)
                if self.state == S::OfferSent && !self.remote_applied =>
            {
                if description.kind != SdpKind::Answer {
                    return self.close();
                }
                vec![SessionAction::ApplyRemote(description)]
            }

            SessionEvent::RemoteApplied
                if matches!(self.state, S::OfferReceived | S::OfferSent) && !self.remote_applied =>
            {
                self.remote_applied = true;
                let mut actions: Vec<SessionAction> = self
                    .pending_candidates
                    .drain(..)
                    .map(SessionAction::ApplyCandidate)
                    .collect();
                if self.state == S::OfferReceived {
                    self.state = S::AnswerSent;
                    actions.push(SessionAction::SendAnswer);
                }
                actions
            }

            SessionEvent::RemoteCandidate(candidate) => {
                if self.remote_applied {
                    vec![SessionAction::ApplyCandidate(candidate)]
                } else {
                    self.pending_candidates.push(candidate);
                    Vec::new()
                }
            }

            SessionEvent::ChannelOpen if matches!(self.state, S::OfferSent | S::AnswerSent) => {
                tracing::info!("Channel with {} open", self.peer);
                self.state = S::Connected;
                Vec::new()
            }

            other => {
                tracing::debug!(
                    "Session with {} ignores {:?} in state {:?}",
                    self.peer,
                    other,
                    self.state
                );
                Vec::new()
            }
        }
    }

    fn close(&mut self) -> Vec<SessionAction> {
        self.state = SessionState::Closed;
        self.pending_candidates.clear();
        vec![SessionAction::CloseTransport]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> PeerSession {
        PeerSession::new(ClientId::from("peer"), 1, Instant::now())
    }

    fn cand(n: u16) -> Candidate {
        Candidate::new(format!("tcp 10.0.0.1 {n}"))
    }

    #[test]
    fn test_offerer_path() {
        let mut s = session();
        assert_eq!(s.handle(SessionEvent::Initiate), vec![SessionAction::SendOffer]);
        assert_eq!(s.state(), SessionState::OfferSent);

        let answer = SessionDescription::answer("a");
        assert_eq!(
            s.handle(SessionEvent::RemoteAnswer(answer.clone())),
            vec![SessionAction::ApplyRemote(answer)]
        );
        assert!(s.handle(SessionEvent::RemoteApplied).is_empty());
        assert_eq!(s.state(), SessionState::OfferSent);

        assert!(s.handle(SessionEvent::ChannelOpen).is_empty());
        assert!(s.is_connected());
    }

    #[test]
    fn test_answerer_buffers_candidates_in_order() {
        let mut s = session();
        let offer = SessionDescription::offer("o");
        assert_eq!(
            s.handle(SessionEvent::RemoteOffer(offer.clone())),
            vec![SessionAction::ApplyRemote(offer)]
        );
        assert_eq!(s.state(), SessionState::OfferReceived);

        for n in 1..=3 {
            assert!(s.handle(SessionEvent::RemoteCandidate(cand(n))).is_empty());
        }
        assert_eq!(s.pending_candidates().len(), 3);

        assert_eq!(
            s.handle(SessionEvent::RemoteApplied),
            vec![
                SessionAction::ApplyCandidate(cand(1)),
                SessionAction::ApplyCandidate(cand(2)),
                SessionAction::ApplyCandidate(cand(3)),
                SessionAction::SendAnswer,
            ]
        );
        assert!(s.pending_candidates().is_empty());
        assert_eq!(s.state(), SessionState::AnswerSent);

        assert_eq!(
            s.handle(SessionEvent::RemoteCandidate(cand(4))),
            vec![SessionAction::ApplyCandidate(cand(4))]
        );

        s.handle(SessionEvent::ChannelOpen);
        assert_eq!(s.state(), SessionState::Connected);
    }

    #[test]
    fn test_glare_offer_ignored() {
        let mut s = session();
        s.handle(SessionEvent::Initiate);
        assert!(s
            .handle(SessionEvent::RemoteOffer(SessionDescription::offer("x")))
            .is_empty());
        assert_eq!(s.state(), SessionState::OfferSent);
    }

    #[test]
    fn test_failure_closes() {
        let mut s = session();
        s.handle(SessionEvent::Initiate);
        s.handle(SessionEvent::RemoteCandidate(cand(1)));
        assert_eq!(
            s.handle(SessionEvent::Failed("boom".into())),
            vec![SessionAction::CloseTransport]
        );
        assert_eq!(s.state(), SessionState::Closed);
        assert!(s.pending_candidates().is_empty());

        assert!(s.handle(SessionEvent::Initiate).is_empty());
        assert!(s.handle(SessionEvent::Close).is_empty());
    }

    #[test]
    fn test_wrong_description_kind_closes() {
        let mut s = session();
        s.handle(SessionEvent::Initiate);
        assert_eq!(
            s.handle(SessionEvent::RemoteAnswer(SessionDescription::offer("x"))),
            vec![SessionAction::CloseTransport]
        );
    }

    #[test]
    fn test_stray_events_ignored() {
        let mut s = session();
        assert!(s
            .handle(SessionEvent::RemoteAnswer(SessionDescription::answer("a")))
            .is_empty());
        assert!(s.handle(SessionEvent::ChannelOpen).is_empty());
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn test_stale_and_idle() {
        let start = Instant::now();
        let mut s = PeerSession::new(ClientId::from("p"), 1, start);
        s.handle(SessionEvent::Initiate);
        let setup = Duration::from_secs(30);
        assert!(!s.is_stale(start + Duration::from_secs(29), setup));
        assert!(s.is_stale(start + setup, setup));

        s.handle(SessionEvent::ChannelOpen);
        assert!(!s.is_stale(start + setup, setup));

        let idle = Duration::from_secs(120);
        s.touch(start + Duration::from_secs(10));
        assert!(!s.is_idle(start + Duration::from_secs(100), idle));
        assert!(s.is_idle(start + Duration::from_secs(130), idle));
    }
}
