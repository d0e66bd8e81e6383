//! Single-flight download admission.
//!
//! Download requests are served strictly one at a time in request order.
//! Outgoing sends never pass through here.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::protocol::{ClientId, TransferId};

/// A requested download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Peer that shares the file
    pub owner: ClientId,
    /// Advertised file name
    pub file_name: String,
    /// Id the transfer will use
    pub transfer_id: TransferId,
    /// When it was enqueued
    pub requested_at: Instant,
}

#[derive(Debug)]
struct ActiveDownload {
    request: DownloadRequest,
    last_progress: Instant,
}

/// FIFO of download requests with at most one active.
#[derive(Debug, Default)]
pub struct DownloadQueue {
    pending: VecDeque<DownloadRequest>,
    active: Option<ActiveDownload>,
}

impl DownloadQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request. Returns it and its 1-based position among pending
    /// requests.
    pub fn enqueue(
        &mut self,
        owner: ClientId,
        file_name: String,
        now: Instant,
    ) -> (DownloadRequest, usize) {
        let request = DownloadRequest {
            owner,
            file_name,
            transfer_id: TransferId::new(),
            requested_at: now,
        };
        self.pending.push_back(request.clone());
        (request, self.pending.len())
    }

    /// Start the next download.
    ///
    /// Returns `None` while a download is active or nothing is pending.
    pub fn process_next(&mut self, now: Instant) -> Option<DownloadRequest> {
        if self.active.is_some() {
            return None;
        }
        let request = self.pending.pop_front()?;
        tracing::debug!("Starting download of '{}' from {}", request.file_name, request.owner);
        self.active = Some(ActiveDownload {
            request: request.clone(),
            last_progress: now,
        });
        Some(request)
    }

    /// The active download, if any.
    #[must_use]
    pub fn active(&self) -> Option<&DownloadRequest> {
        self.active.as_ref().map(|a| &a.request)
    }

    /// Whether a download is active.
    #[must_use]
    pub fn is_downloading(&self) -> bool {
        self.active.is_some()
    }

    /// Record progress on the active download.
    pub fn touch(&mut self, id: TransferId, now: Instant) {
        if let Some(active) = self.active.as_mut().filter(|a| a.request.transfer_id == id) {
            active.last_progress = now;
        }
    }

    /// Clear the active download if it is `id` (completed or aborted).
    pub fn finish(&mut self, id: TransferId) -> Option<DownloadRequest> {
        if self.active()?.transfer_id != id {
            return None;
        }
        self.active.take().map(|a| a.request)
    }

    /// Clear the active download if it comes from `owner`.
    pub fn abort_owner(&mut self, owner: &ClientId) -> Option<DownloadRequest> {
        if self.active()?.owner != *owner {
            return None;
        }
        self.active.take().map(|a| a.request)
    }

    /// Id of the active download if it made no progress for `timeout`.
    #[must_use]
    pub fn timed_out(&self, now: Instant, timeout: Duration) -> Option<TransferId> {
        self.active
            .as_ref()
            .filter(|a| now.saturating_duration_since(a.last_progress) >= timeout)
            .map(|a| a.request.transfer_id)
    }

    /// 1-based position of a pending request.
    #[must_use]
    pub fn position(&self, id: TransferId) -> Option<usize> {
        self.pending
            .iter()
            .position(|r| r.transfer_id == id)
            .map(|p| p + 1)
    }

    /// Number of pending requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending or active.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.active.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_flight() {
        let mut queue = DownloadQueue::new();
        let now = Instant::now();
        let owner = ClientId::from("owner");

        let ids: Vec<TransferId> = ["a", "b", "c"]
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let (request, position) = queue.enqueue(owner.clone(), (*name).to_string(), now);
                assert_eq!(position, i + 1);
                request.transfer_id
            })
            .collect();

        let first = queue.process_next(now).unwrap();
        assert_eq!(first.file_name, "a");
        assert!(queue.process_next(now).is_none());
        assert_eq!(queue.position(ids[2]), Some(2));

        assert!(queue.finish(ids[1]).is_none());
        assert!(queue.is_downloading());
        assert_eq!(queue.finish(ids[0]).unwrap().file_name, "a");

        assert_eq!(queue.process_next(now).unwrap().file_name, "b");
        assert!(queue.process_next(now).is_none());
        queue.finish(ids[1]);

        assert_eq!(queue.process_next(now).unwrap().file_name, "c");
        queue.finish(ids[2]);
        assert!(queue.process_next(now).is_none());
        assert!(queue.is_idle());
    }

    #[test]
    fn test_abort_owner_only_matches_active() {
        let mut queue = DownloadQueue::new();
        let now = Instant::now();
        queue.enqueue(ClientId::from("a"), "x".into(), now);
        queue.process_next(now);

        assert!(queue.abort_owner(&ClientId::from("b")).is_none());
        assert!(queue.abort_owner(&ClientId::from("a")).is_some());
        assert!(!queue.is_downloading());
    }

    #[test]
    fn test_timeout_resets_on_progress() {
        let mut queue = DownloadQueue::new();
        let start = Instant::now();
        let (request, _) = queue.enqueue(ClientId::from("a"), "x".into(), start);
        queue.process_next(start);

        let timeout = Duration::from_secs(60);
        assert!(queue.timed_out(start + Duration::from_secs(30), timeout).is_none());

        queue.touch(request.transfer_id, start + Duration::from_secs(30));
        assert!(queue.timed_out(start + Duration::from_secs(61), timeout).is_none());
        assert_eq!(
            queue.timed_out(start + Duration::from_secs(90), timeout),
            Some(request.transfer_id)
        );
    }
}
