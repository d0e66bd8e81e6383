//! Chunked transfer coordinator.
//!
//! ## Protocol
//!
//! ```text
//! Requester                          Owner
//!     │                                 │
//!     │──── request{fileName, id} ─────►│
//!     │◄─── fileSize{fileName, id, n} ──│
//!     │◄─── chunk(id, bytes) ───────────│  (repeated)
//!     │◄─── end{id} ────────────────────│
//!     │                                 │
//!     │◄─── stop{id} ───────────────────│  (instead of end, on cancel)
//! ```
//!
//! Every chunk carries its transfer id, so any number of transfers share one
//! channel. There is no acknowledgement at this layer; the channel is
//! reliable and ordered.
//!
//! The [`TransferCoordinator`] tracks every transfer of the client. The
//! sending loop itself ([`send_file`]) runs in its own task and reports back
//! through a callback.

mod sender;

pub use sender::{send_file, SendOptions};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::file::{sanitize_file_name, unique_output_path};
use crate::protocol::{ChunkFrame, ClientId, TransferId};

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// We are sending
    Send,
    /// We are receiving
    Receive,
}

/// Transfer status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Requested; size not yet known
    Announced,
    /// Bytes flowing
    InProgress,
    /// All bytes delivered
    Completed,
    /// Cancelled or failed
    Aborted,
}

/// Snapshot of one transfer's progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    /// Transfer id
    pub transfer_id: TransferId,
    /// Remote peer
    pub peer: ClientId,
    /// File name
    pub file_name: String,
    /// Direction
    pub direction: TransferDirection,
    /// Status at the time of the snapshot
    pub status: TransferStatus,
    /// Bytes moved so far
    pub transferred_bytes: u64,
    /// Total bytes (0 until announced)
    pub total_size: u64,
}

impl TransferProgress {
    /// Progress as a percentage (0.0 - 100.0).
    ///
    /// 0% while the size is unknown, 100% for an announced empty file.
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.status == TransferStatus::Announced {
            0.0
        } else if self.total_size == 0 {
            100.0
        } else {
            (self.transferred_bytes as f64 / self.total_size as f64) * 100.0
        }
    }
}

/// A file fully received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    /// Transfer id
    pub transfer_id: TransferId,
    /// Sender
    pub peer: ClientId,
    /// Name announced by the sender
    pub file_name: String,
    /// File contents
    pub data: Vec<u8>,
}

impl ReceivedFile {
    /// Write the file into `dir` under a sanitized, non-clashing name.
    ///
    /// # Errors
    ///
    /// Returns an error if the announced name is unusable or the write fails.
    pub async fn save_to(&self, dir: &Path) -> Result<PathBuf> {
        let name = sanitize_file_name(&self.file_name).ok_or_else(|| {
            Error::ProtocolError(format!("unusable file name '{}'", self.file_name))
        })?;
        tokio::fs::create_dir_all(dir).await?;
        let path = unique_output_path(dir, &name);
        tokio::fs::write(&path, &self.data).await?;
        Ok(path)
    }
}

/// One tracked transfer.
#[derive(Debug)]
pub struct TransferRecord {
    /// Transfer id
    pub id: TransferId,
    /// Remote peer
    pub peer: ClientId,
    /// File name
    pub file_name: String,
    /// Total bytes (0 until announced)
    pub total_size: u64,
    /// Bytes moved so far; never decreases
    pub transferred_bytes: u64,
    /// Direction
    pub direction: TransferDirection,
    /// Status
    pub status: TransferStatus,
    /// When the record was created
    pub started_at: Instant,
    /// Last time bytes moved or the size was announced
    pub last_progress: Instant,
    buffer: Vec<Vec<u8>>,
    cancel: Option<CancellationToken>,
}

impl TransferRecord {
    fn new(
        id: TransferId,
        peer: ClientId,
        file_name: String,
        direction: TransferDirection,
        now: Instant,
    ) -> Self {
        Self {
            id,
            peer,
            file_name,
            total_size: 0,
            transferred_bytes: 0,
            direction,
            status: TransferStatus::Announced,
            started_at: now,
            last_progress: now,
            buffer: Vec::new(),
            cancel: None,
        }
    }

    /// Current progress snapshot.
    #[must_use]
    pub fn progress(&self) -> TransferProgress {
        TransferProgress {
            transfer_id: self.id,
            peer: self.peer.clone(),
            file_name: self.file_name.clone(),
            direction: self.direction,
            status: self.status,
            transferred_bytes: self.transferred_bytes,
            total_size: self.total_size,
        }
    }

    fn abort(&mut self) {
        self.status = TransferStatus::Aborted;
        self.buffer.clear();
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }
}

/// Tracks every transfer of one client.
#[derive(Debug, Default)]
pub struct TransferCoordinator {
    transfers: HashMap<TransferId, TransferRecord>,
}

impl TransferCoordinator {
    /// Create an empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a download we requested; its size is not known yet.
    pub fn expect(&mut self, id: TransferId, peer: ClientId, file_name: String, now: Instant) {
        self.transfers.insert(
            id,
            TransferRecord::new(id, peer, file_name, TransferDirection::Receive, now),
        );
    }

    /// Handle `fileSize`: the sender is about to stream `size` bytes.
    ///
    /// Unsolicited announcements start a new receive record.
    pub fn on_file_size(
        &mut self,
        peer: &ClientId,
        id: TransferId,
        file_name: String,
        size: u64,
        now: Instant,
    ) -> Option<TransferProgress> {
        let record = self.transfers.entry(id).or_insert_with(|| {
            TransferRecord::new(id, peer.clone(), file_name.clone(), TransferDirection::Receive, now)
        });

        if record.peer != *peer || record.direction != TransferDirection::Receive {
            tracing::warn!("Ignoring size announcement for foreign transfer {}", id);
            return None;
        }
        if record.status != TransferStatus::Announced {
            tracing::warn!("Duplicate size announcement for transfer {}", id);
            return None;
        }

        record.file_name = file_name;
        record.total_size = size;
        record.status = TransferStatus::InProgress;
        record.last_progress = now;
        tracing::debug!("Receiving '{}' ({} bytes) from {}", record.file_name, size, peer);
        Some(record.progress())
    }

    /// Handle one chunk frame.
    ///
    /// Chunks for unknown transfers, from the wrong peer, or that would
    /// overflow the announced size are discarded.
    pub fn on_chunk(
        &mut self,
        peer: &ClientId,
        chunk: ChunkFrame,
        now: Instant,
    ) -> Option<TransferProgress> {
        let Some(record) = self
            .transfers
            .get_mut(&chunk.transfer_id)
            .filter(|r| r.peer == *peer && r.status == TransferStatus::InProgress)
            .filter(|r| r.direction == TransferDirection::Receive)
        else {
            tracing::warn!("Discarding chunk for unknown transfer {}", chunk.transfer_id);
            return None;
        };

        let len = chunk.data.len() as u64;
        if record.transferred_bytes + len > record.total_size {
            tracing::warn!(
                "Discarding chunk overflowing '{}' ({} + {} > {})",
                record.file_name,
                record.transferred_bytes,
                len,
                record.total_size
            );
            return None;
        }

        record.transferred_bytes += len;
        record.buffer.push(chunk.data);
        record.last_progress = now;
        Some(record.progress())
    }

    /// Handle `end`: assemble the file if every byte arrived.
    ///
    /// The record is discarded either way.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTransfer`] for transfers not in progress and
    /// [`Error::SizeMismatch`] when bytes are missing.
    pub fn on_end(&mut self, peer: &ClientId, id: TransferId) -> Result<ReceivedFile> {
        let receiving = self.transfers.get(&id).is_some_and(|r| {
            r.peer == *peer
                && r.direction == TransferDirection::Receive
                && r.status == TransferStatus::InProgress
        });
        let Some(mut record) = receiving.then(|| self.transfers.remove(&id)).flatten() else {
            return Err(Error::UnknownTransfer(id.to_string()));
        };

        if record.transferred_bytes != record.total_size {
            record.abort();
            return Err(Error::SizeMismatch {
                file: record.file_name,
                expected: record.total_size,
                actual: record.transferred_bytes,
            });
        }

        record.status = TransferStatus::Completed;
        tracing::info!(
            "Received '{}' ({} bytes) from {}",
            record.file_name,
            record.total_size,
            peer
        );
        Ok(ReceivedFile {
            transfer_id: id,
            peer: record.peer,
            file_name: record.file_name,
            data: record.buffer.concat(),
        })
    }

    /// Handle `stop`: the sender cancelled. The buffer is discarded.
    pub fn on_stop(&mut self, peer: &ClientId, id: TransferId) -> Option<TransferRecord> {
        let owned = self
            .transfers
            .get(&id)
            .is_some_and(|r| r.peer == *peer && r.direction == TransferDirection::Receive);
        if !owned {
            return None;
        }
        let mut record = self.transfers.remove(&id)?;
        record.abort();
        tracing::info!("Sender stopped transfer of '{}'", record.file_name);
        Some(record)
    }

    /// Track an outgoing transfer. The returned token cancels the send loop.
    ///
    /// Returns `None` when `id` is already tracked.
    pub fn start_send(
        &mut self,
        peer: ClientId,
        id: TransferId,
        file_name: String,
        size: u64,
        now: Instant,
    ) -> Option<CancellationToken> {
        if self.transfers.contains_key(&id) {
            tracing::debug!("Ignoring repeated request for transfer {}", id);
            return None;
        }
        let cancel = CancellationToken::new();
        let mut record = TransferRecord::new(id, peer, file_name, TransferDirection::Send, now);
        record.total_size = size;
        record.status = TransferStatus::InProgress;
        record.cancel = Some(cancel.clone());
        self.transfers.insert(id, record);
        Some(cancel)
    }

    /// The send loop handed `sent` bytes to the channel.
    pub fn on_sent(&mut self, id: TransferId, sent: u64, now: Instant) -> Option<TransferProgress> {
        let record = self
            .transfers
            .get_mut(&id)
            .filter(|r| r.direction == TransferDirection::Send)?;
        record.transferred_bytes = record.transferred_bytes.max(sent.min(record.total_size));
        record.last_progress = now;
        Some(record.progress())
    }

    /// The send loop returned. The record is discarded.
    pub fn finish_send(&mut self, id: TransferId, result: &Result<u64>) -> Option<TransferRecord> {
        if self.transfers.get(&id)?.direction != TransferDirection::Send {
            return None;
        }
        let mut record = self.transfers.remove(&id)?;
        match result {
            Ok(_) => record.status = TransferStatus::Completed,
            Err(e) => {
                tracing::info!("Sending '{}' stopped: {}", record.file_name, e);
                record.abort();
            }
        }
        Some(record)
    }

    /// Abort one transfer in either direction.
    pub fn abort(&mut self, id: TransferId) -> Option<TransferRecord> {
        let mut record = self.transfers.remove(&id)?;
        record.abort();
        Some(record)
    }

    /// Abort every transfer with `peer`. Send loops are cancelled.
    pub fn abort_peer(&mut self, peer: &ClientId) -> Vec<TransferRecord> {
        let ids: Vec<TransferId> = self
            .transfers
            .values()
            .filter(|r| r.peer == *peer)
            .map(|r| r.id)
            .collect();
        ids.into_iter().filter_map(|id| self.abort(id)).collect()
    }

    /// Cancel every outgoing transfer. Records stay until their loops return.
    pub fn cancel_sends(&self) -> usize {
        self.transfers
            .values()
            .filter(|r| r.direction == TransferDirection::Send)
            .filter_map(|r| r.cancel.as_ref())
            .inspect(|c| c.cancel())
            .count()
    }

    /// Whether any transfer with `peer` is running.
    #[must_use]
    pub fn has_transfers(&self, peer: &ClientId) -> bool {
        self.transfers.values().any(|r| r.peer == *peer)
    }

    /// Record for `id`.
    #[must_use]
    pub fn get(&self, id: TransferId) -> Option<&TransferRecord> {
        self.transfers.get(&id)
    }

    /// Number of tracked transfers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Receive transfers without progress for `timeout`.
    #[must_use]
    pub fn stalled_receives(&self, now: Instant, timeout: Duration) -> Vec<TransferId> {
        self.transfers
            .values()
            .filter(|r| r.direction == TransferDirection::Receive)
            .filter(|r| now.saturating_duration_since(r.last_progress) >= timeout)
            .map(|r| r.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> ClientId {
        ClientId::from("sender")
    }

    fn chunk(id: TransferId, data: &[u8]) -> ChunkFrame {
        ChunkFrame {
            transfer_id: id,
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_receive_happy_path_with_monotonic_progress() {
        let mut coordinator = TransferCoordinator::new();
        let id = TransferId::new();
        let now = Instant::now();
        coordinator.expect(id, peer(), "a.bin".into(), now);

        let announced = coordinator.get(id).unwrap().progress();
        assert_eq!(announced.percentage(), 0.0);

        coordinator
            .on_file_size(&peer(), id, "a.bin".into(), 10, now)
            .unwrap();

        let mut last = 0.0;
        for part in [&b"abcd"[..], b"efgh", b"ij"] {
            let progress = coordinator.on_chunk(&peer(), chunk(id, part), now).unwrap();
            assert!(progress.percentage() >= last);
            last = progress.percentage();
        }
        assert_eq!(last, 100.0);

        let file = coordinator.on_end(&peer(), id).unwrap();
        assert_eq!(file.data, b"abcdefghij");
        assert_eq!(file.file_name, "a.bin");
        assert!(coordinator.is_empty());
    }

    #[test]
    fn test_zero_length_file() {
        let mut coordinator = TransferCoordinator::new();
        let id = TransferId::new();
        let progress = coordinator
            .on_file_size(&peer(), id, "empty".into(), 0, Instant::now())
            .unwrap();
        assert_eq!(progress.percentage(), 100.0);
        assert!(coordinator.on_end(&peer(), id).unwrap().data.is_empty());
    }

    #[test]
    fn test_size_mismatch_aborts() {
        let mut coordinator = TransferCoordinator::new();
        let id = TransferId::new();
        let now = Instant::now();
        coordinator.on_file_size(&peer(), id, "a".into(), 5, now);
        coordinator.on_chunk(&peer(), chunk(id, b"abc"), now);

        assert!(matches!(
            coordinator.on_end(&peer(), id),
            Err(Error::SizeMismatch {
                expected: 5,
                actual: 3,
                ..
            })
        ));
        assert!(coordinator.get(id).is_none());
    }

    #[test]
    fn test_overflow_and_unknown_chunks_discarded() {
        let mut coordinator = TransferCoordinator::new();
        let id = TransferId::new();
        let now = Instant::now();
        coordinator.on_file_size(&peer(), id, "a".into(), 4, now);

        assert!(coordinator.on_chunk(&peer(), chunk(id, b"abc"), now).is_some());
        assert!(coordinator.on_chunk(&peer(), chunk(id, b"de"), now).is_none());
        assert_eq!(coordinator.get(id).unwrap().transferred_bytes, 3);

        assert!(coordinator
            .on_chunk(&peer(), chunk(TransferId::new(), b"x"), now)
            .is_none());
        assert!(coordinator
            .on_chunk(&ClientId::from("intruder"), chunk(id, b"x"), now)
            .is_none());
        assert!(matches!(
            coordinator.on_end(&peer(), TransferId::new()),
            Err(Error::UnknownTransfer(_))
        ));
    }

    #[test]
    fn test_multiplexed_transfers_stay_separate() {
        let mut coordinator = TransferCoordinator::new();
        let now = Instant::now();
        let a = TransferId::new();
        let b = TransferId::new();
        coordinator.on_file_size(&peer(), a, "a".into(), 6, now);
        coordinator.on_file_size(&peer(), b, "b".into(), 6, now);

        for (id, part) in [(a, b"aa"), (b, b"bb"), (a, b"aa"), (b, b"bb"), (b, b"bb"), (a, b"aa")] {
            coordinator.on_chunk(&peer(), chunk(id, part), now);
        }

        assert_eq!(coordinator.on_end(&peer(), b).unwrap().data, b"bbbbbb");
        assert_eq!(coordinator.on_end(&peer(), a).unwrap().data, b"aaaaaa");
    }

    #[test]
    fn test_stop_discards() {
        let mut coordinator = TransferCoordinator::new();
        let id = TransferId::new();
        let now = Instant::now();
        coordinator.on_file_size(&peer(), id, "a".into(), 4, now);
        coordinator.on_chunk(&peer(), chunk(id, b"ab"), now);

        assert!(coordinator.on_stop(&ClientId::from("other"), id).is_none());
        let record = coordinator.on_stop(&peer(), id).unwrap();
        assert_eq!(record.status, TransferStatus::Aborted);
        assert!(coordinator.is_empty());
    }

    #[test]
    fn test_send_side_lifecycle() {
        let mut coordinator = TransferCoordinator::new();
        let id = TransferId::new();
        let now = Instant::now();
        let cancel = coordinator
            .start_send(peer(), id, "a".into(), 8, now)
            .unwrap();

        assert_eq!(coordinator.on_sent(id, 4, now).unwrap().transferred_bytes, 4);
        assert_eq!(coordinator.on_sent(id, 2, now).unwrap().transferred_bytes, 4);
        assert!(coordinator.has_transfers(&peer()));

        assert_eq!(coordinator.cancel_sends(), 1);
        assert!(cancel.is_cancelled());

        let record = coordinator
            .finish_send(id, &Err(Error::TransferAborted(id.to_string())))
            .unwrap();
        assert_eq!(record.status, TransferStatus::Aborted);
        assert!(!coordinator.has_transfers(&peer()));
    }

    #[test]
    fn test_repeated_request_keeps_first_send() {
        let mut coordinator = TransferCoordinator::new();
        let id = TransferId::new();
        let now = Instant::now();
        let first = coordinator
            .start_send(peer(), id, "a".into(), 8, now)
            .unwrap();

        assert!(coordinator
            .start_send(peer(), id, "a".into(), 8, now)
            .is_none());
        assert_eq!(coordinator.len(), 1);

        assert_eq!(coordinator.cancel_sends(), 1);
        assert!(first.is_cancelled());
    }

    #[test]
    fn test_abort_peer_cancels_everything() {
        let mut coordinator = TransferCoordinator::new();
        let now = Instant::now();
        let send = coordinator
            .start_send(peer(), TransferId::new(), "s".into(), 1, now)
            .unwrap();
        coordinator.expect(TransferId::new(), peer(), "r".into(), now);
        coordinator.expect(TransferId::new(), ClientId::from("other"), "x".into(), now);

        let aborted = coordinator.abort_peer(&peer());
        assert_eq!(aborted.len(), 2);
        assert!(send.is_cancelled());
        assert_eq!(coordinator.len(), 1);
    }

    #[tokio::test]
    async fn test_save_to_avoids_clobbering() {
        let dir = tempfile::tempdir().unwrap();
        let file = ReceivedFile {
            transfer_id: TransferId::new(),
            peer: peer(),
            file_name: "../notes.txt".into(),
            data: b"hello".to_vec(),
        };

        let first = file.save_to(dir.path()).await.unwrap();
        let second = file.save_to(dir.path()).await.unwrap();
        assert_eq!(first, dir.path().join("notes.txt"));
        assert_eq!(second, dir.path().join("notes (1).txt"));
        assert_eq!(std::fs::read(second).unwrap(), b"hello");
    }

    #[test]
    fn test_stalled_receives() {
        let mut coordinator = TransferCoordinator::new();
        let start = Instant::now();
        let id = TransferId::new();
        coordinator.expect(id, peer(), "a".into(), start);
        coordinator.start_send(peer(), TransferId::new(), "s".into(), 1, start);

        let timeout = Duration::from_secs(60);
        assert!(coordinator
            .stalled_receives(start + Duration::from_secs(59), timeout)
            .is_empty());
        assert_eq!(
            coordinator.stalled_receives(start + timeout, timeout),
            vec![id]
        );
    }
}
