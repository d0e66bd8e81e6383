//! Presence registry kept by the relay.
//!
//! The registry owns one [`ClientRecord`] per connected client. Each record
//! holds the sending half of that client's bounded outbound queue; the
//! connection task drains the other half onto the websocket. All methods are
//! synchronous so callers can keep the registry behind a mutex without holding
//! it across an await point.
//!
//! Delivery never blocks. A client whose queue is full is evicted as a slow
//! consumer and its group is re-broadcast; dropping its record closes the
//! queue, which ends the connection.

mod group;

pub use group::GroupKey;

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::file::FileMetadata;
use crate::protocol::{AdvertisedFile, ClientId, RelayServerMessage};

/// Sending half of a client's outbound queue.
pub type Outbox = mpsc::Sender<RelayServerMessage>;

/// One connected client.
#[derive(Debug)]
pub struct ClientRecord {
    /// Assigned id
    pub id: ClientId,
    /// Group the client belongs to
    pub group: GroupKey,
    /// Advertised files in share order
    pub shared_files: Vec<FileMetadata>,
    outbox: Outbox,
}

enum Delivery {
    Sent,
    Full,
    Closed,
}

/// Connected clients, their groups and their advertised files.
#[derive(Debug)]
pub struct Registry {
    clients: HashMap<ClientId, ClientRecord>,
    retention: Duration,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
            retention: crate::RETENTION,
        }
    }

    /// Override the retention window for advertised files.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Register a new client reached through `outbox`.
    ///
    /// Replies `register{clientId}` to the caller and broadcasts its group.
    pub fn register(&mut self, addr: IpAddr, outbox: Outbox) -> ClientId {
        let mut id = ClientId::generate();
        while self.clients.contains_key(&id) {
            id = ClientId::generate();
        }
        let group = GroupKey::from_addr(addr);

        tracing::info!("Client {} registered from {} (group {})", id, addr, group);

        self.clients.insert(
            id.clone(),
            ClientRecord {
                id: id.clone(),
                group: group.clone(),
                shared_files: Vec::new(),
                outbox,
            },
        );

        let reply = RelayServerMessage::Register {
            client_id: id.clone(),
        };
        if self.deliver(&id, reply) {
            self.broadcast(&group);
        }
        id
    }

    /// Merge `files` into the client's advertised set and broadcast.
    ///
    /// Incoming entries replace entries with the same name; other entries
    /// are kept.
    pub fn update_shared_files(&mut self, id: &ClientId, files: Vec<FileMetadata>) {
        let Some(record) = self.clients.get_mut(id) else {
            tracing::debug!("Share from unknown client {}", id);
            return;
        };

        for file in files {
            if let Some(existing) = record.shared_files.iter_mut().find(|f| f.name == file.name) {
                *existing = file;
            } else {
                record.shared_files.push(file);
            }
        }

        let group = record.group.clone();
        self.broadcast(&group);
    }

    /// Withdraw every file the client advertises and broadcast.
    pub fn stop_sharing(&mut self, id: &ClientId) {
        let Some(record) = self.clients.get_mut(id) else {
            return;
        };
        record.shared_files.clear();
        let group = record.group.clone();
        self.broadcast(&group);
    }

    /// Forward `signal` from `from` to `target`.
    ///
    /// The target must be in the sender's group. Returns whether the signal
    /// was queued for delivery.
    pub fn relay_signal(
        &mut self,
        from: &ClientId,
        target: &ClientId,
        signal: serde_json::Value,
    ) -> bool {
        let same_group = match (self.clients.get(from), self.clients.get(target)) {
            (Some(sender), Some(recipient)) => sender.group == recipient.group,
            _ => false,
        };
        if !same_group {
            tracing::debug!("Dropping signal from {} to unknown target {}", from, target);
            return false;
        }

        let message = RelayServerMessage::Signal {
            from_id: from.clone(),
            signal,
        };
        self.deliver(target, message)
    }

    /// Remove a client and broadcast its former group.
    ///
    /// Returns `false` if the client was already gone.
    pub fn disconnect(&mut self, id: &ClientId) -> bool {
        let Some(record) = self.clients.remove(id) else {
            return false;
        };
        tracing::info!("Client {} disconnected", id);
        self.broadcast(&record.group);
        true
    }

    /// Send every member of `group` a fresh snapshot.
    pub fn broadcast(&mut self, group: &GroupKey) {
        self.broadcast_at(group, chrono::Utc::now().timestamp_millis());
    }

    /// Send every member of `group` the snapshot as of `now_ms`.
    ///
    /// Expired files are pruned first. Members evicted during the broadcast
    /// trigger another round for the remaining members.
    pub fn broadcast_at(&mut self, group: &GroupKey, now_ms: i64) {
        loop {
            self.prune(group, now_ms);
            let update = self.snapshot(group);
            let members: Vec<ClientId> = self
                .clients
                .values()
                .filter(|c| &c.group == group)
                .map(|c| c.id.clone())
                .collect();

            let mut evicted = false;
            for member in members {
                match self.try_deliver(&member, update.clone()) {
                    Delivery::Sent => {}
                    Delivery::Full | Delivery::Closed => {
                        self.clients.remove(&member);
                        evicted = true;
                    }
                }
            }

            if !evicted {
                break;
            }
        }
    }

    /// Current snapshot of `group` without pruning.
    #[must_use]
    pub fn snapshot(&self, group: &GroupKey) -> RelayServerMessage {
        let members: Vec<&ClientRecord> =
            self.clients.values().filter(|c| &c.group == group).collect();

        let shared_files = members
            .iter()
            .flat_map(|c| {
                c.shared_files.iter().map(|f| AdvertisedFile {
                    name: f.name.clone(),
                    size: f.size,
                    owner_id: c.id.clone(),
                })
            })
            .collect();

        RelayServerMessage::Update {
            device_count: members.len(),
            shared_files,
        }
    }

    /// Group a client belongs to.
    #[must_use]
    pub fn group_of(&self, id: &ClientId) -> Option<&GroupKey> {
        self.clients.get(id).map(|c| &c.group)
    }

    /// Record of a connected client.
    #[must_use]
    pub fn get(&self, id: &ClientId) -> Option<&ClientRecord> {
        self.clients.get(id)
    }

    /// Number of connected clients across all groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn prune(&mut self, group: &GroupKey, now_ms: i64) {
        let retention = self.retention;
        for record in self.clients.values_mut().filter(|c| &c.group == group) {
            let before = record.shared_files.len();
            record
                .shared_files
                .retain(|f| !f.is_expired(now_ms, retention));
            let pruned = before - record.shared_files.len();
            if pruned > 0 {
                tracing::debug!("Pruned {} expired files of {}", pruned, record.id);
            }
        }
    }

    fn try_deliver(&self, id: &ClientId, message: RelayServerMessage) -> Delivery {
        let Some(record) = self.clients.get(id) else {
            return Delivery::Closed;
        };
        match record.outbox.try_send(message) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Evicting slow client {}", id);
                Delivery::Full
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Outbound queue of {} already closed", id);
                Delivery::Closed
            }
        }
    }

    /// Deliver one message, evicting the recipient if it cannot take it.
    fn deliver(&mut self, id: &ClientId, message: RelayServerMessage) -> bool {
        match self.try_deliver(id, message) {
            Delivery::Sent => true,
            Delivery::Full | Delivery::Closed => {
                if let Some(record) = self.clients.remove(id) {
                    self.broadcast(&record.group);
                }
                false
            }
        }
    }
}
