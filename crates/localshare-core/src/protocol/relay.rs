//! Messages exchanged between clients and the relay.
//!
//! Every message is a JSON object with a `type` discriminator and camelCase
//! fields, sent as a websocket text frame.

use serde::{Deserialize, Serialize};

use super::ClientId;
use crate::file::FileMetadata;

/// Client to relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RelayClientMessage {
    /// Ask for an id and join the caller's group
    Register,
    /// Advertise files (merged by name with what is already advertised)
    Share {
        /// Files to advertise
        files: Vec<FileMetadata>,
    },
    /// Withdraw every advertised file
    StopSharing,
    /// Forward an opaque signal to another client of the same group
    Signal {
        /// Recipient
        target_id: ClientId,
        /// Opaque payload
        signal: serde_json::Value,
    },
}

/// Relay to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RelayServerMessage {
    /// Id assigned to the caller
    Register {
        /// Assigned id
        client_id: ClientId,
    },
    /// Snapshot of the caller's group
    Update {
        /// Number of clients in the group
        device_count: usize,
        /// Every unexpired file advertised in the group
        shared_files: Vec<AdvertisedFile>,
    },
    /// Signal forwarded from another client
    Signal {
        /// Sender
        from_id: ClientId,
        /// Opaque payload
        signal: serde_json::Value,
    },
}

/// A shared file as seen in a group snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisedFile {
    /// File name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Client that shares it
    pub owner_id: ClientId,
}
