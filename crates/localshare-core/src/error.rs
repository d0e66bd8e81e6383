//! Error types for LocalShare.
//!
//! This module provides a unified error type for all LocalShare operations,
//! with specific error variants for different failure modes.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for LocalShare operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for LocalShare.
#[derive(Error, Debug)]
pub enum Error {
    /// Peer channel is not open or was closed (E001)
    #[error("peer channel closed")]
    ChannelClosed,

    /// Transfer aborted before completion (E002)
    #[error("transfer {0} aborted")]
    TransferAborted(String),

    /// Received bytes disagree with the announced size (E003)
    #[error("size mismatch for '{file}': announced {expected} bytes, received {actual}")]
    SizeMismatch {
        /// File name
        file: String,
        /// Announced size
        expected: u64,
        /// Bytes actually received
        actual: u64,
    },

    /// Transfer id is not known to the coordinator
    #[error("unknown transfer: {0}")]
    UnknownTransfer(String),

    /// File not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Nothing to share
    #[error("no files to share")]
    NothingToShare,

    /// Invalid session description or candidate
    #[error("invalid signal: {0}")]
    InvalidSignal(String),

    /// Invalid protocol message
    #[error("invalid protocol message: {0}")]
    ProtocolError(String),

    /// Unsupported protocol version
    #[error("unsupported protocol version: {major}.{minor}")]
    UnsupportedVersion {
        /// Major version
        major: u8,
        /// Minor version
        minor: u8,
    },

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The client event loop has shut down
    #[error("client is shut down")]
    Shutdown,

    /// Operation timeout
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::ChannelClosed => Some("E001"),
            Self::TransferAborted(_) => Some("E002"),
            Self::SizeMismatch { .. } => Some("E003"),
            _ => None,
        }
    }

    /// Returns whether this error is recoverable (can be retried).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ChannelClosed | Self::TransferAborted(_) | Self::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
