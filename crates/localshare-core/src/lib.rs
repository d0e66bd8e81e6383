//! # LocalShare Core Library
//!
//! `localshare-core` provides the core functionality for LocalShare, a
//! peer-to-peer file sharing tool for devices on the same local network.
//!
//! A lightweight relay tracks which devices are online and what they share,
//! and forwards session-setup signals between them. File bytes never pass
//! through the relay: two clients negotiate a direct channel and stream
//! chunks over it.
//!
//! ## Modules
//!
//! - [`client`] - Client event loop, relay connection and public handle
//! - [`config`] - Configuration management
//! - [`mod@file`] - Shared-file bookkeeping, enumeration and chunk slicing
//! - [`protocol`] - Relay, signal and peer-channel wire formats
//! - [`queue`] - Single-flight download admission queue
//! - [`registry`] - Presence registry (relay side)
//! - [`relay`] - Websocket relay server
//! - [`session`] - Peer session state machine and session table
//! - [`transfer`] - Chunked transfer coordinator
//! - [`transport`] - Transport capability and the bundled TCP transport
//!
//! ## Example
//!
//! ```rust,ignore
//! use localshare_core::client::Client;
//! use localshare_core::config::Config;
//!
//! let mut handle = Client::spawn(Config::default());
//! handle.share(vec!["notes.txt".into()]).await?;
//! while let Some(event) = handle.next_event().await {
//!     println!("{event:?}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unused_async)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::derivable_impls)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::unused_self)]

pub mod client;
pub mod config;
pub mod error;
pub mod file;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod session;
pub mod transfer;
pub mod transport;

#[cfg(feature = "relay")]
pub mod relay;

pub use error::{Error, Result};

use std::time::Duration;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version for peer-channel frames
pub const PROTOCOL_VERSION: (u8, u8) = (1, 0);

/// Default relay port (TCP)
pub const DEFAULT_RELAY_PORT: u16 = 3000;

/// Default chunk size for file transfers (64 KB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Largest accepted chunk size (1 MB)
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// How long an advertised file stays visible
pub const RETENTION: Duration = Duration::from_secs(72 * 60 * 60);
