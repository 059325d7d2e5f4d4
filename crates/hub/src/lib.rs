//! Concurrent connection hub.
//!
//! Tracks which clients are connected and fans messages out to them. All
//! membership changes go through a single control loop ([`Hub`]), and every
//! client owns a bounded outbox drained by its own outbound pump, so a slow
//! client never stalls delivery to the others.
//!
//! The hub consumes already-established duplex connections through the
//! [`Connection`] trait; handshakes and wire encoding live elsewhere.

use std::time::Duration;

mod client;
mod config;
mod connection;
mod error;
mod frame;
mod hub;
pub mod memory;
mod message;

pub use client::{ClientHandle, ClientState};
pub use config::{HubConfig, OverflowPolicy};
pub use connection::{Connection, FrameFuture, FrameReader, FrameWriter};
pub use error::{ConnectionError, HubError};
pub use frame::Frame;
pub use hub::{Hub, HubStats};
pub use message::{ClientId, Message};

/// Outbox capacity per client.
///
/// A client that falls this many frames behind is considered unresponsive.
pub const OUTBOX_CAPACITY: usize = 256;

/// Capacity of the hub's control queue.
pub const CONTROL_QUEUE_CAPACITY: usize = 1024;

/// How often the outbound pump probes the peer.
pub const KEEPALIVE_PERIOD: Duration = Duration::from_secs(25);

/// Maximum silence from the peer before it is declared dead.
///
/// Any inbound frame counts as a sign of life, not only pongs.
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Time allowed for a single frame write.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed to flush already-queued frames when a client is closing.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
