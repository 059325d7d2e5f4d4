//! Error types for the hub and its connections.

use crate::message::ClientId;

/// Errors returned by [`Hub`](crate::Hub) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("client not found: {0}")]
    ClientNotFound(ClientId),

    #[error("hub is shut down")]
    HubClosed,
}

/// Errors produced by a duplex connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,

    #[error("connection timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}
