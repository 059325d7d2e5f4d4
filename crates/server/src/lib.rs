//! WebSocket front end for the relayhub connection hub.
//!
//! Accepts TCP connections, upgrades them to WebSocket, and hands each one to
//! a [`relayhub::Hub`] as a [`WsConnection`]. Everything after the upgrade
//! (membership, fan-out, keepalive) is the hub's job.

mod server;
mod ws;

pub use server::{HubServer, ServerConfig};
pub use ws::{WsConnection, WsReader, WsWriter};

/// Largest accepted WebSocket message or frame, in bytes (64 KiB).
pub const WS_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Errors produced by the hub server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("hub error: {0}")]
    Hub(#[from] relayhub::HubError),
}
