//! Client identities and broadcast messages.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Opaque, comparable client identity.
///
/// Stable for the lifetime of a connection. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(Arc<str>);

impl ClientId {
    /// Generates a fresh random identity (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

/// A payload produced by one client for fan-out to the others.
///
/// Immutable once built. The payload is reference counted, so every member's
/// outbox shares the same bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    sender: ClientId,
    payload: Bytes,
    sent_at: DateTime<Utc>,
}

impl Message {
    /// Creates a message stamped with the current time.
    pub fn new(sender: ClientId, payload: impl Into<Bytes>) -> Self {
        Self {
            sender,
            payload: payload.into(),
            sent_at: Utc::now(),
        }
    }

    pub fn sender(&self) -> &ClientId {
        &self.sender
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = ClientId::generate();
        let b = ClientId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn id_from_string_roundtrips_display() {
        let id = ClientId::from("alice".to_string());
        assert_eq!(id.to_string(), "alice");
        assert_eq!(id, ClientId::from("alice"));
    }

    #[test]
    fn message_clones_share_payload() {
        let msg = Message::new(ClientId::from("a"), "hello");
        let copy = msg.clone();
        assert_eq!(msg.payload().as_ptr(), copy.payload().as_ptr());
        assert_eq!(copy.sender().as_str(), "a");
        assert!(copy.sent_at() <= Utc::now());
    }
}
