//! Frames exchanged over a duplex connection.

use bytes::Bytes;

/// A single unit of I/O on a [`Connection`](crate::Connection).
///
/// `Data` carries an opaque application payload. The control frames are
/// used by the pumps for keepalive and orderly shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close,
}

impl Frame {
    /// Builds a data frame from anything convertible to [`Bytes`].
    pub fn data(payload: impl Into<Bytes>) -> Self {
        Frame::Data(payload.into())
    }
}
