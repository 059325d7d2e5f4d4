//! The duplex connection capability consumed by the hub.
//!
//! The network layer hands over an established connection; the hub splits it
//! so that exactly one task reads ([`FrameReader`]) and exactly one task
//! writes ([`FrameWriter`]). Neither half is shared further.

use std::future::Future;
use std::pin::Pin;

use crate::error::ConnectionError;
use crate::frame::Frame;

/// A boxed future returned by connection methods.
pub type FrameFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ConnectionError>> + Send + 'a>>;

/// An established, bidirectional frame stream.
pub trait Connection: Send + 'static {
    type Reader: FrameReader;
    type Writer: FrameWriter;

    /// Splits the connection into its read and write halves.
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// Read half of a [`Connection`]. Owned by the client's inbound pump.
pub trait FrameReader: Send + 'static {
    /// Waits for the next frame.
    ///
    /// Returns [`ConnectionError::Closed`] once the peer has gone away. The
    /// returned future may be dropped before completion when the client is
    /// shutting down.
    fn receive_frame(&mut self) -> FrameFuture<'_, Frame>;
}

/// Write half of a [`Connection`]. Owned by the client's outbound pump.
pub trait FrameWriter: Send + 'static {
    fn send_frame(&mut self, frame: Frame) -> FrameFuture<'_, ()>;

    /// Closes the underlying connection.
    ///
    /// Called once by the outbound pump as its last action.
    fn close(&mut self) -> FrameFuture<'_, ()>;
}
