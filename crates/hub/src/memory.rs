//! In-process connections.
//!
//! [`pair`] returns a [`MemoryConnection`] to hand to the hub and the
//! [`MemoryPeer`] that plays the remote side: it injects inbound frames,
//! observes everything the hub writes, and can tell how many times the hub
//! closed the connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::connection::{Connection, FrameFuture, FrameReader, FrameWriter};
use crate::error::ConnectionError;
use crate::frame::Frame;

/// Creates a connected pair. `capacity` bounds each direction; a peer that
/// stops reading eventually blocks the hub-side writer.
pub fn pair(capacity: usize) -> (MemoryConnection, MemoryPeer) {
    let capacity = capacity.max(1);
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
    let closes = Arc::new(AtomicUsize::new(0));

    let conn = MemoryConnection {
        reader: MemoryReader { rx: inbound_rx },
        writer: MemoryWriter {
            tx: Some(outbound_tx),
            closes: Arc::clone(&closes),
        },
    };
    let peer = MemoryPeer {
        tx: inbound_tx,
        rx: outbound_rx,
        closes,
    };
    (conn, peer)
}

/// Hub side of an in-process connection.
pub struct MemoryConnection {
    reader: MemoryReader,
    writer: MemoryWriter,
}

impl Connection for MemoryConnection {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn split(self) -> (MemoryReader, MemoryWriter) {
        (self.reader, self.writer)
    }
}

pub struct MemoryReader {
    rx: mpsc::Receiver<Frame>,
}

impl FrameReader for MemoryReader {
    fn receive_frame(&mut self) -> FrameFuture<'_, Frame> {
        Box::pin(async move { self.rx.recv().await.ok_or(ConnectionError::Closed) })
    }
}

pub struct MemoryWriter {
    tx: Option<mpsc::Sender<Frame>>,
    closes: Arc<AtomicUsize>,
}

impl FrameWriter for MemoryWriter {
    fn send_frame(&mut self, frame: Frame) -> FrameFuture<'_, ()> {
        Box::pin(async move {
            let tx = self.tx.as_ref().ok_or(ConnectionError::Closed)?;
            tx.send(frame).await.map_err(|_| ConnectionError::Closed)
        })
    }

    fn close(&mut self) -> FrameFuture<'_, ()> {
        Box::pin(async move {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.tx = None;
            Ok(())
        })
    }
}

/// Remote side of an in-process connection.
pub struct MemoryPeer {
    tx: mpsc::Sender<Frame>,
    rx: mpsc::Receiver<Frame>,
    closes: Arc<AtomicUsize>,
}

impl MemoryPeer {
    /// Delivers a frame to the hub-side reader.
    pub async fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        self.tx.send(frame).await.map_err(|_| ConnectionError::Closed)
    }

    pub async fn send_data(&self, payload: impl Into<Bytes>) -> Result<(), ConnectionError> {
        self.send(Frame::Data(payload.into())).await
    }

    /// Next frame written by the hub, or `None` once the connection is
    /// closed and fully drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Next data payload, skipping keepalive traffic.
    pub async fn recv_data(&mut self) -> Option<Bytes> {
        while let Some(frame) = self.rx.recv().await {
            if let Frame::Data(payload) = frame {
                return Some(payload);
            }
        }
        None
    }

    /// Returns an already-written frame without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// How many times the hub side closed the connection.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}
