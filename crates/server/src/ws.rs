//! Adapter from a WebSocket stream to the hub's [`Connection`] traits.
//!
//! Text and binary messages both become [`Frame::Data`]. Outgoing data is
//! sent as text when it is valid UTF-8 and as binary otherwise, so browser
//! clients get back the same kind of message they sent.

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage, Utf8Bytes};

use relayhub::{Connection, ConnectionError, Frame, FrameFuture, FrameReader, FrameWriter};

/// A WebSocket stream usable as a hub connection.
pub struct WsConnection<S> {
    stream: S,
}

impl<S> WsConnection<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S> Connection for WsConnection<S>
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>>
        + Sink<WsMessage, Error = tungstenite::Error>
        + Send
        + Unpin
        + 'static,
{
    type Reader = WsReader<SplitStream<S>>;
    type Writer = WsWriter<SplitSink<S, WsMessage>>;

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = self.stream.split();
        (WsReader { stream }, WsWriter { sink })
    }
}

/// Read half of a [`WsConnection`].
pub struct WsReader<R> {
    stream: R,
}

impl<R> FrameReader for WsReader<R>
where
    R: Stream<Item = Result<WsMessage, tungstenite::Error>> + Send + Unpin + 'static,
{
    fn receive_frame(&mut self) -> FrameFuture<'_, Frame> {
        Box::pin(async move {
            loop {
                match self.stream.next().await {
                    Some(Ok(msg)) => {
                        if let Some(frame) = to_frame(msg) {
                            return Ok(frame);
                        }
                    }
                    Some(Err(e)) => return Err(map_error(e)),
                    None => return Err(ConnectionError::Closed),
                }
            }
        })
    }
}

/// Write half of a [`WsConnection`].
pub struct WsWriter<W> {
    sink: W,
}

impl<W> FrameWriter for WsWriter<W>
where
    W: Sink<WsMessage, Error = tungstenite::Error> + Send + Unpin + 'static,
{
    fn send_frame(&mut self, frame: Frame) -> FrameFuture<'_, ()> {
        Box::pin(async move { self.sink.send(to_ws(frame)).await.map_err(map_error) })
    }

    fn close(&mut self) -> FrameFuture<'_, ()> {
        Box::pin(async move {
            match self.sink.close().await {
                Ok(()) => Ok(()),
                Err(e) => match map_error(e) {
                    ConnectionError::Closed => Ok(()),
                    other => Err(other),
                },
            }
        })
    }
}

/// Maps an incoming WebSocket message. Raw frames yield `None`.
fn to_frame(msg: WsMessage) -> Option<Frame> {
    match msg {
        WsMessage::Text(text) => Some(Frame::Data(Bytes::from(text))),
        WsMessage::Binary(data) => Some(Frame::Data(data)),
        WsMessage::Ping(data) => Some(Frame::Ping(data)),
        WsMessage::Pong(data) => Some(Frame::Pong(data)),
        WsMessage::Close(_) => Some(Frame::Close),
        WsMessage::Frame(_) => None,
    }
}

fn to_ws(frame: Frame) -> WsMessage {
    match frame {
        Frame::Data(payload) => match Utf8Bytes::try_from(payload.clone()) {
            Ok(text) => WsMessage::Text(text),
            Err(_) => WsMessage::Binary(payload),
        },
        Frame::Ping(data) => WsMessage::Ping(data),
        Frame::Pong(data) => WsMessage::Pong(data),
        Frame::Close => WsMessage::Close(None),
    }
}

fn map_error(e: tungstenite::Error) -> ConnectionError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            ConnectionError::Closed
        }
        tungstenite::Error::Io(io) => ConnectionError::Io(io),
        other => ConnectionError::Transport(Box::new(other)),
    }
}
