//! Per-connection client: outbox, lifecycle, and the inbound/outbound pumps.
//!
//! Each client runs two tasks. The inbound pump is the only reader of the
//! connection and forwards data frames to the hub as broadcasts. The outbound
//! pump is the only writer: it drains the outbox in FIFO order and probes the
//! peer on a keepalive timer. Whichever pump stops first moves the client to
//! `Closing`, cancels the other one, and both report the client to the hub as
//! gone. Unregistering an absent client is a no-op, so the second report (or
//! an eviction that already happened) costs nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::HubConfig;
use crate::connection::{Connection, FrameReader, FrameWriter};
use crate::error::ConnectionError;
use crate::frame::Frame;
use crate::hub::Hub;
use crate::message::{ClientId, Message};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a client. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Both pumps running.
    Active,
    /// A terminal condition was hit; the pumps are unwinding.
    Closing,
    /// Both pumps exited and the connection was closed.
    Closed,
}

struct Lifecycle {
    state: watch::Sender<ClientState>,
    live_pumps: AtomicU8,
    cancel: CancellationToken,
}

impl Lifecycle {
    /// Moves `Active -> Closing` and signals both pumps to stop.
    ///
    /// Returns `true` only for the call that performed the transition.
    fn begin_close(&self) -> bool {
        let transitioned = self.state.send_if_modified(|state| {
            if *state == ClientState::Active {
                *state = ClientState::Closing;
                true
            } else {
                false
            }
        });
        self.cancel.cancel();
        transitioned
    }

    fn pump_exited(&self) {
        if self.live_pumps.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.state.send_replace(ClientState::Closed);
        }
    }
}

/// Handle to a connected client, as stored in the hub's membership.
///
/// Cloneable and cheap. The hub enqueues outbound frames through it; the
/// connection itself is only reachable from the client's pumps.
#[derive(Clone)]
pub struct ClientHandle {
    id: ClientId,
    serial: u64,
    outbox: mpsc::Sender<Frame>,
    lifecycle: Arc<Lifecycle>,
}

impl ClientHandle {
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn state(&self) -> ClientState {
        *self.lifecycle.state.borrow()
    }

    /// Requests a cooperative shutdown of both pumps.
    ///
    /// Already-queued frames are flushed (bounded by the drain timeout)
    /// before the connection is closed. Safe to call any number of times.
    pub fn close(&self) {
        if self.lifecycle.begin_close() {
            debug!(client = %self.id, "client closing");
        }
    }

    /// Waits until both pumps have exited and the connection is closed.
    pub async fn wait_closed(&self) {
        let mut rx = self.lifecycle.state.subscribe();
        let _ = rx.wait_for(|state| *state == ClientState::Closed).await;
    }

    /// Distinguishes this connection from a later one reusing the same id.
    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    /// Non-blocking enqueue onto the outbox.
    pub(crate) fn try_enqueue(&self, frame: Frame) -> Result<(), TrySendError<Frame>> {
        self.outbox.try_send(frame)
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("serial", &self.serial)
            .field("state", &self.state())
            .finish()
    }
}

/// A client whose handle exists but whose pumps have not started yet.
///
/// The hub registers the handle first and only then starts the pumps, so a
/// pump's unregister can never be processed ahead of the register.
pub(crate) struct PendingClient<C> {
    handle: ClientHandle,
    conn: C,
    outbox: mpsc::Receiver<Frame>,
}

pub(crate) fn prepare<C: Connection>(
    id: ClientId,
    conn: C,
    config: &HubConfig,
) -> (ClientHandle, PendingClient<C>) {
    let (tx, rx) = mpsc::channel(config.outbox_capacity);
    let (state, _) = watch::channel(ClientState::Active);
    let handle = ClientHandle {
        id,
        serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
        outbox: tx,
        lifecycle: Arc::new(Lifecycle {
            state,
            live_pumps: AtomicU8::new(2),
            cancel: CancellationToken::new(),
        }),
    };
    let pending = PendingClient {
        handle: handle.clone(),
        conn,
        outbox: rx,
    };
    (handle, pending)
}

impl<C: Connection> PendingClient<C> {
    /// Spawns the inbound and outbound pumps.
    pub(crate) fn start(self, hub: Hub) {
        let PendingClient {
            handle,
            conn,
            outbox,
        } = self;
        let (reader, writer) = conn.split();
        let (seen_tx, seen_rx) = watch::channel(Instant::now());
        let config = Arc::clone(hub.config());

        info!(client = %handle.id, "client connected");

        let inbound_hub = hub.clone();
        let inbound_handle = handle.clone();
        tokio::spawn(async move {
            inbound_pump(reader, &inbound_handle, &inbound_hub, seen_tx).await;
            finish(&inbound_handle, &inbound_hub).await;
        });

        tokio::spawn(async move {
            outbound_pump(writer, outbox, &handle, seen_rx, &config).await;
            finish(&handle, &hub).await;
        });
    }
}

/// Common exit path for both pumps.
async fn finish(handle: &ClientHandle, hub: &Hub) {
    handle.close();
    hub.unregister_instance(&handle.id, handle.serial).await;
    handle.lifecycle.pump_exited();
    if handle.state() == ClientState::Closed {
        info!(client = %handle.id, "client disconnected");
    }
}

/// Reads frames until the connection ends or the client is closing.
async fn inbound_pump<R: FrameReader>(
    mut reader: R,
    handle: &ClientHandle,
    hub: &Hub,
    last_seen: watch::Sender<Instant>,
) {
    let cancel = handle.lifecycle.cancel.clone();

    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = reader.receive_frame() => result,
        };

        let frame = match result {
            Ok(frame) => frame,
            Err(ConnectionError::Closed) => {
                debug!(client = %handle.id, "connection closed by peer");
                break;
            }
            Err(e) => {
                warn!(client = %handle.id, "read error: {e}");
                break;
            }
        };

        // Any inbound traffic proves the peer is alive.
        last_seen.send_replace(Instant::now());

        match frame {
            Frame::Data(payload) => {
                trace!(client = %handle.id, len = payload.len(), "inbound data");
                let msg = Message::new(handle.id.clone(), payload);
                if hub.broadcast(msg).await.is_err() {
                    debug!(client = %handle.id, "hub shut down, stopping inbound pump");
                    break;
                }
            }
            Frame::Ping(data) => {
                if handle.try_enqueue(Frame::Pong(data)).is_err() {
                    debug!(client = %handle.id, "outbox unavailable, pong skipped");
                }
            }
            Frame::Pong(_) => trace!(client = %handle.id, "pong received"),
            Frame::Close => {
                debug!(client = %handle.id, "close frame received");
                break;
            }
        }
    }
}

/// Drains the outbox onto the connection and runs the keepalive timer.
async fn outbound_pump<W: FrameWriter>(
    mut writer: W,
    mut outbox: mpsc::Receiver<Frame>,
    handle: &ClientHandle,
    last_seen: watch::Receiver<Instant>,
    config: &HubConfig,
) {
    let cancel = handle.lifecycle.cancel.clone();
    let period = config.keepalive_period;
    let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                drain(&mut writer, &mut outbox, handle, config).await;
                break;
            }

            // Ahead of the outbox so a busy client still gets probed.
            _ = keepalive.tick() => {
                let silent_for = last_seen.borrow().elapsed();
                if silent_for > config.pong_wait {
                    warn!(client = %handle.id, ?silent_for, "peer unresponsive, closing");
                    break;
                }
                if let Err(e) = write_frame(&mut writer, Frame::Ping(Bytes::new()), config.write_timeout).await {
                    warn!(client = %handle.id, "keepalive write error: {e}");
                    break;
                }
            }

            frame = outbox.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = write_frame(&mut writer, frame, config.write_timeout).await {
                    warn!(client = %handle.id, "write error: {e}");
                    break;
                }
            }
        }
    }

    if let Err(e) = writer.close().await {
        debug!(client = %handle.id, "close error: {e}");
    }
}

/// Flushes frames queued before the close request, within the drain timeout.
async fn drain<W: FrameWriter>(
    writer: &mut W,
    outbox: &mut mpsc::Receiver<Frame>,
    handle: &ClientHandle,
    config: &HubConfig,
) {
    outbox.close();
    let flush = async {
        let mut flushed = 0usize;
        while let Some(frame) = outbox.recv().await {
            if write_frame(writer, frame, config.write_timeout).await.is_err() {
                break;
            }
            flushed += 1;
        }
        flushed
    };
    match tokio::time::timeout(config.drain_timeout, flush).await {
        Ok(flushed) => trace!(client = %handle.id, flushed, "outbox drained"),
        Err(_) => debug!(client = %handle.id, "drain timed out, closing anyway"),
    }
}

async fn write_frame<W: FrameWriter>(
    writer: &mut W,
    frame: Frame,
    limit: Duration,
) -> Result<(), ConnectionError> {
    tokio::time::timeout(limit, writer.send_frame(frame))
        .await
        .map_err(|_| ConnectionError::Timeout)?
}
