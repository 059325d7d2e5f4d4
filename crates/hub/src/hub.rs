//! The hub: single owner of the membership set.
//!
//! [`Hub`] is a cheap, cloneable handle. Every operation is a request sent to
//! one control loop task, which owns the `members` map outright. Requests are
//! processed strictly in submission order, so a broadcast reaches exactly the
//! clients that were members when the loop got to it.
//!
//! Delivery into a member's outbox never waits. A full outbox triggers the
//! configured [`OverflowPolicy`] for that member only.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::{self, ClientHandle};
use crate::config::{HubConfig, OverflowPolicy};
use crate::connection::Connection;
use crate::error::HubError;
use crate::frame::Frame;
use crate::message::{ClientId, Message};

/// Counters kept by the control loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Current number of registered clients.
    pub members: usize,
    /// Broadcast requests processed.
    pub broadcasts: u64,
    /// Frames placed into a member's outbox.
    pub delivered: u64,
    /// Frames discarded under [`OverflowPolicy::DropNewest`].
    pub dropped: u64,
    /// Members removed because their outbox was full.
    pub evicted: u64,
}

enum Command {
    Register(ClientHandle),
    Unregister {
        id: ClientId,
        /// `None` removes whoever holds the id.
        serial: Option<u64>,
    },
    Broadcast(Message),
    SendToOne {
        id: ClientId,
        payload: Bytes,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    Members(oneshot::Sender<Vec<ClientId>>),
    Stats(oneshot::Sender<HubStats>),
}

/// Handle to a running hub.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::Sender<Command>,
    config: Arc<HubConfig>,
    cancel: CancellationToken,
}

impl Hub {
    /// Starts the control loop. Must be called inside a tokio runtime.
    pub fn spawn(config: HubConfig) -> Self {
        let config = Arc::new(config.normalized());
        let (tx, rx) = mpsc::channel(config.control_queue_capacity);
        let cancel = CancellationToken::new();

        let control = ControlLoop {
            members: HashMap::new(),
            config: Arc::clone(&config),
            stats: HubStats::default(),
        };
        tokio::spawn(control.run(rx, cancel.clone()));

        Self { tx, config, cancel }
    }

    pub(crate) fn config(&self) -> &Arc<HubConfig> {
        &self.config
    }

    /// Registers a new connection under a freshly generated identity and
    /// starts its pumps.
    pub async fn connect<C: Connection>(&self, conn: C) -> Result<ClientHandle, HubError> {
        self.connect_as(ClientId::generate(), conn).await
    }

    /// Registers a connection under an identity chosen by the caller.
    ///
    /// If the identity is already a member, the previous client is replaced
    /// and closed.
    pub async fn connect_as<C: Connection>(
        &self,
        id: ClientId,
        conn: C,
    ) -> Result<ClientHandle, HubError> {
        let (handle, pending) = client::prepare(id, conn, &self.config);
        self.register(handle.clone()).await?;
        pending.start(self.clone());
        Ok(handle)
    }

    pub(crate) async fn register(&self, client: ClientHandle) -> Result<(), HubError> {
        self.submit(Command::Register(client)).await
    }

    /// Removes a client and closes it. Unknown ids are ignored, as is a hub
    /// that has already shut down.
    pub async fn unregister(&self, id: &ClientId) {
        let cmd = Command::Unregister {
            id: id.clone(),
            serial: None,
        };
        let _ = self.submit(cmd).await;
    }

    /// Unregister issued by a client's own pumps. Only removes the member if
    /// it is still the same connection.
    pub(crate) async fn unregister_instance(&self, id: &ClientId, serial: u64) {
        let cmd = Command::Unregister {
            id: id.clone(),
            serial: Some(serial),
        };
        let _ = self.submit(cmd).await;
    }

    /// Queues `message` for every member, subject to `echo_to_sender`.
    ///
    /// Returns once the request is queued; delivery is best-effort.
    pub async fn broadcast(&self, message: Message) -> Result<(), HubError> {
        self.submit(Command::Broadcast(message)).await
    }

    /// Queues `payload` for a single member.
    pub async fn send_to_one(
        &self,
        id: &ClientId,
        payload: impl Into<Bytes>,
    ) -> Result<(), HubError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::SendToOne {
            id: id.clone(),
            payload: payload.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| HubError::HubClosed)?
    }

    /// Number of registered clients, as of every request submitted before
    /// this one. Zero once the hub has shut down.
    pub async fn member_count(&self) -> usize {
        self.stats().await.members
    }

    /// Identities of the registered clients, sorted.
    pub async fn members(&self) -> Vec<ClientId> {
        let (reply, rx) = oneshot::channel();
        if self.submit(Command::Members(reply)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn stats(&self) -> HubStats {
        let (reply, rx) = oneshot::channel();
        if self.submit(Command::Stats(reply)).await.is_err() {
            return HubStats::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Stops the control loop and closes every member.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn submit(&self, cmd: Command) -> Result<(), HubError> {
        if self.cancel.is_cancelled() {
            return Err(HubError::HubClosed);
        }
        self.tx.send(cmd).await.map_err(|_| HubError::HubClosed)
    }
}

/// Outcome of offering one frame to one member.
enum Delivery {
    Queued,
    Dropped,
    Overflow,
    Gone,
}

struct ControlLoop {
    members: HashMap<ClientId, ClientHandle>,
    config: Arc<HubConfig>,
    stats: HubStats,
}

impl ControlLoop {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
        debug!("hub control loop started");

        loop {
            let cmd = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                cmd = rx.recv() => match cmd {
                    Some(cmd) => cmd,
                    None => break,
                },
            };
            self.handle(cmd);
        }

        rx.close();
        while let Ok(cmd) = rx.try_recv() {
            self.reject(cmd);
        }
        let count = self.members.len();
        for (_, client) in self.members.drain() {
            client.close();
        }
        info!(closed = count, "hub shut down");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Register(client) => self.register(client),
            Command::Unregister { id, serial } => self.unregister(&id, serial),
            Command::Broadcast(msg) => self.broadcast(&msg),
            Command::SendToOne { id, payload, reply } => {
                let _ = reply.send(self.send_to_one(id, payload));
            }
            Command::Members(reply) => {
                let mut ids: Vec<ClientId> = self.members.keys().cloned().collect();
                ids.sort();
                let _ = reply.send(ids);
            }
            Command::Stats(reply) => {
                let _ = reply.send(HubStats {
                    members: self.members.len(),
                    ..self.stats
                });
            }
        }
    }

    /// Answers requests that arrived after shutdown began.
    fn reject(&mut self, cmd: Command) {
        match cmd {
            Command::Register(client) => client.close(),
            Command::SendToOne { reply, .. } => {
                let _ = reply.send(Err(HubError::HubClosed));
            }
            Command::Members(reply) => {
                let _ = reply.send(Vec::new());
            }
            Command::Stats(reply) => {
                let _ = reply.send(HubStats::default());
            }
            Command::Unregister { .. } | Command::Broadcast(_) => {}
        }
    }

    fn register(&mut self, client: ClientHandle) {
        let id = client.id().clone();
        if let Some(old) = self.members.insert(id.clone(), client) {
            warn!(client = %id, "identity already registered, closing previous connection");
            old.close();
        }
        info!(client = %id, members = self.members.len(), "client registered");
    }

    fn unregister(&mut self, id: &ClientId, serial: Option<u64>) {
        let matches = self
            .members
            .get(id)
            .is_some_and(|c| serial.is_none_or(|s| s == c.serial()));
        if !matches {
            trace!(client = %id, "unregister: not a member");
            return;
        }
        if let Some(client) = self.members.remove(id) {
            client.close();
            info!(client = %id, members = self.members.len(), "client unregistered");
        }
    }

    fn broadcast(&mut self, msg: &Message) {
        self.stats.broadcasts += 1;
        let frame = Frame::Data(msg.payload().clone());
        let mut removed = Vec::new();

        for (id, client) in &self.members {
            if !self.config.echo_to_sender && id == msg.sender() {
                continue;
            }
            match offer(client, frame.clone(), self.config.overflow_policy) {
                Delivery::Queued => self.stats.delivered += 1,
                Delivery::Dropped => self.stats.dropped += 1,
                Delivery::Overflow => removed.push((id.clone(), true)),
                Delivery::Gone => removed.push((id.clone(), false)),
            }
        }

        trace!(
            sender = %msg.sender(),
            len = msg.payload().len(),
            members = self.members.len(),
            "broadcast processed"
        );

        for (id, overflowed) in removed {
            self.remove(&id, overflowed);
        }
    }

    fn send_to_one(&mut self, id: ClientId, payload: Bytes) -> Result<(), HubError> {
        let Some(client) = self.members.get(&id) else {
            return Err(HubError::ClientNotFound(id));
        };
        match offer(client, Frame::Data(payload), self.config.overflow_policy) {
            Delivery::Queued => self.stats.delivered += 1,
            Delivery::Dropped => self.stats.dropped += 1,
            Delivery::Overflow => self.remove(&id, true),
            Delivery::Gone => self.remove(&id, false),
        }
        Ok(())
    }

    fn remove(&mut self, id: &ClientId, overflowed: bool) {
        let Some(client) = self.members.remove(id) else {
            return;
        };
        client.close();
        if overflowed {
            self.stats.evicted += 1;
            warn!(
                client = %id,
                capacity = self.config.outbox_capacity,
                members = self.members.len(),
                "outbox full, evicted slow client"
            );
        } else {
            debug!(client = %id, members = self.members.len(), "outbox closed, client removed");
        }
    }
}

fn offer(client: &ClientHandle, frame: Frame, policy: OverflowPolicy) -> Delivery {
    match client.try_enqueue(frame) {
        Ok(()) => Delivery::Queued,
        Err(TrySendError::Full(_)) => match policy {
            OverflowPolicy::Evict => Delivery::Overflow,
            OverflowPolicy::DropNewest => {
                warn!(client = %client.id(), "outbox full, frame dropped");
                Delivery::Dropped
            }
        },
        Err(TrySendError::Closed(_)) => Delivery::Gone,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::{self, MemoryPeer};

    async fn join(hub: &Hub, name: &str) -> (ClientHandle, MemoryPeer) {
        let (conn, peer) = memory::pair(64);
        let client = hub.connect_as(ClientId::from(name), conn).await.unwrap();
        (client, peer)
    }

    async fn next_data(peer: &mut MemoryPeer) -> Option<Bytes> {
        tokio::time::timeout(Duration::from_secs(2), peer.recv_data())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn register_and_count() {
        let hub = Hub::spawn(HubConfig::default());
        assert_eq!(hub.member_count().await, 0);

        let _a = join(&hub, "a").await;
        let _b = join(&hub, "b").await;
        assert_eq!(hub.member_count().await, 2);
        assert_eq!(
            hub.members().await,
            vec![ClientId::from("a"), ClientId::from("b")]
        );
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member_once() {
        let hub = Hub::spawn(HubConfig::default());
        let (_a, mut pa) = join(&hub, "a").await;
        let (_b, mut pb) = join(&hub, "b").await;
        let (_c, mut pc) = join(&hub, "c").await;

        hub.broadcast(Message::new(ClientId::from("server"), "hello"))
            .await
            .unwrap();

        for peer in [&mut pa, &mut pb, &mut pc] {
            assert_eq!(next_data(peer).await, Some(Bytes::from("hello")));
            assert!(peer.try_recv().is_none());
        }
        assert_eq!(hub.stats().await.delivered, 3);
    }

    #[tokio::test]
    async fn inbound_data_is_broadcast_with_echo() {
        let hub = Hub::spawn(HubConfig::default());
        let (_a, mut pa) = join(&hub, "a").await;
        let (_b, mut pb) = join(&hub, "b").await;

        pa.send_data("from a").await.unwrap();
        assert_eq!(next_data(&mut pb).await, Some(Bytes::from("from a")));
        assert_eq!(next_data(&mut pa).await, Some(Bytes::from("from a")));
    }

    #[tokio::test]
    async fn sender_excluded_without_echo() {
        let hub = Hub::spawn(HubConfig {
            echo_to_sender: false,
            ..HubConfig::default()
        });
        let (_a, mut pa) = join(&hub, "a").await;
        let (_b, mut pb) = join(&hub, "b").await;

        hub.broadcast(Message::new(ClientId::from("a"), "x")).await.unwrap();
        hub.broadcast(Message::new(ClientId::from("b"), "y")).await.unwrap();

        assert_eq!(next_data(&mut pb).await, Some(Bytes::from("x")));
        assert_eq!(next_data(&mut pa).await, Some(Bytes::from("y")));
    }

    #[tokio::test]
    async fn unregistered_client_misses_later_broadcasts() {
        let hub = Hub::spawn(HubConfig::default());
        let (a, mut pa) = join(&hub, "a").await;
        let (_b, mut pb) = join(&hub, "b").await;

        hub.unregister(a.id()).await;
        hub.broadcast(Message::new(ClientId::from("server"), "x"))
            .await
            .unwrap();

        assert_eq!(next_data(&mut pb).await, Some(Bytes::from("x")));
        a.wait_closed().await;
        assert_eq!(pa.recv_data().await, None);
        assert_eq!(hub.member_count().await, 1);
    }

    #[tokio::test]
    async fn double_unregister_is_harmless() {
        let hub = Hub::spawn(HubConfig::default());
        let (a, _pa) = join(&hub, "a").await;
        let (_b, _pb) = join(&hub, "b").await;

        hub.unregister(a.id()).await;
        hub.unregister(a.id()).await;
        hub.unregister(&ClientId::from("never-joined")).await;
        a.wait_closed().await;

        assert_eq!(hub.member_count().await, 1);
    }

    #[tokio::test]
    async fn send_to_unknown_client_fails_without_side_effects() {
        let hub = Hub::spawn(HubConfig::default());
        let (_a, mut pa) = join(&hub, "a").await;

        let err = hub
            .send_to_one(&ClientId::from("nonexistent-id"), "payload")
            .await
            .unwrap_err();
        assert_eq!(err, HubError::ClientNotFound(ClientId::from("nonexistent-id")));

        assert_eq!(hub.member_count().await, 1);
        assert!(pa.try_recv().is_none());
        assert_eq!(hub.stats().await.delivered, 0);
    }

    #[tokio::test]
    async fn send_to_one_targets_single_member() {
        let hub = Hub::spawn(HubConfig::default());
        let (a, mut pa) = join(&hub, "a").await;
        let (_b, mut pb) = join(&hub, "b").await;

        hub.send_to_one(a.id(), "dm").await.unwrap();
        assert_eq!(next_data(&mut pa).await, Some(Bytes::from("dm")));

        // A later broadcast is the first thing b sees.
        hub.broadcast(Message::new(ClientId::from("server"), "all"))
            .await
            .unwrap();
        assert_eq!(next_data(&mut pb).await, Some(Bytes::from("all")));
    }

    #[tokio::test]
    async fn duplicate_identity_replaces_and_closes_old() {
        let hub = Hub::spawn(HubConfig::default());
        let (old, old_peer) = join(&hub, "dup").await;
        let (new, mut new_peer) = join(&hub, "dup").await;

        old.wait_closed().await;
        assert_eq!(old_peer.close_count(), 1);

        // The old pumps' unregister must not remove the new connection.
        assert_eq!(hub.member_count().await, 1);
        assert_eq!(new.state(), crate::ClientState::Active);
        hub.send_to_one(new.id(), "still here").await.unwrap();
        assert_eq!(next_data(&mut new_peer).await, Some(Bytes::from("still here")));
    }

    #[tokio::test]
    async fn per_client_order_is_fifo() {
        let hub = Hub::spawn(HubConfig::default());
        let (a, mut pa) = join(&hub, "a").await;

        for i in 0..20 {
            if i % 2 == 0 {
                hub.send_to_one(a.id(), format!("{i}")).await.unwrap();
            } else {
                hub.broadcast(Message::new(ClientId::from("s"), format!("{i}")))
                    .await
                    .unwrap();
            }
        }
        for i in 0..20 {
            assert_eq!(next_data(&mut pa).await, Some(Bytes::from(format!("{i}"))));
        }
    }

    #[tokio::test]
    async fn drop_newest_keeps_slow_client() {
        let hub = Hub::spawn(HubConfig {
            outbox_capacity: 1,
            overflow_policy: OverflowPolicy::DropNewest,
            ..HubConfig::default()
        });
        // Peer buffer of 1 and nobody reading: the pump stalls quickly.
        let (conn, _peer) = memory::pair(1);
        let slow = hub.connect(conn).await.unwrap();

        for i in 0..10 {
            hub.broadcast(Message::new(ClientId::from("s"), format!("{i}")))
                .await
                .unwrap();
        }

        let stats = hub.stats().await;
        assert_eq!(stats.members, 1);
        assert_eq!(stats.evicted, 0);
        assert!(stats.dropped > 0);
        assert_eq!(slow.state(), crate::ClientState::Active);
    }

    #[tokio::test]
    async fn third_message_into_full_outbox_evicts() {
        let config = HubConfig {
            outbox_capacity: 2,
            ..HubConfig::default()
        };
        let hub = Hub::spawn(config.clone());
        // Registered without pumps, so nothing ever drains the outbox.
        let (conn, _peer) = memory::pair(4);
        let (slow, _pending) = client::prepare(ClientId::from("a"), conn, &config);
        hub.register(slow.clone()).await.unwrap();

        let server = ClientId::from("server");
        hub.broadcast(Message::new(server.clone(), "m1")).await.unwrap();
        assert_eq!(hub.member_count().await, 1);
        hub.broadcast(Message::new(server.clone(), "m2")).await.unwrap();
        assert_eq!(hub.member_count().await, 1);
        hub.broadcast(Message::new(server, "m3")).await.unwrap();
        assert_eq!(hub.member_count().await, 0);

        let stats = hub.stats().await;
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.evicted, 1);
        assert_ne!(slow.state(), crate::ClientState::Active);
    }

    #[tokio::test]
    async fn shutdown_closes_members_and_rejects_requests() {
        let hub = Hub::spawn(HubConfig::default());
        let (a, pa) = join(&hub, "a").await;

        hub.shutdown();
        a.wait_closed().await;

        assert_eq!(pa.close_count(), 1);
        assert!(hub.is_shut_down());
        assert_eq!(hub.member_count().await, 0);
        assert_eq!(
            hub.broadcast(Message::new(ClientId::from("s"), "x")).await,
            Err(HubError::HubClosed)
        );
        let (conn, _peer) = memory::pair(4);
        assert!(matches!(hub.connect(conn).await, Err(HubError::HubClosed)));
    }
}
