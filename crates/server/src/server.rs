//! Hub WebSocket server.
//!
//! Listens on a TCP address, upgrades every accepted stream to WebSocket, and
//! registers it with the hub. The server holds no per-client state of its own.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

use relayhub::Hub;

use crate::ws::WsConnection;
use crate::{ServerError, WS_MAX_MESSAGE_SIZE};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (port 0 = OS-assigned).
    pub bind: SocketAddr,
    /// Largest accepted WebSocket message, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: ([0, 0, 0, 0], 0).into(),
            max_message_size: WS_MAX_MESSAGE_SIZE,
        }
    }
}

/// Accepts WebSocket clients and hands them to a [`Hub`].
pub struct HubServer {
    config: ServerConfig,
    hub: Hub,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl HubServer {
    pub fn new(config: ServerConfig, hub: Hub) -> Arc<Self> {
        Arc::new(Self {
            config,
            hub,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Stops accepting and shuts the hub down, closing every client.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the accept loop until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("hub server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    self.hub.shutdown();
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::warn!(%peer_addr, "connection rejected: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Upgrades a TCP stream and registers it with the hub.
    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_message_size);
        ws_config.max_frame_size = Some(self.config.max_message_size);

        let ws_stream = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            ws = accept_async_with_config(stream, Some(ws_config)) => ws?,
        };

        let client = self.hub.connect(WsConnection::new(ws_stream)).await?;
        tracing::info!(%peer_addr, client = %client.id(), "WebSocket client accepted");
        Ok(())
    }
}
