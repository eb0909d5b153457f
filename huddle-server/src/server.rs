//! WebSocket chat server.
//!
//! Architecture:
//! ```text
//! Client A ── conn task ──┐                       ┌── outbox A ──► conn task A
//!                          ├── TransportEvent ──► Hub ─┤
//! Client B ── conn task ──┘   (ordered mpsc)      └── outbox B ──► conn task B
//! ```
//!
//! Each accepted socket gets its own task that forwards inbound text frames
//! to the dispatcher and drains its outbox back to the socket. The
//! dispatcher task owns the [`Hub`] and applies events strictly in arrival
//! order, so the registry needs no lock.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::delivery::{Frame, Outbox};
use crate::hub::{Hub, NamePolicy, TransportEvent};
use crate::registry::ConnectionId;
use crate::stats::{Counters, ServerStats};

pub const ENV_BIND_ADDR: &str = "HUDDLE_BIND_ADDR";
pub const ENV_PORT: &str = "HUDDLE_PORT";
pub const ENV_NAME_POLICY: &str = "HUDDLE_NAME_POLICY";
pub const ENV_MAX_MESSAGE_BYTES: &str = "HUDDLE_MAX_MESSAGE_BYTES";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Whether live participants may share a name
    pub name_policy: NamePolicy,
    /// Largest accepted WebSocket message
    pub max_message_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            name_policy: NamePolicy::default(),
            max_message_bytes: 64 * 1024,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `HUDDLE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    ///
    /// `HUDDLE_BIND_ADDR` wins over `HUDDLE_PORT`, which only replaces the
    /// port of the default address.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = lookup(ENV_BIND_ADDR) {
            config.bind_addr = addr;
        } else if let Some(port) = lookup(ENV_PORT) {
            let port: u16 = port.trim().parse().map_err(|e| ConfigError::Invalid {
                var: ENV_PORT,
                reason: format!("{e}"),
            })?;
            let host = config
                .bind_addr
                .rsplit_once(':')
                .map_or("127.0.0.1", |(host, _)| host);
            config.bind_addr = format!("{host}:{port}");
        }

        if let Some(policy) = lookup(ENV_NAME_POLICY) {
            config.name_policy = policy.parse().map_err(|reason| ConfigError::Invalid {
                var: ENV_NAME_POLICY,
                reason,
            })?;
        }

        if let Some(max) = lookup(ENV_MAX_MESSAGE_BYTES) {
            config.max_message_bytes = match max.trim().parse::<usize>() {
                Ok(0) => {
                    return Err(ConfigError::Invalid {
                        var: ENV_MAX_MESSAGE_BYTES,
                        reason: "must be greater than zero".to_string(),
                    })
                }
                Ok(n) => n,
                Err(e) => {
                    return Err(ConfigError::Invalid {
                        var: ENV_MAX_MESSAGE_BYTES,
                        reason: format!("{e}"),
                    })
                }
            };
        }

        Ok(config)
    }

    fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_message_bytes))
            .max_frame_size(Some(self.max_message_bytes))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("dispatcher has shut down")]
    DispatcherClosed,
}

/// The chat server.
pub struct ChatServer {
    config: ServerConfig,
    counters: Arc<Counters>,
}

impl ChatServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            counters: Arc::new(Counters::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the task is dropped.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.bind_addr.clone(),
                source,
            })?;
        log::info!("Chat server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    ///
    /// Spawns the dispatcher that owns this run's registry; the registry
    /// lives exactly as long as this call.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let hub = Hub::new(self.config.name_policy, self.counters.clone());
        tokio::spawn(dispatch(hub, events_rx));

        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::error!("Failed to accept connection: {e}");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
            };
            log::debug!("New TCP connection from {addr}");

            let events = events_tx.clone();
            let counters = self.counters.clone();
            let ws_config = self.config.websocket_config();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, events, counters, ws_config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    pub fn stats(&self) -> ServerStats {
        self.counters.snapshot()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Apply transport events to the hub, one at a time.
async fn dispatch(mut hub: Hub, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        hub.handle(event);
    }
    log::debug!("Dispatcher stopped");
}

/// Upgrade one socket and run it until either side closes.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    events: mpsc::UnboundedSender<TransportEvent>,
    counters: Arc<Counters>,
    ws_config: WebSocketConfig,
) -> Result<(), ServerError> {
    let ws_stream = tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)).await?;

    let connection = ConnectionId::new();
    let (outbox, outbox_rx) = Outbox::channel();
    events
        .send(TransportEvent::Opened { connection, outbox })
        .map_err(|_| ServerError::DispatcherClosed)?;
    counters.connection_opened();
    log::info!("WebSocket connection {connection} established from {addr}");

    let result = pump(ws_stream, connection, &events, outbox_rx).await;

    // Closed must follow Opened even when the socket failed
    let _ = events.send(TransportEvent::Closed { connection });
    counters.connection_closed();
    log::info!("Connection {connection} from {addr} closed");
    result
}

async fn pump(
    ws_stream: WebSocketStream<TcpStream>,
    connection: ConnectionId,
    events: &mpsc::UnboundedSender<TransportEvent>,
    mut outbox_rx: mpsc::UnboundedReceiver<Frame>,
) -> Result<(), ServerError> {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let frame = TransportEvent::Frame {
                            connection,
                            payload: text.as_str().to_owned(),
                        };
                        events.send(frame).map_err(|_| ServerError::DispatcherClosed)?;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        log::warn!("Ignoring {}-byte binary frame from {connection}", data.len());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }

            frame = outbox_rx.recv() => {
                match frame {
                    Some(frame) => ws_sender.send(Message::text(frame.to_string())).await?,
                    // The hub dropped our outbox
                    None => break,
                }
            }
        }
    }

    Ok(())
}
