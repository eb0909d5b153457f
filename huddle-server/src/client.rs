//! WebSocket chat client.
//!
//! Speaks the same envelope protocol as the server. It has no UI: received
//! envelopes surface as [`ChatEvent`]s on a channel. The integration tests
//! drive the server with it.

use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientEnvelope, DecodeError, ServerEnvelope, BROADCAST_RECIPIENT};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the chat client.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Connection established
    Connected,
    /// Envelope received from the server
    Envelope(ServerEnvelope),
    /// Frame the client could not decode
    Malformed(DecodeError),
    /// Connection lost or closed
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("client is not connected")]
    NotConnected,
}

pub struct ChatClient {
    state: Arc<RwLock<ConnectionState>>,
    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::UnboundedSender<Message>>,
    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<ChatEvent>>,
    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<ChatEvent>,
    server_url: String,
}

impl ChatClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ChatEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server and spawn the reader and writer tasks.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(&self.server_url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward the outgoing channel to the socket
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if ws_writer.send(msg).await.is_err() || closing {
                    break;
                }
            }
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(ChatEvent::Connected).await;

        // Reader task: decode server envelopes into events
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let event = match msg {
                    Ok(Message::Text(text)) => match ServerEnvelope::decode(text.as_str()) {
                        Ok(envelope) => ChatEvent::Envelope(envelope),
                        Err(e) => {
                            log::warn!("Undecodable frame from server: {e}");
                            ChatEvent::Malformed(e)
                        }
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => continue,
                };
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(ChatEvent::Disconnected).await;
        });

        Ok(())
    }

    pub async fn register(
        &self,
        name: impl Into<String>,
        color: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.send(&ClientEnvelope::register(name, color))
    }

    /// Send to everyone.
    pub async fn broadcast(&self, content: impl Into<String>) -> Result<(), ClientError> {
        self.send(&ClientEnvelope::message(content, BROADCAST_RECIPIENT))
    }

    /// Send to one named participant.
    pub async fn send_private(
        &self,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.send(&ClientEnvelope::message(content, recipient))
    }

    pub fn send(&self, envelope: &ClientEnvelope) -> Result<(), ClientError> {
        self.send_raw(envelope.encode())
    }

    /// Send an arbitrary text frame, well-formed or not.
    pub fn send_raw(&self, text: impl Into<String>) -> Result<(), ClientError> {
        let tx = self.outgoing_tx.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(Message::text(text.into()))
            .map_err(|_| ClientError::NotConnected)
    }

    /// Start the closing handshake.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        let tx = self.outgoing_tx.take().ok_or(ClientError::NotConnected)?;
        tx.send(Message::Close(None))
            .map_err(|_| ClientError::NotConnected)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_starts_disconnected() {
        let mut client = ChatClient::new("ws://127.0.0.1:1");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
        assert_eq!(client.server_url(), "ws://127.0.0.1:1");
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let client = ChatClient::new("ws://127.0.0.1:1");
        assert!(matches!(
            client.broadcast("hi").await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(client.send_raw("{}"), Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = ChatClient::new(format!("ws://127.0.0.1:{port}"));
        assert!(matches!(client.connect().await, Err(ClientError::Connect(_))));
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }
}
