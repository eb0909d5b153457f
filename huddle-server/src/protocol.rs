//! JSON envelope protocol spoken over WebSocket text frames.
//!
//! Wire format (one envelope per frame):
//! ```text
//! client → server   {"type":"register","name":"Alice","color":"red"}
//!                   {"type":"message","content":"hi","recipient":"all"}
//! server → client   {"type":"message","name":"Alice","content":"hi","color":"red"}
//!                   {"type":"system","content":"..."}
//!                   {"type":"private","name":"Alice","content":"...","color":"red","recipient":"Bob"}
//!                   {"type":"users_list","users":[{"name":"Alice","color":"red"}]}
//! ```
//!
//! Envelopes are split by direction: [`ClientEnvelope`] is what the server
//! accepts, [`ServerEnvelope`] is what it emits. Both carry the same `type`
//! discriminator so a frame can be classified before its body is parsed.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Recipient value that selects a full broadcast.
pub const BROADCAST_RECIPIENT: &str = "all";

/// Color assigned when a registration carries none.
pub const DEFAULT_COLOR: &str = "black";

/// Every `type` discriminator known to the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Register,
    Message,
    System,
    Private,
    UsersList,
}

impl EnvelopeKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "register" => Some(Self::Register),
            "message" => Some(Self::Message),
            "system" => Some(Self::System),
            "private" => Some(Self::Private),
            "users_list" => Some(Self::UsersList),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Message => "message",
            Self::System => "system",
            Self::Private => "private",
            Self::UsersList => "users_list",
        }
    }

    /// Whether a client may send this kind.
    pub fn is_client_sent(self) -> bool {
        matches!(self, Self::Register | Self::Message)
    }

    /// Whether the server may send this kind.
    pub fn is_server_sent(self) -> bool {
        !matches!(self, Self::Register)
    }
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the roster as it appears in `users_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    pub color: String,
}

impl RosterEntry {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
        }
    }
}

/// Envelopes a client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Identity handshake; must be the first frame on a connection.
    Register {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
    /// Chat message; `recipient` absent, empty or `"all"` means broadcast.
    Message {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient: Option<String>,
    },
}

impl ClientEnvelope {
    pub fn register(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self::Register {
            name: name.into(),
            color: Some(color.into()),
        }
    }

    pub fn message(content: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self::Message {
            content: content.into(),
            recipient: Some(recipient.into()),
        }
    }

    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Register { .. } => EnvelopeKind::Register,
            Self::Message { .. } => EnvelopeKind::Message,
        }
    }

    /// Parse an inbound text frame.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        decode_tagged(raw, EnvelopeKind::is_client_sent)
    }

    pub fn encode(&self) -> String {
        // String-only payloads: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Envelopes the server sends to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// Broadcast chat line.
    Message {
        name: String,
        content: String,
        color: String,
    },
    /// Server notice (welcome, join/leave, rejections, confirmations).
    System { content: String },
    /// Directed message, delivered to the recipient only.
    Private {
        name: String,
        content: String,
        color: String,
        recipient: String,
    },
    /// Full roster replacement.
    UsersList { users: Vec<RosterEntry> },
}

impl ServerEnvelope {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn chat(
        name: impl Into<String>,
        content: impl Into<String>,
        color: impl Into<String>,
    ) -> Self {
        Self::Message {
            name: name.into(),
            content: content.into(),
            color: color.into(),
        }
    }

    pub fn private(
        name: impl Into<String>,
        content: impl Into<String>,
        color: impl Into<String>,
        recipient: impl Into<String>,
    ) -> Self {
        Self::Private {
            name: name.into(),
            content: content.into(),
            color: color.into(),
            recipient: recipient.into(),
        }
    }

    pub fn users_list(users: Vec<RosterEntry>) -> Self {
        Self::UsersList { users }
    }

    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Message { .. } => EnvelopeKind::Message,
            Self::System { .. } => EnvelopeKind::System,
            Self::Private { .. } => EnvelopeKind::Private,
            Self::UsersList { .. } => EnvelopeKind::UsersList,
        }
    }

    pub fn encode(&self) -> String {
        // String-only payloads: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse a frame received from the server.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        decode_tagged(raw, EnvelopeKind::is_server_sent)
    }
}

/// Classify a frame by its `type` tag, then parse the body.
fn decode_tagged<T: DeserializeOwned>(
    raw: &str,
    accepts: impl Fn(EnvelopeKind) -> bool,
) -> Result<T, DecodeError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    let Value::Object(ref fields) = value else {
        return Err(DecodeError::InvalidJson("expected a JSON object".to_string()));
    };

    let tag = match fields.get("type") {
        Some(Value::String(tag)) => tag.as_str(),
        _ => return Err(DecodeError::MissingType),
    };

    let kind = EnvelopeKind::from_tag(tag).ok_or_else(|| DecodeError::UnknownType(tag.to_string()))?;
    if !accepts(kind) {
        return Err(DecodeError::UnexpectedKind(kind));
    }

    serde_json::from_value(value).map_err(|e| DecodeError::InvalidShape {
        kind,
        reason: e.to_string(),
    })
}

/// Why an inbound frame could not be turned into an envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("envelope has no `type` discriminator")]
    MissingType,
    #[error("unknown envelope type `{0}`")]
    UnknownType(String),
    #[error("envelope type `{0}` is not accepted in this direction")]
    UnexpectedKind(EnvelopeKind),
    #[error("malformed `{kind}` envelope: {reason}")]
    InvalidShape { kind: EnvelopeKind, reason: String },
}
