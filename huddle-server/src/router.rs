//! Chat message routing: broadcast or directed delivery.
//!
//! ```text
//! message{content, recipient}
//!       │
//!       ├── sender unbound ─────────► system "register first" → sender
//!       │
//!       ├── recipient "all" / none ─► message{name,content,color} → everyone
//!       │
//!       └── recipient <name>
//!               ├── found ──────────► private{…} → recipient
//!               │                     system confirmation → sender
//!               └── not found ──────► system "not found" → sender
//! ```

use crate::delivery::Fanout;
use crate::protocol::{ServerEnvelope, BROADCAST_RECIPIENT};
use crate::registry::{ConnectionId, ConnectionRegistry};

/// Who a chat message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient<'a> {
    Everyone,
    Named(&'a str),
}

impl<'a> Recipient<'a> {
    /// Absent, empty and `"all"` all mean broadcast.
    pub fn parse(raw: Option<&'a str>) -> Self {
        match raw {
            None | Some("") | Some(BROADCAST_RECIPIENT) => Self::Everyone,
            Some(name) => Self::Named(name),
        }
    }
}

/// What a successfully routed message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Broadcast accepted by `delivered` outboxes, sender included.
    Broadcast { delivered: usize },
    /// Directed message queued for `recipient`.
    Direct { recipient: ConnectionId },
}

/// Why a message was not routed. The sender has already been notified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("sender has not registered")]
    UnregisteredSender,
    #[error("recipient `{0}` not found")]
    RecipientNotFound(String),
}

pub const REGISTER_FIRST: &str = "Please register first!";

pub fn not_found_notice(recipient: &str) -> String {
    format!("User {recipient} not found or disconnected")
}

pub fn private_confirmation(recipient: &str, content: &str) -> String {
    format!("Private message to {recipient}: \"{content}\"")
}

/// Routes inbound `message` envelopes against a read-only registry.
pub struct MessageRouter<'a> {
    registry: &'a ConnectionRegistry,
    fanout: &'a Fanout,
}

impl<'a> MessageRouter<'a> {
    pub fn new(registry: &'a ConnectionRegistry, fanout: &'a Fanout) -> Self {
        Self { registry, fanout }
    }

    pub fn route(
        &self,
        sender: ConnectionId,
        content: &str,
        recipient: Option<&str>,
    ) -> Result<RouteOutcome, RouteError> {
        let Some(from) = self.registry.participant(sender) else {
            self.notify(sender, REGISTER_FIRST);
            return Err(RouteError::UnregisteredSender);
        };

        match Recipient::parse(recipient) {
            Recipient::Everyone => {
                let chat = ServerEnvelope::chat(&from.name, content, &from.color);
                let delivered = self.fanout.broadcast(self.registry, &chat, None);
                log::debug!("{} broadcast to {delivered} participants", from.name);
                Ok(RouteOutcome::Broadcast { delivered })
            }
            Recipient::Named(name) => {
                // An unreachable recipient is reported the same as a missing one
                let target = self.registry.lookup_by_name(name).and_then(|target| {
                    let private = ServerEnvelope::private(&from.name, content, &from.color, name);
                    self.fanout
                        .send_to(self.registry, target, &private)
                        .ok()
                        .map(|()| target)
                });

                match target {
                    Some(target) => {
                        self.notify(sender, &private_confirmation(name, content));
                        log::debug!("Private message from {} to {name}", from.name);
                        Ok(RouteOutcome::Direct { recipient: target })
                    }
                    None => {
                        self.notify(sender, &not_found_notice(name));
                        Err(RouteError::RecipientNotFound(name.to_string()))
                    }
                }
            }
        }
    }

    fn notify(&self, target: ConnectionId, content: &str) {
        // Failures are already logged and counted by the fan-out
        let _ = self
            .fanout
            .send_to(self.registry, target, &ServerEnvelope::system(content));
    }
}
