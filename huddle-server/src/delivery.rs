//! Best-effort fan-out of server envelopes to connection outboxes.
//!
//! Each connection owns an unbounded outbox drained by its transport task.
//! Pushing never blocks, so a slow peer cannot stall the dispatcher. An
//! envelope is encoded once and the frame shared by every target.
//!
//! A failed push means the transport task is gone. It is logged and counted,
//! and delivery to the remaining targets carries on.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::protocol::ServerEnvelope;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::stats::Counters;

/// Encoded text frame, shared between all targets of one delivery.
pub type Frame = Arc<str>;

/// Sending half of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Frame>,
}

impl Outbox {
    /// Create an outbox and the receiver its transport task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a frame. Returns `false` if the receiving side is gone.
    pub fn push(&self, frame: Frame) -> bool {
        self.tx.send(frame).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A write that could not be queued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryFailure {
    #[error("connection {0} is not attached")]
    Detached(ConnectionId),
    #[error("outbox of connection {0} is closed")]
    Closed(ConnectionId),
}

/// Encodes envelopes and queues them on registry outboxes.
pub struct Fanout {
    counters: Arc<Counters>,
}

impl Fanout {
    pub fn new(counters: Arc<Counters>) -> Self {
        Self { counters }
    }

    /// Deliver to one connection, bound or not.
    pub fn send_to(
        &self,
        registry: &ConnectionRegistry,
        target: ConnectionId,
        envelope: &ServerEnvelope,
    ) -> Result<(), DeliveryFailure> {
        let frame: Frame = envelope.encode().into();
        self.push(registry, target, frame)
    }

    /// Deliver to every registered connection except `exclude`.
    ///
    /// Returns the number of outboxes that accepted the frame.
    pub fn broadcast(
        &self,
        registry: &ConnectionRegistry,
        envelope: &ServerEnvelope,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let frame: Frame = envelope.encode().into();
        self.broadcast_frame(registry, frame, exclude)
    }

    /// Broadcast a pre-encoded frame.
    pub fn broadcast_frame(
        &self,
        registry: &ConnectionRegistry,
        frame: Frame,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let mut accepted = 0;
        for participant in registry.participants() {
            if Some(participant.connection) == exclude {
                continue;
            }
            if self.push(registry, participant.connection, frame.clone()).is_ok() {
                accepted += 1;
            }
        }
        accepted
    }

    fn push(
        &self,
        registry: &ConnectionRegistry,
        target: ConnectionId,
        frame: Frame,
    ) -> Result<(), DeliveryFailure> {
        let Some(outbox) = registry.outbox(target) else {
            self.counters.delivery_failed();
            log::warn!("Dropping frame for detached connection {target}");
            return Err(DeliveryFailure::Detached(target));
        };

        if outbox.push(frame) {
            self.counters.delivered(1);
            Ok(())
        } else {
            self.counters.delivery_failed();
            log::warn!("Outbox of connection {target} is closed, frame dropped");
            Err(DeliveryFailure::Closed(target))
        }
    }
}
