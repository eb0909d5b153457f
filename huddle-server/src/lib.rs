//! # huddle-server: Real-time group chat over WebSocket
//!
//! Tracks who is online, routes broadcast and private messages, and keeps
//! every participant's roster in sync.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   JSON text frames   ┌──────────────┐
//! │ ChatClient  │ ◄──────────────────► │ ChatServer   │
//! │ (per user)  │                      │ (conn tasks) │
//! └─────────────┘                      └──────┬───────┘
//!                                             │ TransportEvent (ordered)
//!                                             ▼
//!                                      ┌──────────────┐
//!                                      │ Hub          │
//!                                      │ (lifecycle)  │
//!                                      └──────┬───────┘
//!                          ┌──────────────────┼──────────────────┐
//!                          ▼                  ▼                  ▼
//!                   ┌────────────┐    ┌──────────────┐   ┌──────────────┐
//!                   │ Registry   │    │ MessageRouter│   │ Presence     │
//!                   │ (who/where)│    │ (all / one)  │   │ (users_list) │
//!                   └────────────┘    └──────┬───────┘   └──────┬───────┘
//!                                            └──────► Fanout ◄──┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON envelope codec
//! - [`registry`]: connections and participant bindings
//! - [`delivery`]: outboxes and encode-once fan-out
//! - [`router`]: broadcast vs. directed routing
//! - [`presence`]: join/leave announcements and roster resync
//! - [`hub`]: per-connection lifecycle, single point of mutation
//! - [`server`]: TCP/WebSocket transport and configuration
//! - [`client`]: WebSocket client for the same protocol

pub mod protocol;
pub mod registry;
pub mod delivery;
pub mod router;
pub mod presence;
pub mod hub;
pub mod stats;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use protocol::{
    ClientEnvelope, DecodeError, EnvelopeKind, RosterEntry, ServerEnvelope,
    BROADCAST_RECIPIENT, DEFAULT_COLOR,
};
pub use registry::{ConnectionId, ConnectionRegistry, Participant};
pub use delivery::{DeliveryFailure, Fanout, Frame, Outbox};
pub use router::{MessageRouter, Recipient, RouteError, RouteOutcome};
pub use presence::PresenceBroadcaster;
pub use hub::{
    ConnectionPhase, FrameOutcome, Hub, HubError, NamePolicy, RegistrationError,
    TransportEvent,
};
pub use stats::{Counters, ServerStats};
pub use server::{ChatServer, ConfigError, ServerConfig, ServerError};
pub use client::{ChatClient, ChatEvent, ClientError, ConnectionState};
