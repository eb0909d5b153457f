//! Connection registry: live connections and the participants bound to them.
//!
//! The registry is the only record of who is online. It is owned by the
//! [`Hub`](crate::hub::Hub) and mutated only there; the router and the
//! presence broadcaster borrow it read-only.
//!
//! Two tables are kept:
//! - every attached connection and its outbox, bound or not;
//! - the bindings, in registration order, which is also roster order.

use std::collections::HashMap;
use indexmap::IndexMap;
use uuid::Uuid;

use crate::delivery::Outbox;
use crate::protocol::RosterEntry;

/// Opaque handle for one live transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered identity bound to exactly one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub name: String,
    pub color: String,
    pub connection: ConnectionId,
}

impl Participant {
    pub fn roster_entry(&self) -> RosterEntry {
        RosterEntry::new(self.name.clone(), self.color.clone())
    }
}

/// Live connections and their participant bindings.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Every attached connection → its outbound queue
    connections: HashMap<ConnectionId, Outbox>,
    /// Bound connections, in registration order
    participants: IndexMap<ConnectionId, Participant>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a connection. Returns `false` if it was already attached.
    pub fn attach(&mut self, connection: ConnectionId, outbox: Outbox) -> bool {
        if self.connections.contains_key(&connection) {
            return false;
        }
        self.connections.insert(connection, outbox);
        true
    }

    /// Stop tracking a connection, dropping its outbox and any binding.
    ///
    /// Returns the participant that was bound to it, if any.
    pub fn detach(&mut self, connection: ConnectionId) -> Option<Participant> {
        let participant = self.unbind(connection);
        self.connections.remove(&connection);
        participant
    }

    /// Bind a participant identity to a connection.
    ///
    /// Never checks name uniqueness. Rebinding a bound connection replaces
    /// the old binding and moves it to the end of the roster.
    pub fn bind(
        &mut self,
        connection: ConnectionId,
        name: impl Into<String>,
        color: impl Into<String>,
    ) -> Participant {
        let participant = Participant {
            name: name.into(),
            color: color.into(),
            connection,
        };
        self.participants.shift_remove(&connection);
        self.participants.insert(connection, participant.clone());
        participant
    }

    /// Remove a binding. No-op for unbound or unknown connections.
    pub fn unbind(&mut self, connection: ConnectionId) -> Option<Participant> {
        // shift_remove keeps the remaining roster in registration order
        self.participants.shift_remove(&connection)
    }

    /// Current roster in registration order.
    pub fn snapshot(&self) -> Vec<RosterEntry> {
        self.participants
            .values()
            .map(Participant::roster_entry)
            .collect()
    }

    /// First connection, in registration order, bound to `name`.
    ///
    /// With duplicate names the earliest registration wins.
    pub fn lookup_by_name(&self, name: &str) -> Option<ConnectionId> {
        self.participants
            .values()
            .find(|p| p.name == name)
            .map(|p| p.connection)
    }

    pub fn participant(&self, connection: ConnectionId) -> Option<&Participant> {
        self.participants.get(&connection)
    }

    /// Bound participants in registration order.
    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn outbox(&self, connection: ConnectionId) -> Option<&Outbox> {
        self.connections.get(&connection)
    }

    pub fn is_attached(&self, connection: ConnectionId) -> bool {
        self.connections.contains_key(&connection)
    }

    pub fn is_bound(&self, connection: ConnectionId) -> bool {
        self.participants.contains_key(&connection)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
