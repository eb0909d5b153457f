//! Presence: join/leave announcements and full roster resync.
//!
//! Every change republishes the complete roster as `users_list` rather than
//! a delta, so clients only ever replace their view. The cost is
//! O(participants) frames per join or leave.
//!
//! Join sequence:
//! ```text
//! new connection   ◄── system  welcome
//! others           ◄── system  "<name> joined the chat"
//! everyone         ◄── users_list
//! ```
//! Leave sequence:
//! ```text
//! remaining        ◄── system  "<name> left the chat"
//! remaining        ◄── users_list
//! ```

use crate::delivery::Fanout;
use crate::protocol::ServerEnvelope;
use crate::registry::{ConnectionRegistry, Participant};

/// Welcome text for a participant who has just registered.
///
/// `others` are the names already online, in registration order.
pub fn welcome_text(was_empty: bool, others: &[&str]) -> String {
    if was_empty || others.is_empty() {
        "Welcome! You are the first one here.".to_string()
    } else {
        format!("Welcome! Already here: {}.", others.join(", "))
    }
}

pub fn join_text(name: &str) -> String {
    format!("{name} joined the chat")
}

pub fn leave_text(name: &str) -> String {
    format!("{name} left the chat")
}

/// Publishes presence changes to registered connections.
///
/// Expects the registry to already reflect the change being announced.
pub struct PresenceBroadcaster<'a> {
    registry: &'a ConnectionRegistry,
    fanout: &'a Fanout,
}

impl<'a> PresenceBroadcaster<'a> {
    pub fn new(registry: &'a ConnectionRegistry, fanout: &'a Fanout) -> Self {
        Self { registry, fanout }
    }

    /// Announce a participant that has just been bound.
    ///
    /// `was_empty` is whether the roster was empty before the bind.
    pub fn announce_join(&self, joined: &Participant, was_empty: bool) {
        let others: Vec<&str> = self
            .registry
            .participants()
            .filter(|p| p.connection != joined.connection)
            .map(|p| p.name.as_str())
            .collect();

        let welcome = ServerEnvelope::system(welcome_text(was_empty, &others));
        let _ = self.fanout.send_to(self.registry, joined.connection, &welcome);

        let announcement = ServerEnvelope::system(join_text(&joined.name));
        self.fanout
            .broadcast(self.registry, &announcement, Some(joined.connection));

        let synced = self.publish_roster();
        log::debug!("Roster resynced to {synced} participants after {} joined", joined.name);
    }

    /// Announce a participant that has just been unbound.
    pub fn announce_leave(&self, departed: &Participant) {
        let announcement = ServerEnvelope::system(leave_text(&departed.name));
        self.fanout.broadcast(self.registry, &announcement, None);

        let synced = self.publish_roster();
        log::debug!("Roster resynced to {synced} participants after {} left", departed.name);
    }

    /// Send the current roster to every registered connection.
    pub fn publish_roster(&self) -> usize {
        let roster = ServerEnvelope::users_list(self.registry.snapshot());
        self.fanout.broadcast(self.registry, &roster, None)
    }
}
