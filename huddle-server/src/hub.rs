//! Connection lifecycle and event dispatch.
//!
//! The hub owns the [`ConnectionRegistry`] and is driven by one
//! [`TransportEvent`] at a time, so registry mutations never interleave.
//! Each connection moves through:
//!
//! ```text
//!            register ok
//! Connected ─────────────► Registered
//!     │                        │
//!     └──────── close ─────────┴────► Terminated
//! ```
//!
//! The phase is derived from the registry rather than stored.
//! A `register` on an already registered connection is rejected and leaves
//! the existing binding untouched, however many times it is repeated.

use std::sync::Arc;

use crate::delivery::{DeliveryFailure, Fanout, Outbox};
use crate::presence::PresenceBroadcaster;
use crate::protocol::{ClientEnvelope, DecodeError, ServerEnvelope, DEFAULT_COLOR};
use crate::registry::{ConnectionId, ConnectionRegistry, Participant};
use crate::router::{MessageRouter, RouteError, RouteOutcome};
use crate::stats::Counters;

/// Events produced by the transport layer, consumed in arrival order.
#[derive(Debug)]
pub enum TransportEvent {
    Opened { connection: ConnectionId, outbox: Outbox },
    Frame { connection: ConnectionId, payload: String },
    Closed { connection: ConnectionId },
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connected,
    Registered,
    Terminated,
}

/// Whether two connections may register the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamePolicy {
    /// Duplicates allowed; directed messages reach the earliest registration.
    #[default]
    AllowDuplicates,
    /// A name bound to another live connection is refused.
    RejectDuplicates,
}

impl std::str::FromStr for NamePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow-duplicates" | "allow" => Ok(Self::AllowDuplicates),
            "reject-duplicates" | "reject" | "unique" => Ok(Self::RejectDuplicates),
            other => Err(format!("unknown name policy `{other}`")),
        }
    }
}

/// A `register` that was refused. The sender has already been notified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("connection is already registered as `{0}`")]
    AlreadyRegistered(String),
    #[error("name must not be empty")]
    EmptyName,
    #[error("name `{0}` is already taken")]
    NameTaken(String),
}

/// Anything that stopped a frame from being applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Delivery(#[from] DeliveryFailure),
}

/// What a processed frame did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Registered(Participant),
    Routed(RouteOutcome),
    /// The connection is terminated; nothing happened.
    Ignored,
}

pub fn already_registered_notice(name: &str) -> String {
    format!("You are already registered as {name}")
}

pub const EMPTY_NAME_NOTICE: &str = "Name must not be empty";

pub fn name_taken_notice(name: &str) -> String {
    format!("The name {name} is already taken")
}

/// The lifecycle manager.
pub struct Hub {
    registry: ConnectionRegistry,
    fanout: Fanout,
    name_policy: NamePolicy,
    counters: Arc<Counters>,
}

impl Hub {
    pub fn new(name_policy: NamePolicy, counters: Arc<Counters>) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            fanout: Fanout::new(counters.clone()),
            name_policy,
            counters,
        }
    }

    /// Apply one transport event. Never fails: frame errors are logged and
    /// the connection stays usable.
    pub fn handle(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened { connection, outbox } => self.open(connection, outbox),
            TransportEvent::Frame { connection, payload } => {
                if let Err(e) = self.receive(connection, &payload) {
                    self.counters.frame_rejected();
                    match e {
                        HubError::Decode(_) => {
                            log::warn!("Discarding frame from {connection}: {e}")
                        }
                        _ => log::info!("Rejected frame from {connection}: {e}"),
                    }
                }
            }
            TransportEvent::Closed { connection } => self.close(connection),
        }
    }

    pub fn open(&mut self, connection: ConnectionId, outbox: Outbox) {
        if self.registry.attach(connection, outbox) {
            log::debug!("Connection {connection} opened");
        } else {
            log::warn!("Connection {connection} opened twice, keeping the first outbox");
        }
    }

    /// Decode and apply one inbound frame.
    pub fn receive(
        &mut self,
        connection: ConnectionId,
        payload: &str,
    ) -> Result<FrameOutcome, HubError> {
        if !self.registry.is_attached(connection) {
            log::debug!("Frame for terminated connection {connection} ignored");
            return Ok(FrameOutcome::Ignored);
        }
        self.counters.frame_received();

        match ClientEnvelope::decode(payload)? {
            ClientEnvelope::Register { name, color } => self
                .register(connection, &name, color.as_deref())
                .map(FrameOutcome::Registered),
            ClientEnvelope::Message { content, recipient } => {
                MessageRouter::new(&self.registry, &self.fanout)
                    .route(connection, &content, recipient.as_deref())
                    .map(FrameOutcome::Routed)
                    .map_err(HubError::from)
            }
        }
    }

    fn register(
        &mut self,
        connection: ConnectionId,
        name: &str,
        color: Option<&str>,
    ) -> Result<Participant, HubError> {
        if let Some(existing) = self.registry.participant(connection) {
            let name = existing.name.clone();
            self.notify(connection, &already_registered_notice(&name))?;
            return Err(RegistrationError::AlreadyRegistered(name).into());
        }

        let name = name.trim();
        if name.is_empty() {
            self.notify(connection, EMPTY_NAME_NOTICE)?;
            return Err(RegistrationError::EmptyName.into());
        }

        if self.name_policy == NamePolicy::RejectDuplicates
            && self.registry.lookup_by_name(name).is_some()
        {
            self.notify(connection, &name_taken_notice(name))?;
            return Err(RegistrationError::NameTaken(name.to_string()).into());
        }

        let color = color
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_COLOR);

        let was_empty = self.registry.participant_count() == 0;
        let participant = self.registry.bind(connection, name, color);
        self.counters.set_registered(self.registry.participant_count());
        log::info!("{} registered ({}) on {connection}", participant.name, participant.color);

        PresenceBroadcaster::new(&self.registry, &self.fanout).announce_join(&participant, was_empty);
        Ok(participant)
    }

    /// Terminate a connection. No-op if it is already terminated.
    pub fn close(&mut self, connection: ConnectionId) {
        if !self.registry.is_attached(connection) {
            return;
        }

        match self.registry.detach(connection) {
            Some(departed) => {
                self.counters.set_registered(self.registry.participant_count());
                log::info!("{} left ({connection})", departed.name);
                PresenceBroadcaster::new(&self.registry, &self.fanout).announce_leave(&departed);
            }
            None => log::debug!("Unregistered connection {connection} closed"),
        }
    }

    pub fn phase(&self, connection: ConnectionId) -> ConnectionPhase {
        if self.registry.is_bound(connection) {
            ConnectionPhase::Registered
        } else if self.registry.is_attached(connection) {
            ConnectionPhase::Connected
        } else {
            ConnectionPhase::Terminated
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn name_policy(&self) -> NamePolicy {
        self.name_policy
    }

    fn notify(&self, connection: ConnectionId, content: &str) -> Result<(), DeliveryFailure> {
        self.fanout
            .send_to(&self.registry, connection, &ServerEnvelope::system(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::Frame;
    use crate::presence::{join_text, leave_text, welcome_text};
    use crate::protocol::RosterEntry;
    use crate::router::{not_found_notice, private_confirmation, REGISTER_FIRST};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Peer {
        id: ConnectionId,
        rx: UnboundedReceiver<Frame>,
    }

    impl Peer {
        fn received(&mut self) -> Vec<ServerEnvelope> {
            let mut out = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                out.push(ServerEnvelope::decode(&frame).unwrap());
            }
            out
        }

        fn chat_lines(&mut self) -> Vec<ServerEnvelope> {
            self.received()
                .into_iter()
                .filter(|e| matches!(e, ServerEnvelope::Message { .. }))
                .collect()
        }
    }

    fn hub() -> Hub {
        Hub::new(NamePolicy::AllowDuplicates, Arc::new(Counters::new()))
    }

    fn open(hub: &mut Hub) -> Peer {
        let id = ConnectionId::new();
        let (outbox, rx) = Outbox::channel();
        hub.handle(TransportEvent::Opened { connection: id, outbox });
        Peer { id, rx }
    }

    fn send(hub: &mut Hub, peer: &Peer, envelope: ClientEnvelope) {
        hub.handle(TransportEvent::Frame {
            connection: peer.id,
            payload: envelope.encode(),
        });
    }

    fn join(hub: &mut Hub, name: &str, color: &str) -> Peer {
        let peer = open(hub);
        send(hub, &peer, ClientEnvelope::register(name, color));
        peer
    }

    #[test]
    fn test_register_moves_to_registered() {
        let mut hub = hub();
        let mut alice = open(&mut hub);
        assert_eq!(hub.phase(alice.id), ConnectionPhase::Connected);

        let outcome = hub
            .receive(alice.id, &ClientEnvelope::register("Alice", "red").encode())
            .unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Registered(Participant {
                name: "Alice".into(),
                color: "red".into(),
                connection: alice.id,
            })
        );
        assert_eq!(hub.phase(alice.id), ConnectionPhase::Registered);
        assert_eq!(
            alice.received(),
            vec![
                ServerEnvelope::system(welcome_text(true, &[])),
                ServerEnvelope::users_list(vec![RosterEntry::new("Alice", "red")]),
            ]
        );
    }

    #[test]
    fn test_roster_matches_registration_order() {
        let mut hub = hub();
        let names = ["n0", "n1", "n2", "n3", "n4", "n5"];
        let _peers: Vec<Peer> = names.iter().map(|n| join(&mut hub, n, "black")).collect();

        let roster: Vec<String> = hub.registry().snapshot().into_iter().map(|e| e.name).collect();
        assert_eq!(roster, names);
    }

    #[test]
    fn test_message_before_register_is_rejected() {
        let mut hub = hub();
        let mut bob = join(&mut hub, "Bob", "green");
        bob.received();
        let mut stranger = open(&mut hub);

        let err = hub
            .receive(stranger.id, &ClientEnvelope::message("hi", "all").encode())
            .unwrap_err();
        assert_eq!(err, HubError::Route(RouteError::UnregisteredSender));
        assert_eq!(stranger.received(), vec![ServerEnvelope::system(REGISTER_FIRST)]);
        assert!(bob.received().is_empty());
        assert_eq!(hub.phase(stranger.id), ConnectionPhase::Connected);
        assert_eq!(hub.registry().participant_count(), 1);
    }

    #[test]
    fn test_broadcast_reaches_everyone_once() {
        let mut hub = hub();
        let mut a = join(&mut hub, "A", "red");
        let mut b = join(&mut hub, "B", "green");
        let mut c = join(&mut hub, "C", "blue");
        for peer in [&mut a, &mut b, &mut c] {
            peer.received();
        }

        send(&mut hub, &a, ClientEnvelope::message("hi", "all"));

        let expected = vec![ServerEnvelope::chat("A", "hi", "red")];
        assert_eq!(a.chat_lines(), expected);
        assert_eq!(b.chat_lines(), expected);
        assert_eq!(c.chat_lines(), expected);
    }

    #[test]
    fn test_private_message_isolation() {
        let mut hub = hub();
        let mut a = join(&mut hub, "A", "red");
        let mut b = join(&mut hub, "B", "green");
        let mut c = join(&mut hub, "C", "blue");
        for peer in [&mut a, &mut b, &mut c] {
            peer.received();
        }

        send(&mut hub, &a, ClientEnvelope::message("secret", "B"));

        assert_eq!(
            b.received(),
            vec![ServerEnvelope::private("A", "secret", "red", "B")]
        );
        assert_eq!(
            a.received(),
            vec![ServerEnvelope::system(private_confirmation("B", "secret"))]
        );
        assert!(c.received().is_empty());
    }

    #[test]
    fn test_private_message_to_missing_name() {
        let mut hub = hub();
        let mut a = join(&mut hub, "A", "red");
        let mut b = join(&mut hub, "B", "green");
        a.received();
        b.received();

        let err = hub
            .receive(a.id, &ClientEnvelope::message("yo", "Ghost").encode())
            .unwrap_err();
        assert_eq!(err, HubError::Route(RouteError::RecipientNotFound("Ghost".into())));
        assert_eq!(a.received(), vec![ServerEnvelope::system(not_found_notice("Ghost"))]);
        assert!(b.received().is_empty());
    }

    #[test]
    fn test_close_resyncs_roster() {
        let mut hub = hub();
        let mut a = join(&mut hub, "A", "red");
        let b = join(&mut hub, "B", "green");
        let mut c = join(&mut hub, "C", "blue");
        a.received();
        c.received();

        hub.handle(TransportEvent::Closed { connection: b.id });

        assert_eq!(hub.phase(b.id), ConnectionPhase::Terminated);
        assert!(hub.registry().lookup_by_name("B").is_none());
        let expected = vec![
            ServerEnvelope::system(leave_text("B")),
            ServerEnvelope::users_list(vec![
                RosterEntry::new("A", "red"),
                RosterEntry::new("C", "blue"),
            ]),
        ];
        assert_eq!(a.received(), expected);
        assert_eq!(c.received(), expected);
    }

    #[test]
    fn test_close_of_unregistered_connection_is_silent() {
        let mut hub = hub();
        let mut a = join(&mut hub, "A", "red");
        a.received();
        let lurker = open(&mut hub);

        hub.handle(TransportEvent::Closed { connection: lurker.id });
        assert!(a.received().is_empty());
        assert_eq!(hub.registry().connection_count(), 1);
    }

    #[test]
    fn test_terminated_connection_is_inert() {
        let mut hub = hub();
        let mut a = join(&mut hub, "A", "red");
        let b = join(&mut hub, "B", "green");
        hub.close(b.id);
        a.received();

        assert_eq!(
            hub.receive(b.id, &ClientEnvelope::message("late", "all").encode()),
            Ok(FrameOutcome::Ignored)
        );
        hub.close(b.id);
        assert!(a.received().is_empty());
        assert_eq!(hub.phase(b.id), ConnectionPhase::Terminated);
    }

    #[test]
    fn test_malformed_frame_keeps_connection_usable() {
        let mut hub = hub();
        let mut a = open(&mut hub);

        let garbage_frames = [
            "{oops",
            r#"{"content":"x"}"#,
            r#"{"type":"dance"}"#,
            r#"{"type":"system","content":"x"}"#,
        ];
        for garbage in garbage_frames {
            assert!(matches!(hub.receive(a.id, garbage), Err(HubError::Decode(_))));
            hub.handle(TransportEvent::Frame {
                connection: a.id,
                payload: garbage.to_string(),
            });
        }
        assert!(a.received().is_empty());
        assert_eq!(hub.phase(a.id), ConnectionPhase::Connected);

        send(&mut hub, &a, ClientEnvelope::register("A", "red"));
        assert_eq!(hub.phase(a.id), ConnectionPhase::Registered);
        assert_eq!(a.received().len(), 2);
    }

    #[test]
    fn test_second_register_is_always_rejected() {
        let mut hub = hub();
        let mut a = join(&mut hub, "A", "red");
        let mut b = join(&mut hub, "B", "green");
        a.received();
        b.received();

        for attempt in ["A2", "B", "A"] {
            let err = hub
                .receive(a.id, &ClientEnvelope::register(attempt, "blue").encode())
                .unwrap_err();
            assert_eq!(
                err,
                HubError::Registration(RegistrationError::AlreadyRegistered("A".into()))
            );
            assert_eq!(a.received(), vec![ServerEnvelope::system(already_registered_notice("A"))]);
            assert!(b.received().is_empty());
        }

        assert_eq!(
            hub.registry().snapshot(),
            vec![RosterEntry::new("A", "red"), RosterEntry::new("B", "green")]
        );
    }

    #[test]
    fn test_blank_name_is_rejected() {
        let mut hub = hub();
        let mut a = open(&mut hub);

        let err = hub
            .receive(a.id, r#"{"type":"register","name":"   "}"#)
            .unwrap_err();
        assert_eq!(err, HubError::Registration(RegistrationError::EmptyName));
        assert_eq!(a.received(), vec![ServerEnvelope::system(EMPTY_NAME_NOTICE)]);
        assert_eq!(hub.phase(a.id), ConnectionPhase::Connected);
    }

    #[test]
    fn test_missing_color_defaults_to_black() {
        let mut hub = hub();
        let a = open(&mut hub);

        let outcome = hub
            .receive(a.id, r#"{"type":"register","name":" Alice ","color":""}"#)
            .unwrap();
        match outcome {
            FrameOutcome::Registered(p) => {
                assert_eq!(p.name, "Alice");
                assert_eq!(p.color, DEFAULT_COLOR);
            }
            other => panic!("expected registration, got {other:?}"),
        }
    }

    #[test]
    fn test_join_announcement_skips_newcomer() {
        let mut hub = hub();
        let mut a = join(&mut hub, "A", "red");
        a.received();
        let mut b = join(&mut hub, "B", "green");

        let roster = ServerEnvelope::users_list(vec![
            RosterEntry::new("A", "red"),
            RosterEntry::new("B", "green"),
        ]);
        assert_eq!(a.received(), vec![ServerEnvelope::system(join_text("B")), roster.clone()]);
        assert_eq!(
            b.received(),
            vec![ServerEnvelope::system(welcome_text(false, &["A"])), roster]
        );
    }

    #[test]
    fn test_duplicate_names_allowed_by_default() {
        let mut hub = hub();
        let mut a = join(&mut hub, "A", "red");
        let mut first = join(&mut hub, "Sam", "green");
        let mut second = join(&mut hub, "Sam", "blue");
        for peer in [&mut a, &mut first, &mut second] {
            peer.received();
        }
        assert_eq!(hub.registry().participant_count(), 3);

        send(&mut hub, &a, ClientEnvelope::message("hey", "Sam"));
        assert_eq!(first.received().len(), 1);
        assert!(second.received().is_empty());
    }

    #[test]
    fn test_duplicate_names_rejected_when_configured() {
        let mut hub = Hub::new(NamePolicy::RejectDuplicates, Arc::new(Counters::new()));
        let mut first = join(&mut hub, "Sam", "green");
        first.received();
        let mut second = open(&mut hub);

        let err = hub
            .receive(second.id, &ClientEnvelope::register("Sam", "blue").encode())
            .unwrap_err();
        assert_eq!(err, HubError::Registration(RegistrationError::NameTaken("Sam".into())));
        assert_eq!(second.received(), vec![ServerEnvelope::system(name_taken_notice("Sam"))]);
        assert!(first.received().is_empty());
        assert_eq!(hub.phase(second.id), ConnectionPhase::Connected);

        // Name frees up once the holder leaves
        hub.close(first.id);
        send(&mut hub, &second, ClientEnvelope::register("Sam", "blue"));
        assert_eq!(hub.phase(second.id), ConnectionPhase::Registered);
    }

    #[test]
    fn test_counters_track_frames() {
        let counters = Arc::new(Counters::new());
        let mut hub = Hub::new(NamePolicy::AllowDuplicates, counters.clone());
        let a = join(&mut hub, "A", "red");
        hub.handle(TransportEvent::Frame {
            connection: a.id,
            payload: "nope".into(),
        });

        let stats = counters.snapshot();
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.frames_rejected, 1);
        assert_eq!(stats.registered_participants, 1);
    }

    #[test]
    fn test_name_policy_from_str() {
        assert_eq!("allow-duplicates".parse::<NamePolicy>(), Ok(NamePolicy::AllowDuplicates));
        assert_eq!(" Reject-Duplicates ".parse::<NamePolicy>(), Ok(NamePolicy::RejectDuplicates));
        assert!("maybe".parse::<NamePolicy>().is_err());
    }
}
