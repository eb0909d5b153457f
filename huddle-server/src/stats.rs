//! Server-wide counters.
//!
//! Updated from the dispatcher and the connection tasks via atomics so the
//! hot path never takes a lock. Read with [`Counters::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of the server counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub registered_participants: u64,
    pub frames_received: u64,
    pub frames_rejected: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
}

/// Lock-free counters backing [`ServerStats`].
#[derive(Debug, Default)]
pub struct Counters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    registered_participants: AtomicU64,
    frames_received: AtomicU64,
    frames_rejected: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn set_registered(&self, count: usize) {
        self.registered_participants
            .store(count as u64, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self, count: u64) {
        self.deliveries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn delivery_failed(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServerStats {
        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            registered_participants: self.registered_participants.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}
