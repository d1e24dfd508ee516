//! Relay counters.
//!
//! The wire protocol has no NACK, so a remote client cannot tell that a
//! command was dropped.  These counters make every drop observable to the
//! operator and to tests.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated by the forwarding loop and the sessions.
#[derive(Debug, Default)]
pub struct RelayStats {
    frames_forwarded: AtomicU64,
    commands_applied: AtomicU64,
    commands_rejected: AtomicU64,
    decode_errors: AtomicU64,
    sessions_dropped: AtomicU64,
}

/// A point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Bus frames broadcast to clients.
    pub frames_forwarded: u64,
    /// Commands validated and applied to the bus.
    pub commands_applied: u64,
    /// Commands that failed validation or were refused by the bus.
    pub commands_rejected: u64,
    /// Inbound records that could not be decoded.
    pub decode_errors: u64,
    /// Sessions removed because their outbound queue was full or closed.
    pub sessions_dropped: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_forwarded(&self) {
        self.frames_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_applied(&self) {
        self.commands_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.commands_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_dropped(&self) {
        self.sessions_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            commands_applied: self.commands_applied.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            sessions_dropped: self.sessions_dropped.load(Ordering::Relaxed),
        }
    }
}
