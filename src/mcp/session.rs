//! Per-request transport session
//!
//! Every POST gets a fresh [`TransportSession`]; nothing is resumed across
//! requests. The session is closed exactly once: explicitly when the
//! response has been produced, or from `Drop` when the request future
//! unwinds (panic) or is dropped (client disconnect).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    Connected = 1,
    Handling = 2,
    Responding = 3,
    Closed = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Created,
            1 => SessionState::Connected,
            2 => SessionState::Handling,
            3 => SessionState::Responding,
            _ => SessionState::Closed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Connected => "connected",
            SessionState::Handling => "handling",
            SessionState::Responding => "responding",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Process-wide session counters
#[derive(Debug, Default)]
pub struct SessionStats {
    opened: AtomicU64,
    closed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStatsSnapshot {
    pub opened: u64,
    pub closed: u64,
    pub active: u64,
}

impl SessionStats {
    pub fn snapshot(&self) -> SessionStatsSnapshot {
        let closed = self.closed.load(Ordering::SeqCst);
        let opened = self.opened.load(Ordering::SeqCst);
        SessionStatsSnapshot { opened, closed, active: opened.saturating_sub(closed) }
    }
}

pub struct TransportSession {
    id: u64,
    state: AtomicU8,
    closed: AtomicBool,
    stats: Arc<SessionStats>,
}

impl TransportSession {
    /// Open a fresh session (state `Created`)
    pub fn open(stats: Arc<SessionStats>) -> Self {
        let id = stats.opened.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(session = id, "session opened");
        Self {
            id,
            state: AtomicU8::new(SessionState::Created as u8),
            closed: AtomicBool::new(false),
            stats,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move forward to `next`. Transitions never go backwards and a closed
    /// session stays closed.
    fn advance(&self, next: SessionState) {
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < next as u8).then_some(next as u8)
            });
    }

    pub fn connect(&self) {
        self.advance(SessionState::Connected);
    }

    pub fn begin_handling(&self) {
        self.advance(SessionState::Handling);
    }

    pub fn begin_responding(&self) {
        self.advance(SessionState::Responding);
    }

    /// Close the session. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let reached = self.state();
        self.advance(SessionState::Closed);
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(session = self.id, from = %reached, "session closed");
        true
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        if self.close() {
            tracing::debug!(session = self.id, "session released before completing");
        }
    }
}
