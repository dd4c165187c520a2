//! Live-connection registry
//!
//! Tracks every open relay socket by session id for diagnostics (the
//! live-connection count is logged at connection open and close). The
//! registry is injected into socket construction rather than held as a
//! process-wide global, so tests can instantiate isolated registries.
//!
//! Uses [`DashMap`] for lock-free concurrent access, since sockets
//! register and unregister from arbitrarily many tasks at once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

/// Metadata retained per live connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// When the relay socket was created
    pub opened_at: Instant,
}

/// Concurrency-safe table of live relay sockets keyed by session id.
///
/// Used for diagnostics only, never for routing. `count()` is a snapshot:
/// concurrent mutations may land before or after the count is taken.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<DashMap<Uuid, ConnectionInfo>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a live socket under its session id.
    pub fn register(&self, id: Uuid) {
        self.inner.insert(
            id,
            ConnectionInfo {
                opened_at: Instant::now(),
            },
        );
    }

    /// Removes a socket from the table. Removing an unknown id is a no-op.
    pub fn unregister(&self, id: &Uuid) {
        self.inner.remove(id);
    }

    /// Number of live sockets.
    pub fn count(&self) -> usize {
        self.inner.len()
    }

    /// How long a live socket has been open, or `None` for unknown ids.
    pub fn session_age(&self, id: &Uuid) -> Option<Duration> {
        self.inner.get(id).map(|entry| entry.opened_at.elapsed())
    }
}
