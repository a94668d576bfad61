//! Fetch sessions: exactly one is authoritative at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct SessionTracker {
    current: AtomicU64,
}

/// Cancellation token for one orchestration cycle. It stays valid until a
/// newer session begins.
#[derive(Debug, Clone)]
pub struct FetchSession {
    id: u64,
    tracker: Arc<SessionTracker>,
}

impl SessionTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Starts a new session, invalidating every earlier one.
    pub fn begin(self: &Arc<Self>) -> FetchSession {
        let id = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        FetchSession {
            id,
            tracker: Arc::clone(self),
        }
    }

    /// Token for the session that is authoritative right now, without starting a new one.
    pub fn current(self: &Arc<Self>) -> FetchSession {
        FetchSession {
            id: self.current.load(Ordering::SeqCst),
            tracker: Arc::clone(self),
        }
    }
}

impl FetchSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_current(&self) -> bool {
        self.tracker.current.load(Ordering::SeqCst) == self.id
    }
}
