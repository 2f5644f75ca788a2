//! Shared session record
//!
//! At most one session is active at any time. The record is shared
//! between the protocol loop, the acceptor status reader, and the
//! inactivity watchdog; all of them go through the methods here so the
//! id/active/last-activity fields always change together.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::domain::types::SessionId;

#[derive(Debug)]
struct Inner {
    id: Option<SessionId>,
    active: bool,
    last_activity: Instant,
}

/// The gateway's one session slot
#[derive(Debug, Clone)]
pub struct SessionState {
    inner: Arc<Mutex<Inner>>,
}

/// Point-in-time copy for decision making outside the lock
#[derive(Debug, Clone, Copy)]
pub struct SessionSnapshot {
    pub id: Option<SessionId>,
    pub active: bool,
    pub idle: Duration,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                id: None,
                active: false,
                last_activity: Instant::now(),
            })),
        }
    }

    /// Activate a session. Returns the id of a session that was still
    /// active and got replaced, if any.
    pub async fn begin(&self, id: SessionId) -> Option<SessionId> {
        let mut inner = self.inner.lock().await;
        let replaced = if inner.active { inner.id } else { None };
        inner.id = Some(id);
        inner.active = true;
        inner.last_activity = Instant::now();
        replaced
    }

    /// Deactivate whatever session is active and clear its id.
    /// Returns the id if a session was actually active.
    pub async fn end(&self) -> Option<SessionId> {
        let mut inner = self.inner.lock().await;
        if !inner.active {
            return None;
        }
        let id = inner.id.take();
        inner.active = false;
        id
    }

    /// Deactivate only if `id` matches the active session.
    /// Returns false for a non-matching or inactive session (no-op).
    pub async fn end_if_matches(&self, id: SessionId) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.active && inner.id == Some(id) {
            inner.id = None;
            inner.active = false;
            true
        } else {
            false
        }
    }

    /// Record activity on the current session
    pub async fn touch(&self) {
        let mut inner = self.inner.lock().await;
        inner.last_activity = Instant::now();
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.active
    }

    /// Id of the active session, if any
    pub async fn current(&self) -> Option<SessionId> {
        let inner = self.inner.lock().await;
        if inner.active {
            inner.id
        } else {
            None
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        SessionSnapshot {
            id: if inner.active { inner.id } else { None },
            active: inner.active,
            idle: inner.last_activity.elapsed(),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
