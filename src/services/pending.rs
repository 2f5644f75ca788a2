//! Pending bottle-check correlation
//!
//! Matches each `BOTTLE_CHECK_RESULT` frame to the `CHECK_BOTTLE`
//! request that produced it. Entries are keyed by session id (the only
//! correlation key the wire protocol carries) and bounded; scanner
//! dispatch is serialized, so the table holds at most one entry in
//! practice, but a result for a stale or unknown session is detected
//! here instead of resolving the wrong scan.
//!
//! Deadlines live at the await site: the caller wraps the receiver in
//! a timeout and cancels the entry when it fires.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::warn;

use crate::domain::types::{CheckOutcome, SessionId};

/// Most outstanding checks the table will hold. One session at a time
/// with serialized dispatch needs exactly one; the headroom covers a
/// session takeover racing a late result.
const MAX_OUTSTANDING: usize = 4;

/// Table of in-flight bottle checks
#[derive(Debug, Clone, Default)]
pub struct PendingChecks {
    inner: Arc<Mutex<HashMap<SessionId, oneshot::Sender<CheckOutcome>>>>,
}

impl PendingChecks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check for `session_id`, returning the completion
    /// receiver. Refuses when the table is full or the session already
    /// has a check in flight.
    pub fn register(&self, session_id: SessionId) -> Option<oneshot::Receiver<CheckOutcome>> {
        let mut inner = self.lock();
        if inner.len() >= MAX_OUTSTANDING {
            warn!(session_id = %session_id, "pending_check_table_full");
            return None;
        }
        if inner.contains_key(&session_id) {
            warn!(session_id = %session_id, "pending_check_already_outstanding");
            return None;
        }
        let (tx, rx) = oneshot::channel();
        inner.insert(session_id, tx);
        Some(rx)
    }

    /// Remove and return the waiter for `session_id`, if one is
    /// outstanding. The caller acts on the result and then completes
    /// the waiter; a late result finds no entry here and must not act.
    pub fn take(&self, session_id: SessionId) -> Option<oneshot::Sender<CheckOutcome>> {
        self.lock().remove(&session_id)
    }

    /// Resolve the check for `session_id`. Returns false when no check
    /// was outstanding (late or stale result).
    pub fn resolve(&self, session_id: SessionId, outcome: CheckOutcome) -> bool {
        let Some(tx) = self.take(session_id) else {
            return false;
        };
        // A dropped receiver means the waiter already timed out
        tx.send(outcome).is_ok()
    }

    /// Drop the entry for `session_id` (deadline fired or the session
    /// went away). The waiter observes a closed channel.
    pub fn cancel(&self, session_id: SessionId) -> bool {
        self.lock().remove(&session_id).is_some()
    }

    /// Drop every entry. Used when the connection is lost: outstanding
    /// checks fail fast instead of waiting out their deadlines.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, oneshot::Sender<CheckOutcome>>> {
        // Lock poisoning cannot happen: no panics while held
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
