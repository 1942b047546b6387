//! Allocation status tracking
//!
//! Which sessions currently hold a claim on this module instance, and
//! whether the instance is at capacity. The capacity flag is set by the
//! owning module's policy rather than derived from the claim count.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::types::{SessionKey, UserSession};

/// Claims held by one module instance
#[derive(Debug, Clone, Default)]
pub struct AllocationStatus {
    claims: HashMap<SessionKey, UserSession>,
    fully_allocated: bool,
}

impl AllocationStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a claim for `session`. Returns false if it was already held.
    pub fn add_session(&mut self, session: &UserSession) -> bool {
        let key = session.key();
        if self.claims.contains_key(&key) {
            return false;
        }
        self.claims.insert(key, session.clone());
        true
    }

    /// Drop the claim for `session`. Returns whether a claim was removed.
    pub fn remove_session(&mut self, session: &UserSession) -> bool {
        self.claims.remove(&session.key()).is_some()
    }

    pub fn holds(&self, session: &UserSession) -> bool {
        self.claims.contains_key(&session.key())
    }

    pub fn is_fully_allocated(&self) -> bool {
        self.fully_allocated
    }

    pub fn set_fully_allocated(&mut self, fully_allocated: bool) {
        self.fully_allocated = fully_allocated;
    }

    pub fn claim_count(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Sessions holding a claim, ordered by user id
    pub fn holders(&self) -> Vec<UserSession> {
        let mut holders: Vec<UserSession> = self.claims.values().cloned().collect();
        holders.sort_by(|a, b| {
            a.user_id
                .cmp(&b.user_id)
                .then_with(|| a.experiment_id.cmp(&b.experiment_id))
                .then_with(|| a.global_user_id.cmp(&b.global_user_id))
        });
        holders
    }
}

// ─────────────────────────────────────────────────────────────────
// Tracker
// ─────────────────────────────────────────────────────────────────

/// Serialized access to a module instance's [`AllocationStatus`].
///
/// Every operation takes the same lock, so a claim insert and the capacity
/// recomputation that follows it can be made atomic with [`with_lock`].
///
/// [`with_lock`]: AllocationTracker::with_lock
#[derive(Debug, Default)]
pub struct AllocationTracker {
    status: Mutex<AllocationStatus>,
}

impl AllocationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_session(&self, session: &UserSession) -> bool {
        self.status.lock().add_session(session)
    }

    pub fn remove_session(&self, session: &UserSession) -> bool {
        self.status.lock().remove_session(session)
    }

    pub fn holds(&self, session: &UserSession) -> bool {
        self.status.lock().holds(session)
    }

    pub fn is_fully_allocated(&self) -> bool {
        self.status.lock().is_fully_allocated()
    }

    pub fn set_fully_allocated(&self, fully_allocated: bool) {
        self.status.lock().set_fully_allocated(fully_allocated);
    }

    pub fn holders(&self) -> Vec<UserSession> {
        self.status.lock().holders()
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> AllocationStatus {
        self.status.lock().clone()
    }

    /// Run `f` with exclusive access
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut AllocationStatus) -> R) -> R {
        f(&mut *self.status.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_idempotent() {
        let mut status = AllocationStatus::new();
        let session = UserSession::new(1).with_experiment("exp");

        assert!(status.add_session(&session));
        assert!(!status.add_session(&session));
        assert_eq!(status.claim_count(), 1);
    }

    #[test]
    fn test_key_ignores_username() {
        let mut status = AllocationStatus::new();
        status.add_session(&UserSession::new(1).with_username("a"));
        assert!(status.holds(&UserSession::new(1).with_username("b")));
    }

    #[test]
    fn test_remove_reports_presence() {
        let mut status = AllocationStatus::new();
        let session = UserSession::new(5);
        assert!(!status.remove_session(&session));
        status.add_session(&session);
        assert!(status.remove_session(&session));
        assert!(status.is_empty());
    }

    #[test]
    fn test_flag_is_independent_of_claims() {
        let mut status = AllocationStatus::new();
        status.set_fully_allocated(true);
        assert!(status.is_fully_allocated());
        assert!(status.is_empty());
    }

    #[test]
    fn test_holders_sorted() {
        let tracker = AllocationTracker::new();
        tracker.add_session(&UserSession::new(9));
        tracker.add_session(&UserSession::new(2));
        let ids: Vec<u32> = tracker.holders().iter().map(|s| s.user_id).collect();
        assert_eq!(ids, vec![2, 9]);
    }
}
