//! In-flight request tracking for cooperative cancellation
//!
//! Each cancellable request registers its id before its handler starts. The returned guard removes
//! exactly its own registration when dropped, whichever of completion, error, cancellation or task
//! abort happens first.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use dashmap::{mapref::entry::Entry, DashMap};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::AppError;

#[derive(Debug)]
struct ActiveRequest {
    generation: u64,
    token: CancellationToken,
}

#[derive(Debug, Default)]
pub struct RequestTracker {
    active: DashMap<String, ActiveRequest>,
    generation: AtomicU64,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(self: &Arc<Self>, key: String) -> Result<ActiveRequestGuard, AppError> {
        match self.active.entry(key.clone()) {
            Entry::Occupied(_) => Err(AppError::invalid_request(
                "duplicate_request_id",
                "a request with this id is already in flight",
            )),
            Entry::Vacant(slot) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let token = CancellationToken::new();
                slot.insert(ActiveRequest {
                    generation,
                    token: token.clone(),
                });

                Ok(ActiveRequestGuard {
                    tracker: Arc::clone(self),
                    key,
                    generation,
                    token,
                })
            }
        }
    }

    /// Cancels and forgets the request registered under `key`. Unknown keys are a no-op.
    pub fn cancel(&self, key: &str) -> bool {
        match self.active.remove(key) {
            Some((_, request)) => {
                request.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let keys: Vec<String> = self.active.iter().map(|entry| entry.key().clone()).collect();
        keys.iter().filter(|key| self.cancel(key)).count()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.active.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[derive(Debug)]
pub struct ActiveRequestGuard {
    tracker: Arc<RequestTracker>,
    key: String,
    generation: u64,
    token: CancellationToken,
}

impl ActiveRequestGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.tracker
            .active
            .remove_if(&self.key, |_, request| request.generation == self.generation);
    }
}

/// Tracker key for a JSON-RPC id. String `"1"` and number `1` stay distinct.
pub fn request_key(id: &Value) -> Option<String> {
    match id {
        Value::String(_) | Value::Number(_) => Some(id.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn tracker() -> Arc<RequestTracker> {
        Arc::new(RequestTracker::new())
    }

    #[test]
    fn cancel_signals_token_and_removes_entry() {
        let tracker = tracker();
        let guard = tracker.register("\"req-123\"".to_string()).expect("registered");

        assert!(tracker.cancel("\"req-123\""));
        assert!(guard.token().is_cancelled());
        assert!(!tracker.contains("\"req-123\""));
    }

    #[test]
    fn cancelling_unknown_id_is_a_no_op() {
        let tracker = tracker();
        let guard = tracker.register("1".to_string()).expect("registered");

        assert!(!tracker.cancel("2"));
        assert!(!guard.token().is_cancelled());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn dropping_guard_removes_registration() {
        let tracker = tracker();
        let guard = tracker.register("7".to_string()).expect("registered");
        assert!(tracker.contains("7"));

        drop(guard);
        assert!(tracker.is_empty());
    }

    #[test]
    fn duplicate_in_flight_id_is_rejected() {
        let tracker = tracker();
        let _guard = tracker.register("7".to_string()).expect("registered");

        let error = tracker.register("7".to_string()).expect_err("duplicate");
        assert!(matches!(
            error,
            AppError::InvalidRequest {
                code: "duplicate_request_id",
                ..
            }
        ));
    }

    #[test]
    fn stale_guard_does_not_remove_newer_registration() {
        let tracker = tracker();
        let first = tracker.register("7".to_string()).expect("registered");
        assert!(tracker.cancel("7"));

        let second = tracker.register("7".to_string()).expect("id free again");
        drop(first);

        assert!(tracker.contains("7"));
        assert!(!second.token().is_cancelled());
        drop(second);
        assert!(tracker.is_empty());
    }

    #[test]
    fn cancel_all_signals_every_outstanding_request() {
        let tracker = tracker();
        let a = tracker.register("1".to_string()).expect("registered");
        let b = tracker.register("2".to_string()).expect("registered");

        assert_eq!(tracker.cancel_all(), 2);
        assert!(a.token().is_cancelled());
        assert!(b.token().is_cancelled());
        assert!(tracker.is_empty());
    }

    #[test]
    fn request_keys_distinguish_string_and_number_ids() {
        assert_eq!(request_key(&json!(1)), Some("1".to_string()));
        assert_eq!(request_key(&json!("1")), Some("\"1\"".to_string()));
        assert_eq!(request_key(&Value::Null), None);
    }
}
