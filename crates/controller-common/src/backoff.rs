//! # Fibonacci Backoff
//!
//! Provides a Fibonacci-based backoff for reconcile retries. It grows more
//! slowly than exponential backoff, so a transient API error is retried
//! quickly while a persistent one settles at the cap.
//!
//! Sequence with the controller defaults: 5s, 5s, 10s, 15s, 25s, 40s, 65s,
//! 105s, 170s, 275s, 300s (max).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::warn;

/// First retry delay used by the controllers
pub const DEFAULT_MIN_BACKOFF_SECONDS: u64 = 5;
/// Retry delay cap used by the controllers
pub const DEFAULT_MAX_BACKOFF_SECONDS: u64 = 300;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, capped at `max_seconds`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum backoff value in seconds (for reset)
    min_seconds: u64,
    prev_seconds: u64,
    current_seconds: u64,
    max_seconds: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with minimum and maximum values in seconds
    ///
    /// # Arguments
    ///
    /// * `min_seconds` - Used for the first two values
    /// * `max_seconds` - Caps the sequence
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Get the next backoff duration in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_seconds;
        let next = self.prev_seconds + self.current_seconds;
        self.prev_seconds = self.current_seconds;
        self.current_seconds = std::cmp::min(next, self.max_seconds);
        result
    }

    /// Get the next backoff duration as a `Duration` and advance the sequence
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_seconds = 0;
        self.current_seconds = self.min_seconds;
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_BACKOFF_SECONDS, DEFAULT_MAX_BACKOFF_SECONDS)
    }
}

/// Backoff state for a resource
#[derive(Debug, Clone, Default)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

/// Per-object backoff, keyed by `namespace/name`
///
/// The watcher error policy asks for the next delay on every failed
/// reconcile; a successful reconcile resets the object's sequence.
#[derive(Debug, Clone, Default)]
pub struct BackoffLedger {
    states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl BackoffLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return the delay before the next attempt
    ///
    /// Returns (backoff, consecutive error count)
    pub fn next_backoff(&self, resource_key: &str) -> (Duration, u32) {
        match self.states.lock() {
            Ok(mut states) => {
                let state = states.entry(resource_key.to_string()).or_default();
                state.error_count += 1;
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff states: {}, using default backoff", e);
                (Duration::from_secs(DEFAULT_MIN_BACKOFF_SECONDS), 0)
            }
        }
    }

    /// Forget failures of a resource (on successful reconciliation)
    pub fn reset(&self, resource_key: &str) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(resource_key);
        }
    }

    /// Drop the state of every resource `keep` rejects
    ///
    /// Watchers pass the keys still present in their reflector store, so an
    /// object deleted while failing is forgotten on the next failure of any
    /// object.
    pub fn retain(&self, keep: impl Fn(&str) -> bool) {
        if let Ok(mut states) = self.states.lock() {
            states.retain(|key, _| keep(key));
        }
    }

    /// Number of resources with recorded failures
    pub fn len(&self) -> usize {
        self.states.lock().map(|states| states.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consecutive failures recorded for a resource
    pub fn error_count(&self, resource_key: &str) -> u32 {
        self.states
            .lock()
            .ok()
            .and_then(|states| states.get(resource_key).map(|s| s.error_count))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::default();

        let sequence: Vec<u64> = (0..11).map(|_| backoff.next_backoff_seconds()).collect();
        assert_eq!(sequence, vec![5, 5, 10, 15, 25, 40, 65, 105, 170, 275, 300]);
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(5, 20);

        assert_eq!(backoff.next_backoff_seconds(), 5);
        assert_eq!(backoff.next_backoff_seconds(), 5);
        assert_eq!(backoff.next_backoff_seconds(), 10);
        assert_eq!(backoff.next_backoff_seconds(), 15);
        // 25 would exceed the cap
        assert_eq!(backoff.next_backoff_seconds(), 20);
        assert_eq!(backoff.next_backoff_seconds(), 20);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::default();
        backoff.next_backoff_seconds();
        backoff.next_backoff_seconds();
        backoff.next_backoff_seconds();

        backoff.reset();

        assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(10));
    }

    #[test]
    fn test_ledger_tracks_resources_independently() {
        let ledger = BackoffLedger::new();

        assert_eq!(ledger.next_backoff("default/a"), (Duration::from_secs(5), 1));
        assert_eq!(ledger.next_backoff("default/a"), (Duration::from_secs(5), 2));
        assert_eq!(ledger.next_backoff("default/a"), (Duration::from_secs(10), 3));
        assert_eq!(ledger.next_backoff("default/b"), (Duration::from_secs(5), 1));

        ledger.reset("default/a");
        assert_eq!(ledger.error_count("default/a"), 0);
        assert_eq!(ledger.error_count("default/b"), 1);
        assert_eq!(ledger.next_backoff("default/a"), (Duration::from_secs(5), 1));
    }

    #[test]
    fn test_retain_forgets_deleted_resources() {
        let ledger = BackoffLedger::new();
        ledger.next_backoff("default/live");
        ledger.next_backoff("default/deleted");
        assert_eq!(ledger.len(), 2);

        ledger.retain(|key| key == "default/live");

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.error_count("default/live"), 1);
        assert_eq!(ledger.error_count("default/deleted"), 0);
    }
}
