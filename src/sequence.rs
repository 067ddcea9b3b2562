//! Sequence number generation.
//!
//! Every repository owns one [`SequenceGenerator`]. Callers only rely on the
//! numbers being strictly increasing and never reused; whether they come from
//! a process-local atomic or a shared counter service is an injection choice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Produces strictly increasing sequence numbers.
pub trait SequenceGenerator: Send + Sync {
    /// Returns the next number. Never returns the same value twice.
    fn next(&self) -> u64;
}

/// Process-local generator backed by a single atomic counter.
#[derive(Debug, Default)]
pub struct LocalSequence {
    counter: AtomicU64,
}

impl LocalSequence {
    /// Creates a generator whose first number is 0.
    #[must_use]
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a generator whose first number is `start`.
    #[must_use]
    pub const fn starting_at(start: u64) -> Self {
        Self {
            counter: AtomicU64::new(start),
        }
    }
}

impl SequenceGenerator for LocalSequence {
    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
}

/// A named-counter service shared across processes.
///
/// # Contract
/// - `get_and_increment` is atomic per counter name
/// - Values for a name never repeat, including after the caller restarts
pub trait CounterService: Send + Sync {
    /// Returns the current value of `counter` and advances it by one.
    fn get_and_increment(&self, counter: &str) -> u64;
}

/// In-memory counter service.
///
/// Reference implementation of [`CounterService`] for embedded use and tests.
#[derive(Debug, Default)]
pub struct InMemoryCounterService {
    counters: Mutex<HashMap<String, u64>>,
}

impl InMemoryCounterService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `counter` without advancing it.
    #[must_use]
    pub fn peek(&self, counter: &str) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.get(counter).copied().unwrap_or(0)
    }
}

impl CounterService for InMemoryCounterService {
    fn get_and_increment(&self, counter: &str) -> u64 {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = counters.entry(counter.to_string()).or_insert(0);
        let current = *slot;
        *slot = current.saturating_add(1);
        current
    }
}

/// Cluster-wide generator delegating to a [`CounterService`].
pub struct ClusterSequence {
    service: Arc<dyn CounterService>,
    counter: String,
}

impl ClusterSequence {
    /// Creates a generator that draws from `counter` on `service`.
    #[must_use]
    pub fn new(service: Arc<dyn CounterService>, counter: impl Into<String>) -> Self {
        Self {
            service,
            counter: counter.into(),
        }
    }

    /// Name of the backing counter.
    #[must_use]
    pub fn counter(&self) -> &str {
        &self.counter
    }
}

impl std::fmt::Debug for ClusterSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterSequence").field("counter", &self.counter).finish_non_exhaustive()
    }
}

impl SequenceGenerator for ClusterSequence {
    fn next(&self) -> u64 {
        self.service.get_and_increment(&self.counter)
    }
}
