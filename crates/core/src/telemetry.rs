//! Optional observability counters (`spec.md` §4.6/§4.7/§6 "Telemetry").
//!
//! Explicitly non-functional: nothing in the convergence core reads these
//! back to make a decision. They exist for a caller to assert on in tests
//! (scenario S4's retry count) or print in a trace.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared, cheaply-cloned counters for one [`crate::coordinator::Coordinator`].
#[derive(Debug, Default)]
pub struct Telemetry {
    commits: AtomicU64,
    retries: AtomicU64,
    aborts: AtomicU64,
    validation_failures: AtomicU64,
    enqueued: AtomicU64,
    processed: AtomicU64,
}

impl Telemetry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn aborts(&self) -> u64 {
        self.aborts.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn validation_failures(&self) -> u64 {
        self.validation_failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_accumulate() {
        let telemetry = Telemetry::new();
        assert_eq!(telemetry.commits(), 0);
        telemetry.record_commit();
        telemetry.record_retry();
        telemetry.record_retry();
        assert_eq!(telemetry.commits(), 1);
        assert_eq!(telemetry.retries(), 2);
    }
}
