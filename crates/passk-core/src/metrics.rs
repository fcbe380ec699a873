//! Global atomic counters for evaluation observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of an evaluation).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters without allocation or locking.
pub struct Metrics {
    trials_run: AtomicU64,
    criteria_timed_out: AtomicU64,
    grader_errors: AtomicU64,
    late_results_discarded: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            trials_run: AtomicU64::new(0),
            criteria_timed_out: AtomicU64::new(0),
            grader_errors: AtomicU64::new(0),
            late_results_discarded: AtomicU64::new(0),
        }
    }

    pub fn inc_trials_run(&self) {
        self.trials_run.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "trials_run", "counter incremented");
    }

    pub fn inc_criteria_timed_out(&self) {
        self.criteria_timed_out.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "criteria_timed_out", "counter incremented");
    }

    pub fn inc_grader_errors(&self) {
        self.grader_errors.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "grader_errors", "counter incremented");
    }

    pub fn inc_late_results_discarded(&self) {
        self.late_results_discarded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "late_results_discarded", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            trials_run = self.trials_run(),
            criteria_timed_out = self.criteria_timed_out(),
            grader_errors = self.grader_errors(),
            late_results_discarded = self.late_results_discarded(),
        );
    }

    pub fn trials_run(&self) -> u64 {
        self.trials_run.load(Ordering::Relaxed)
    }

    pub fn criteria_timed_out(&self) -> u64 {
        self.criteria_timed_out.load(Ordering::Relaxed)
    }

    pub fn grader_errors(&self) -> u64 {
        self.grader_errors.load(Ordering::Relaxed)
    }

    /// Late grader results dropped after their criterion timed out.
    pub fn late_results_discarded(&self) -> u64 {
        self.late_results_discarded.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.trials_run.store(0, Ordering::Relaxed);
        self.criteria_timed_out.store(0, Ordering::Relaxed);
        self.grader_errors.store(0, Ordering::Relaxed);
        self.late_results_discarded.store(0, Ordering::Relaxed);
    }
}
