//! Structured observability hooks for evaluation lifecycle events.
//!
//! This module provides:
//! - An evaluation-scoped tracing span via [`eval_span`]
//! - Emission functions for trial, criterion and trend events
//!
//! Events are emitted at `info!`/`warn!` level (filter with `RUST_LOG`).
//! For JSON output, set `PASSK_LOG_FORMAT=json` or pass `--json`.

use std::path::Path;

use tracing::{debug, error, info, warn};

/// Span tagging every event of one evaluation with its case and run id.
///
/// Attach to async work with `tracing::Instrument::instrument`.
pub fn eval_span(case_id: &str, run_id: &str) -> tracing::Span {
    tracing::info_span!("passk.eval", case_id = %case_id, run_id = %run_id)
}

/// Emit event: trial started.
pub fn emit_trial_started(case_id: &str, trial: usize, k: usize) {
    info!(event = "trial.started", case_id = %case_id, trial = trial, k = k);
}

/// Emit event: trial finished with outcome and duration.
pub fn emit_trial_finished(case_id: &str, trial: usize, passed: bool, duration_ms: u64) {
    info!(
        event = "trial.finished",
        case_id = %case_id,
        trial = trial,
        passed = passed,
        duration_ms = duration_ms,
    );
}

/// Emit event: an isolated context could not be acquired.
pub fn emit_context_unavailable(case_id: &str, trial: usize, error: &dyn std::fmt::Display) {
    warn!(event = "trial.context_unavailable", case_id = %case_id, trial = trial, error = %error);
}

/// Emit event: an isolated context failed to clean up.
pub fn emit_context_cleanup_error(working_dir: &Path, error: &dyn std::fmt::Display) {
    warn!(
        event = "context.cleanup_error",
        working_dir = %working_dir.display(),
        error = %error,
    );
}

/// Emit event: a symlink in the seed directory was not copied.
pub fn emit_seed_symlink_skipped(path: &Path) {
    debug!(event = "context.seed_symlink_skipped", path = %path.display());
}

/// Emit event: criterion failed its check.
pub fn emit_criterion_failed(check: &str, reason: &str) {
    info!(event = "criterion.failed", check = %check, reason = %reason);
}

/// Emit event: criterion names a grader that is not registered.
pub fn emit_unknown_grader(check: &str, grader: &str) {
    error!(event = "criterion.unknown_grader", check = %check, grader = %grader);
}

/// Emit event: criterion is misconfigured (unknown type, kind mismatch).
pub fn emit_criterion_misconfigured(check: &str, reason: &str) {
    error!(event = "criterion.misconfigured", check = %check, reason = %reason);
}

/// Emit event: grader raised an execution error.
pub fn emit_grader_error(check: &str, error: &dyn std::fmt::Display) {
    warn!(event = "criterion.grader_error", check = %check, error = %error);
}

/// Emit event: grader did not finish before its deadline.
pub fn emit_criterion_timeout(check: &str, limit_ms: u64) {
    warn!(event = "criterion.timeout", check = %check, limit_ms = limit_ms);
}

/// Emit event: a grader finished after its deadline and the result was dropped.
pub fn emit_late_result_discarded(check: &str) {
    debug!(event = "criterion.late_result_discarded", check = %check);
}

/// Emit event: meta-evaluation case finished.
pub fn emit_case_verdicts(test_id: &str, majority: Option<&str>, correct: bool, consistent: bool) {
    info!(
        event = "meta.case_finished",
        test_id = %test_id,
        majority = majority.unwrap_or("<none>"),
        correct = correct,
        consistent = consistent,
    );
}

/// Emit event: regression beyond threshold detected (warning level).
pub fn emit_regression(entity: &str, percentage_delta: f64, threshold_percent: f64) {
    warn!(
        event = "trend.regression",
        entity = %entity,
        percentage_delta = percentage_delta,
        threshold_percent = threshold_percent,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_span_create() {
        // No subscriber installed: the span is disabled but must not panic.
        let span = eval_span("case-1", "run-1");
        let _entered = span.enter();
        emit_trial_started("case-1", 1, 3);
    }
}
