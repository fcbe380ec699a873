//! Trial runner.
//!
//! Runs the criteria of a [`FailureCase`] k times, strictly one trial after
//! another, each trial in a fresh isolated context. A trial passes when all
//! of its non-skipped criteria pass; an empty criterion list passes.
//!
//! Every grader call is spawned as its own task and raced against a
//! deadline. When the deadline wins the criterion fails and the task is
//! detached, not aborted; whatever it returns later is discarded.
//!
//! Configuration and execution errors fail the single criterion they
//! belong to and never abort the remaining criteria or trials.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::aggregate::{compute_metrics, CaseVerdicts, Metrics};
use crate::domain::{CriterionType, EvalCriterion, FailureCase, TestCase};
use crate::grader::{
    grade_code, Applicability, GradeContext, GradeInput, GradeResult, Grader, GraderResult,
    ModelGrader, CONTEXT_ARGUMENT, CONTEXT_CATEGORY, CONTEXT_TASK_ID, CONTEXT_TASK_SPEC,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::registry::GraderRegistry;
use crate::sandbox::{ContextGuard, ContextProvider};
use crate::verdict::VerdictSource;

/// Deadline for a single criterion.
pub const DEFAULT_CRITERION_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for a single meta-evaluation verdict.
pub const DEFAULT_VERDICT_TIMEOUT: Duration = Duration::from_secs(300);

/// Verdict recorded for a meta-evaluation trial that produced none.
pub const ERROR_VERDICT: &str = "ERROR";

/// Upper bound on result pre-allocation; `k` comes from untrusted input.
const MAX_PREALLOCATED_TRIALS: usize = 1024;

/// How a single criterion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionStatus {
    Passed,
    Failed,
    /// Grader was not applicable; neutral for the trial outcome.
    Skipped,
    TimedOut,
    /// Grader raised an error or its task died.
    Errored,
    UnknownGrader,
    /// Unknown criterion type, unparsable check, or a type the grader
    /// cannot serve.
    Misconfigured,
}

impl CriterionStatus {
    pub fn counts_as_pass(self) -> bool {
        matches!(self, Self::Passed | Self::Skipped)
    }
}

/// Attributable result of one criterion in one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionOutcome {
    pub check: String,
    pub criterion_type: CriterionType,
    pub status: CriterionStatus,
    /// Grader score in 0–100; `None` when skipped or no grade was produced.
    pub score: Option<f64>,
    pub reason: String,
    pub duration_ms: u64,
}

/// Result of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    /// 1-based trial number.
    pub trial: usize,
    pub passed: bool,
    /// Mean score over non-skipped criteria (ungraded ones count as 0).
    pub score: Option<f64>,
    /// Why the trial failed; `None` when it passed.
    pub reason: Option<String>,
    pub criteria: Vec<CriterionOutcome>,
    pub duration_ms: u64,
}

impl TrialResult {
    fn from_outcomes(trial: usize, criteria: Vec<CriterionOutcome>, duration_ms: u64) -> Self {
        let graded: Vec<f64> = criteria
            .iter()
            .filter(|c| c.status != CriterionStatus::Skipped)
            .map(|c| c.score.unwrap_or(0.0))
            .collect();
        let score = (!graded.is_empty()).then(|| graded.iter().sum::<f64>() / graded.len() as f64);

        let failures: Vec<String> = criteria
            .iter()
            .filter(|c| !c.status.counts_as_pass())
            .map(|c| format!("{}: {}", c.check, c.reason))
            .collect();

        Self {
            trial,
            passed: failures.is_empty(),
            score,
            reason: (!failures.is_empty()).then(|| failures.join("; ")),
            criteria,
            duration_ms,
        }
    }

    fn aborted(trial: usize, reason: String, duration_ms: u64) -> Self {
        Self {
            trial,
            passed: false,
            score: None,
            reason: Some(reason),
            criteria: Vec::new(),
            duration_ms,
        }
    }
}

/// Per-trial pass/fail booleans.
pub fn passes(results: &[TrialResult]) -> Vec<bool> {
    results.iter().map(|r| r.passed).collect()
}

/// Outcome of a meta-evaluation over several test cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEvaluation {
    pub cases: Vec<CaseVerdicts>,
    pub metrics: Metrics,
}

/// Executes criteria and verdict trials against injected collaborators.
pub struct TrialRunner {
    registry: Arc<GraderRegistry>,
    contexts: Arc<dyn ContextProvider>,
    criterion_timeout: Duration,
    verdict_timeout: Duration,
}

impl TrialRunner {
    pub fn new(registry: Arc<GraderRegistry>, contexts: Arc<dyn ContextProvider>) -> Self {
        Self {
            registry,
            contexts,
            criterion_timeout: DEFAULT_CRITERION_TIMEOUT,
            verdict_timeout: DEFAULT_VERDICT_TIMEOUT,
        }
    }

    pub fn with_criterion_timeout(mut self, timeout: Duration) -> Self {
        self.criterion_timeout = timeout;
        self
    }

    pub fn with_verdict_timeout(mut self, timeout: Duration) -> Self {
        self.verdict_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &GraderRegistry {
        &self.registry
    }

    /// Run every criterion of `case` in `k` sequential trials.
    pub async fn run_evaluation(&self, case: &FailureCase, k: usize) -> Vec<TrialResult> {
        let run_id = Uuid::new_v4().to_string();
        async {
            let mut results = Vec::with_capacity(k.min(MAX_PREALLOCATED_TRIALS));
            for trial in 1..=k {
                results.push(self.run_trial(case, trial, k).await);
            }
            results
        }
        .instrument(obs::eval_span(&case.id, &run_id))
        .await
    }

    async fn run_trial(&self, case: &FailureCase, trial: usize, k: usize) -> TrialResult {
        let started = Instant::now();
        obs::emit_trial_started(&case.id, trial, k);
        METRICS.inc_trials_run();

        let guard = match self.contexts.acquire() {
            Ok(context) => ContextGuard::new(context),
            Err(err) => {
                obs::emit_context_unavailable(&case.id, trial, &err);
                return TrialResult::aborted(
                    trial,
                    format!("isolated context unavailable: {err}"),
                    elapsed_ms(started),
                );
            }
        };

        let mut outcomes = Vec::with_capacity(case.eval_criteria.len());
        for criterion in &case.eval_criteria {
            outcomes.push(self.run_criterion(case, criterion, guard.working_dir()).await);
        }

        let working_dir = guard.working_dir().to_path_buf();
        if let Err(err) = guard.release() {
            obs::emit_context_cleanup_error(&working_dir, &err);
        }

        let result = TrialResult::from_outcomes(trial, outcomes, elapsed_ms(started));
        obs::emit_trial_finished(&case.id, trial, result.passed, result.duration_ms);
        result
    }

    async fn run_criterion(
        &self,
        case: &FailureCase,
        criterion: &EvalCriterion,
        working_dir: &Path,
    ) -> CriterionOutcome {
        let started = Instant::now();
        let check = criterion.check.to_string();
        let (status, score, reason) = self
            .evaluate_criterion(case, criterion, &check, working_dir)
            .await;

        CriterionOutcome {
            check,
            criterion_type: criterion.criterion_type.clone(),
            status,
            score,
            reason,
            duration_ms: elapsed_ms(started),
        }
    }

    async fn evaluate_criterion(
        &self,
        case: &FailureCase,
        criterion: &EvalCriterion,
        check: &str,
        working_dir: &Path,
    ) -> (CriterionStatus, Option<f64>, String) {
        if let CriterionType::Unknown(raw) = &criterion.criterion_type {
            let reason = format!("unknown criterion type {raw:?}");
            obs::emit_criterion_misconfigured(check, &reason);
            return (CriterionStatus::Misconfigured, None, reason);
        }

        let parsed = match criterion.check.as_parsed() {
            Ok(parsed) => parsed,
            Err(err) => {
                let reason = err.to_string();
                obs::emit_criterion_misconfigured(check, &reason);
                return (CriterionStatus::Misconfigured, None, reason);
            }
        };

        let name = &parsed.grader_name;
        let Some(grader) = self.registry.get(name) else {
            obs::emit_unknown_grader(check, name);
            return (
                CriterionStatus::UnknownGrader,
                None,
                format!("unknown grader {name:?}"),
            );
        };

        if !grader.kind().accepts(&criterion.criterion_type) {
            let reason = format!(
                "{} criterion cannot use {} grader {name:?}",
                criterion.criterion_type,
                grader.kind()
            );
            obs::emit_criterion_misconfigured(check, &reason);
            return (CriterionStatus::Misconfigured, None, reason);
        }

        let handle: JoinHandle<GraderResult<Graded>> = match grader.clone() {
            Grader::Code(grader) => {
                let input = GradeInput {
                    task_id: case.id.clone(),
                    task_category: case.category.clone(),
                    changed_files: case.evidence.changed_files.clone(),
                    working_dir: working_dir.to_path_buf(),
                    argument: parsed.argument.clone(),
                };
                tokio::task::spawn_blocking(move || {
                    Ok(Graded::from(grade_code(grader.as_ref(), &input)))
                })
            }
            Grader::Model(grader) => {
                let content = case.evidence.what_was_built.clone();
                let context = model_context(case, parsed.argument.as_deref());
                tokio::spawn(grade_model(grader, content, context))
            }
        };

        match race_deadline(self.criterion_timeout, handle, check).await {
            Raced::Done(Ok(graded)) if graded.skipped => {
                (CriterionStatus::Skipped, None, graded.message)
            }
            Raced::Done(Ok(graded)) if graded.passed => {
                (CriterionStatus::Passed, graded.score, graded.message)
            }
            Raced::Done(Ok(graded)) => {
                obs::emit_criterion_failed(check, &graded.message);
                (CriterionStatus::Failed, graded.score, graded.message)
            }
            Raced::Done(Err(err)) => {
                METRICS.inc_grader_errors();
                obs::emit_grader_error(check, &err);
                (CriterionStatus::Errored, None, err.to_string())
            }
            Raced::Panicked(reason) => {
                METRICS.inc_grader_errors();
                obs::emit_grader_error(check, &reason);
                (CriterionStatus::Errored, None, reason)
            }
            Raced::TimedOut => {
                let limit_ms = duration_ms(self.criterion_timeout);
                METRICS.inc_criteria_timed_out();
                obs::emit_criterion_timeout(check, limit_ms);
                (
                    CriterionStatus::TimedOut,
                    None,
                    format!("grader did not finish within {limit_ms}ms"),
                )
            }
        }
    }

    /// Collect `k` verdicts for `test`, one per sequential trial.
    ///
    /// A trial that errors, times out or cannot get a context contributes
    /// [`ERROR_VERDICT`].
    pub async fn run_verdicts(
        &self,
        test: &TestCase,
        k: usize,
        source: Arc<dyn VerdictSource>,
    ) -> Vec<String> {
        let run_id = Uuid::new_v4().to_string();
        async {
            let mut verdicts = Vec::with_capacity(k.min(MAX_PREALLOCATED_TRIALS));
            for trial in 1..=k {
                verdicts.push(self.run_verdict_trial(test, trial, k, source.clone()).await);
            }
            verdicts
        }
        .instrument(obs::eval_span(&test.id, &run_id))
        .await
    }

    async fn run_verdict_trial(
        &self,
        test: &TestCase,
        trial: usize,
        k: usize,
        source: Arc<dyn VerdictSource>,
    ) -> String {
        let started = Instant::now();
        obs::emit_trial_started(&test.id, trial, k);
        METRICS.inc_trials_run();

        let guard = match self.contexts.acquire() {
            Ok(context) => ContextGuard::new(context),
            Err(err) => {
                obs::emit_context_unavailable(&test.id, trial, &err);
                return ERROR_VERDICT.to_string();
            }
        };

        let handle = {
            let test = test.clone();
            let working_dir = guard.working_dir().to_path_buf();
            tokio::spawn(async move { source.verdict(&test, &working_dir).await })
        };

        let label = format!("{}#{trial}", test.id);
        let verdict = match race_deadline(self.verdict_timeout, handle, &label).await {
            Raced::Done(Ok(verdict)) => verdict,
            Raced::Done(Err(err)) => {
                METRICS.inc_grader_errors();
                obs::emit_grader_error(&label, &err);
                ERROR_VERDICT.to_string()
            }
            Raced::Panicked(reason) => {
                METRICS.inc_grader_errors();
                obs::emit_grader_error(&label, &reason);
                ERROR_VERDICT.to_string()
            }
            Raced::TimedOut => {
                METRICS.inc_criteria_timed_out();
                obs::emit_criterion_timeout(&label, duration_ms(self.verdict_timeout));
                ERROR_VERDICT.to_string()
            }
        };

        let working_dir = guard.working_dir().to_path_buf();
        if let Err(err) = guard.release() {
            obs::emit_context_cleanup_error(&working_dir, &err);
        }

        obs::emit_trial_finished(&test.id, trial, verdict == test.expected, elapsed_ms(started));
        verdict
    }

    /// Run every test case through `source` and aggregate the verdicts.
    ///
    /// Each case runs `test.effective_k(default_k)` trials.
    pub async fn evaluate_test_cases(
        &self,
        tests: &[TestCase],
        default_k: usize,
        source: Arc<dyn VerdictSource>,
    ) -> MetaEvaluation {
        let mut cases = Vec::with_capacity(tests.len());
        for test in tests {
            let verdicts = self
                .run_verdicts(test, test.effective_k(default_k), source.clone())
                .await;
            let case = CaseVerdicts::new(test.id.clone(), test.expected.clone(), verdicts);
            obs::emit_case_verdicts(
                &case.test_id,
                case.majority().as_deref(),
                case.is_correct(),
                case.is_consistent(),
            );
            cases.push(case);
        }

        let metrics = compute_metrics(&cases);
        MetaEvaluation { cases, metrics }
    }
}

/// Grader output normalised across both grader variants.
struct Graded {
    passed: bool,
    skipped: bool,
    score: Option<f64>,
    message: String,
}

impl From<GradeResult> for Graded {
    fn from(result: GradeResult) -> Self {
        Self {
            passed: result.passed,
            skipped: result.skipped,
            score: (!result.skipped).then_some(result.score),
            message: result.skip_reason.unwrap_or(result.details),
        }
    }
}

async fn grade_model(
    grader: Arc<dyn ModelGrader>,
    content: String,
    context: GradeContext,
) -> GraderResult<Graded> {
    match grader.is_applicable(&content, &context) {
        Applicability::NotApplicable { reason } => Ok(Graded {
            passed: true,
            skipped: true,
            score: None,
            message: reason,
        }),
        Applicability::Applicable => {
            let result = grader.grade(&content, &context).await?;
            Ok(Graded {
                passed: result.passed,
                skipped: false,
                score: Some(crate::grader::clamp_score(result.score)),
                message: result.message,
            })
        }
    }
}

fn model_context(case: &FailureCase, argument: Option<&str>) -> GradeContext {
    let mut context = GradeContext::new();
    context.insert(CONTEXT_TASK_ID.to_string(), case.id.clone());
    context.insert(CONTEXT_CATEGORY.to_string(), case.category.clone());
    context.insert(CONTEXT_TASK_SPEC.to_string(), case.evidence.task_spec.clone());
    if let Some(argument) = argument {
        context.insert(CONTEXT_ARGUMENT.to_string(), argument.to_string());
    }
    context
}

enum Raced<T> {
    Done(T),
    Panicked(String),
    TimedOut,
}

/// Wait for `handle` or the deadline, whichever comes first.
///
/// On timeout the task keeps running detached; its eventual result is
/// dropped and counted.
async fn race_deadline<T: Send + 'static>(
    deadline: Duration,
    mut handle: JoinHandle<T>,
    label: &str,
) -> Raced<T> {
    match tokio::time::timeout(deadline, &mut handle).await {
        Ok(Ok(value)) => Raced::Done(value),
        Ok(Err(join_err)) => Raced::Panicked(format!("grader task failed: {join_err}")),
        Err(_elapsed) => {
            let label = label.to_string();
            tokio::spawn(async move {
                if handle.await.is_ok() {
                    METRICS.inc_late_results_discarded();
                    obs::emit_late_result_discarded(&label);
                }
            });
            Raced::TimedOut
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    duration_ms(started.elapsed())
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
