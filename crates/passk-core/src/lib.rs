//! passk Core Library
//!
//! Grades agents against documented expectations and measures whether their
//! behavior is both correct and repeatable across k trials.
//!
//! Pieces, leaves first: graders and their registry, isolated execution
//! contexts, the trial runner, verdict aggregation and the trend engine.

pub mod aggregate;
pub mod config;
pub mod domain;
pub mod grader;
pub mod llm;
pub mod metrics;
pub mod obs;
pub mod registry;
pub mod runner;
pub mod sandbox;
pub mod telemetry;
pub mod trend;
pub mod verdict;

pub use aggregate::{
    all_runs_consistent, compute_metrics, majority_verdict, CaseVerdicts, Metrics, TrialStats,
};
pub use config::{AgentConfig, EvalConfig};
pub use domain::{
    CheckParseError, CheckSpec, CriterionCheck, CriterionType, EvalCriterion, Evidence,
    FailureCase, PasskError, Result, TestCase, DEFAULT_K,
};
pub use grader::{
    Applicability, CodeGrader, GradeContext, GradeInput, GradeResult, Grader, GraderError,
    GraderKind, ModelGradeResult, ModelGrader,
};
pub use llm::{CommandCompletionClient, CompletionClient, CompletionError, CompletionOptions};
pub use registry::{GraderRegistry, GraderRegistryBuilder};
pub use runner::{
    passes, CriterionOutcome, CriterionStatus, MetaEvaluation, TrialResult, TrialRunner,
    ERROR_VERDICT,
};
pub use sandbox::{ContextGuard, ContextProvider, IsolatedContext, SandboxError, TempDirProvider};
pub use trend::{
    calculate_delta, compare_latest_snapshots, exceeds_regression_threshold, Direction,
    SnapshotComparison, TrendData, TrendError,
};
pub use verdict::{AgentVerdictSource, VerdictSource};

pub use metrics::METRICS;
pub use telemetry::init_tracing;

/// passk version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
