//! Grader abstraction.
//!
//! Two capability variants sit behind [`Grader`]:
//!
//! - [`CodeGrader`]: a pure, deterministic function of a [`GradeInput`]
//!   (task id, category, changed files, working directory).
//! - [`ModelGrader`]: grades free-text content against a context map by
//!   consulting a model; may fail, e.g. on a missing context key.
//!
//! Both expose applicability, one grading operation, and a name. A grader
//! that is not applicable must be reported as skipped, never as a failure,
//! and skipped results are left out of score averaging.

pub mod code;
pub mod error;
pub mod model;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::CriterionType;

pub use code::{FileContainsGrader, FileExistsGrader, NoTodoMarkersGrader, TestsExistGrader};
pub use error::{GraderError, GraderResult};
pub use model::{parse_model_reply, ParsedReply, RubricGrader, TaskAlignmentGrader};

/// Context handed to model graders (`task_spec`, `rubric`, ...).
pub type GradeContext = BTreeMap<String, String>;

/// Context key carrying the original task specification.
pub const CONTEXT_TASK_SPEC: &str = "task_spec";
/// Context key carrying a grading rubric.
pub const CONTEXT_RUBRIC: &str = "rubric";
/// Context key carrying the task identifier.
pub const CONTEXT_TASK_ID: &str = "task_id";
/// Context key carrying the task category.
pub const CONTEXT_CATEGORY: &str = "category";
/// Context key carrying the criterion argument, when one was given.
pub const CONTEXT_ARGUMENT: &str = "argument";

/// Input to a code grader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeInput {
    pub task_id: String,
    pub task_category: String,
    /// Paths relative to `working_dir`.
    pub changed_files: Vec<String>,
    pub working_dir: PathBuf,
    /// Argument from the criterion check, e.g. `test.txt` in `file-exists(test.txt)`.
    pub argument: Option<String>,
}

/// Whether a grader should run at all for a given input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Applicability {
    Applicable,
    NotApplicable { reason: String },
}

impl Applicability {
    pub fn not_applicable(reason: impl Into<String>) -> Self {
        Self::NotApplicable {
            reason: reason.into(),
        }
    }

    pub fn is_applicable(&self) -> bool {
        matches!(self, Self::Applicable)
    }
}

/// Outcome of a code grader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeResult {
    pub grader_name: String,
    pub passed: bool,
    /// Score in 0–100.
    pub score: f64,
    pub details: String,
    pub skipped: bool,
    pub skip_reason: Option<String>,
}

impl GradeResult {
    pub fn pass(grader_name: &str, details: impl Into<String>) -> Self {
        Self::scored(grader_name, true, 100.0, details)
    }

    pub fn fail(grader_name: &str, details: impl Into<String>) -> Self {
        Self::scored(grader_name, false, 0.0, details)
    }

    /// A graded result with an explicit score, clamped to 0–100.
    pub fn scored(grader_name: &str, passed: bool, score: f64, details: impl Into<String>) -> Self {
        Self {
            grader_name: grader_name.to_string(),
            passed,
            score: clamp_score(score),
            details: details.into(),
            skipped: false,
            skip_reason: None,
        }
    }

    pub fn skipped(grader_name: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            grader_name: grader_name.to_string(),
            passed: true,
            score: 0.0,
            details: format!("skipped: {reason}"),
            skipped: true,
            skip_reason: Some(reason),
        }
    }
}

/// Outcome of a model grader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelGradeResult {
    pub passed: bool,
    /// Score in 0–100.
    pub score: f64,
    pub message: String,
    /// Raw model reply, kept for attribution.
    pub details: String,
}

/// Deterministic, side-effect-free grader.
pub trait CodeGrader: Send + Sync {
    fn name(&self) -> &str;

    fn is_applicable(&self, _input: &GradeInput) -> Applicability {
        Applicability::Applicable
    }

    /// Called only when [`CodeGrader::is_applicable`] said so.
    fn grade(&self, input: &GradeInput) -> GradeResult;
}

/// Grader that consults a model.
#[async_trait]
pub trait ModelGrader: Send + Sync {
    fn name(&self) -> &str;

    fn is_applicable(&self, content: &str, _context: &GradeContext) -> Applicability {
        if content.trim().is_empty() {
            Applicability::not_applicable("nothing was built to grade")
        } else {
            Applicability::Applicable
        }
    }

    async fn grade(&self, content: &str, context: &GradeContext)
        -> GraderResult<ModelGradeResult>;
}

/// Which grader variant a registry entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraderKind {
    Code,
    Model,
}

impl GraderKind {
    /// Whether a criterion of `criterion_type` may be graded by this kind.
    pub fn accepts(self, criterion_type: &CriterionType) -> bool {
        matches!(
            (self, criterion_type),
            (Self::Code, CriterionType::CodeBased) | (Self::Model, CriterionType::ModelBased)
        )
    }
}

impl fmt::Display for GraderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code => f.write_str("code-based"),
            Self::Model => f.write_str("model-based"),
        }
    }
}

/// A registered grader of either variant.
#[derive(Clone)]
pub enum Grader {
    Code(Arc<dyn CodeGrader>),
    Model(Arc<dyn ModelGrader>),
}

impl Grader {
    pub fn code(grader: impl CodeGrader + 'static) -> Self {
        Self::Code(Arc::new(grader))
    }

    pub fn model(grader: impl ModelGrader + 'static) -> Self {
        Self::Model(Arc::new(grader))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Code(g) => g.name(),
            Self::Model(g) => g.name(),
        }
    }

    pub fn kind(&self) -> GraderKind {
        match self {
            Self::Code(_) => GraderKind::Code,
            Self::Model(_) => GraderKind::Model,
        }
    }
}

impl fmt::Debug for Grader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grader")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .finish()
    }
}

/// Run a code grader, honouring its applicability check.
pub fn grade_code(grader: &dyn CodeGrader, input: &GradeInput) -> GradeResult {
    match grader.is_applicable(input) {
        Applicability::Applicable => grader.grade(input),
        Applicability::NotApplicable { reason } => GradeResult::skipped(grader.name(), reason),
    }
}

pub(crate) fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}
