//! Domain models for passk.
//!
//! Canonical definitions for the evaluation inputs:
//! - `FailureCase`: a captured agent failure plus the criteria that re-check it
//! - `EvalCriterion`: one code-based or model-based check
//! - `TestCase`: a meta-evaluation input with a known expected verdict

pub mod case;
pub mod error;

pub use case::{
    CheckSpec, CriterionCheck, CriterionType, EvalCriterion, Evidence, FailureCase, TestCase,
    DEFAULT_K,
};
pub use error::{CheckParseError, PasskError, Result};
