//! Evaluation inputs: failure cases, their criteria, and meta-evaluation test cases.
//!
//! These types are supplied by an external loader and only read by the
//! runner. Criterion check strings are parsed once, during deserialization,
//! into a [`CheckSpec`]. A check that does not parse is kept with its error
//! so that only that criterion fails, not the whole case.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::CheckParseError;

/// Trial count used when a test case leaves `k` unset or non-positive.
pub const DEFAULT_K: usize = 5;

/// Kind of grader a criterion expects.
///
/// Unrecognised type strings are kept as [`CriterionType::Unknown`] so the
/// criterion fails closed at run time instead of rejecting the whole case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CriterionType {
    CodeBased,
    ModelBased,
    Unknown(String),
}

impl CriterionType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::CodeBased => "code-based",
            Self::ModelBased => "model-based",
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for CriterionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for CriterionType {
    fn from(raw: &str) -> Self {
        match raw {
            "code-based" => Self::CodeBased,
            "model-based" => Self::ModelBased,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl Serialize for CriterionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CriterionType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

/// A parsed criterion check: grader name plus optional argument.
///
/// The wire encoding is `"name"` or `"name(argument)"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CriterionCheck {
    pub grader_name: String,
    pub argument: Option<String>,
}

impl CriterionCheck {
    pub fn new(grader_name: impl Into<String>) -> Self {
        Self {
            grader_name: grader_name.into(),
            argument: None,
        }
    }
}

impl FromStr for CriterionCheck {
    type Err = CheckParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let check = raw.trim();
        if check.is_empty() {
            return Err(CheckParseError::Empty);
        }

        let Some(open) = check.find('(') else {
            return Ok(Self::new(check));
        };

        let name = check[..open].trim();
        if name.is_empty() {
            return Err(CheckParseError::EmptyName {
                check: check.to_string(),
            });
        }

        let rest = &check[open + 1..];
        let Some(close) = rest.rfind(')') else {
            return Err(CheckParseError::Unterminated {
                check: check.to_string(),
            });
        };
        if !rest[close + 1..].trim().is_empty() {
            return Err(CheckParseError::TrailingInput {
                check: check.to_string(),
            });
        }

        let argument = rest[..close].trim();
        Ok(Self {
            grader_name: name.to_string(),
            argument: (!argument.is_empty()).then(|| argument.to_string()),
        })
    }
}

impl fmt::Display for CriterionCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.argument {
            Some(arg) => write!(f, "{}({})", self.grader_name, arg),
            None => f.write_str(&self.grader_name),
        }
    }
}

impl Serialize for CriterionCheck {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CriterionCheck {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A criterion check as loaded from a case file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckSpec {
    Parsed(CriterionCheck),
    /// The raw check text and why it did not parse.
    Invalid { raw: String, error: CheckParseError },
}

impl CheckSpec {
    pub fn parse(raw: &str) -> Self {
        match raw.parse() {
            Ok(check) => Self::Parsed(check),
            Err(error) => Self::Invalid {
                raw: raw.to_string(),
                error,
            },
        }
    }

    pub fn as_parsed(&self) -> Result<&CriterionCheck, &CheckParseError> {
        match self {
            Self::Parsed(check) => Ok(check),
            Self::Invalid { error, .. } => Err(error),
        }
    }
}

impl From<CriterionCheck> for CheckSpec {
    fn from(check: CriterionCheck) -> Self {
        Self::Parsed(check)
    }
}

impl fmt::Display for CheckSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parsed(check) => fmt::Display::fmt(check, f),
            Self::Invalid { raw, .. } => f.write_str(raw),
        }
    }
}

impl Serialize for CheckSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CheckSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// One atomic pass/fail check attached to a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalCriterion {
    #[serde(rename = "type")]
    pub criterion_type: CriterionType,
    pub check: CheckSpec,
}

impl EvalCriterion {
    pub fn code(check: impl Into<CheckSpec>) -> Self {
        Self {
            criterion_type: CriterionType::CodeBased,
            check: check.into(),
        }
    }

    pub fn model(check: impl Into<CheckSpec>) -> Self {
        Self {
            criterion_type: CriterionType::ModelBased,
            check: check.into(),
        }
    }
}

/// What the agent was asked to do and what it produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub task_spec: String,
    pub what_was_built: String,
    /// Paths, relative to the working directory, touched by the agent.
    #[serde(default)]
    pub changed_files: Vec<String>,
}

/// A captured agent failure with the criteria used to re-check it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureCase {
    pub id: String,
    pub category: String,
    pub evidence: Evidence,
    #[serde(default)]
    pub eval_criteria: Vec<EvalCriterion>,
}

impl FailureCase {
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            evidence: Evidence::default(),
            eval_criteria: Vec::new(),
        }
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn with_criterion(mut self, criterion: EvalCriterion) -> Self {
        self.eval_criteria.push(criterion);
        self
    }
}

/// A meta-evaluation case: an input whose verdict is known in advance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub name: String,
    pub input: String,
    pub expected: String,
    /// Requested trial count; see [`TestCase::effective_k`].
    #[serde(default)]
    pub k: Option<i64>,
    #[serde(default)]
    pub rationale: String,
}

impl TestCase {
    /// Number of trials to run, falling back to `default_k` when `k` is
    /// unset or non-positive.
    pub fn effective_k(&self, default_k: usize) -> usize {
        match self.k {
            Some(k) if k > 0 => usize::try_from(k).unwrap_or(default_k),
            _ => default_k,
        }
    }
}
