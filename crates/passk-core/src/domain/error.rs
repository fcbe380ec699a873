//! Domain-level error taxonomy for passk.

/// Errors produced while parsing a criterion check string such as
/// `"file-exists(test.txt)"`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckParseError {
    #[error("criterion check must not be empty")]
    Empty,

    #[error("criterion check {check:?} has an empty grader name")]
    EmptyName { check: String },

    #[error("criterion check {check:?} has an unterminated argument list")]
    Unterminated { check: String },

    #[error("criterion check {check:?} has trailing input after ')'")]
    TrailingInput { check: String },
}

/// passk domain errors.
#[derive(Debug, thiserror::Error)]
pub enum PasskError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid criterion check: {0}")]
    InvalidCheck(#[from] CheckParseError),

    #[error("grader registered twice: {0}")]
    DuplicateGrader(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for passk domain operations.
pub type Result<T> = std::result::Result<T, PasskError>;
