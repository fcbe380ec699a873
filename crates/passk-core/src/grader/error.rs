//! Error types for graders.

use crate::llm::CompletionError;

/// Errors a grader may raise while grading.
#[derive(Debug, thiserror::Error)]
pub enum GraderError {
    #[error("missing required context key: {key}")]
    MissingContext { key: String },

    #[error("model completion failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("unparsable model reply (no VERDICT line): {reply}")]
    UnparsableReply { reply: String },
}

/// Result type for grader operations.
pub type GraderResult<T> = std::result::Result<T, GraderError>;
