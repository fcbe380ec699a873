//! Error types for the sandbox module.

use std::path::PathBuf;

/// Errors produced while acquiring or releasing an isolated context.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to create isolated context: {0}")]
    Create(#[source] std::io::Error),

    #[error("failed to seed isolated context from {path}: {source}")]
    Seed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("seed directory {seed} contains the context directory {parent}")]
    SeedContainsContexts { seed: PathBuf, parent: PathBuf },

    #[error("failed to clean up isolated context at {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("isolated context at {path} was already released")]
    AlreadyReleased { path: PathBuf },
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
