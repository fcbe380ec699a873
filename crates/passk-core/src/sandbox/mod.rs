//! Sandbox: isolated execution contexts for trials.
//!
//! Every trial runs inside a fresh workspace obtained from a
//! [`ContextProvider`] and released exactly once through a [`ContextGuard`],
//! whatever path the trial takes out of its scope.
//!
//! # Modules
//!
//! - [`context`]: `IsolatedContext`, `ContextProvider`, `ContextGuard`, `TempDirProvider`
//! - [`error`]: `SandboxError` / `SandboxResult`

pub mod context;
pub mod error;

pub use context::{ContextGuard, ContextProvider, IsolatedContext, TempDirContext, TempDirProvider};
pub use error::{SandboxError, SandboxResult};
