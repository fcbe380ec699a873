//! Agent/LLM invocation boundary.
//!
//! Model-based graders and verdict sources only see [`CompletionClient`].
//! [`CommandCompletionClient`] is the stock implementation: it pipes the
//! prompt into an external agent program and reads the reply from stdout,
//! with a per-attempt timeout and exponential-backoff retries.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Longest pause between two attempts, however many retries came before.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Per-call invocation controls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionOptions {
    /// Maximum wall-clock time for a single attempt (milliseconds).
    pub timeout_ms: u64,
    /// Maximum number of retries (0 = run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (milliseconds).
    pub backoff_base_ms: u64,
    /// Model identifier forwarded to the agent, if any.
    pub model: Option<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 120_000,
            max_retries: 2,
            backoff_base_ms: 500,
            model: None,
        }
    }
}

/// Errors surfaced by a [`CompletionClient`].
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("agent invocation timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("agent invocation failed after {attempts} attempt(s): {reason}")]
    Failed { attempts: u32, reason: String },

    #[error("failed to spawn agent program {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("agent returned an empty reply")]
    EmptyReply,
}

/// A potentially slow, potentially failing, non-deterministic text completer.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError>;
}

/// Runs an external agent program once per attempt.
///
/// The prompt is written to the child's stdin; its stdout is the reply.
/// Children are killed when an attempt times out.
#[derive(Debug, Clone)]
pub struct CommandCompletionClient {
    program: String,
    args: Vec<String>,
    model_flag: Option<String>,
}

impl CommandCompletionClient {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            model_flag: None,
        }
    }

    /// Flag used to pass `CompletionOptions::model` (e.g. `--model`).
    pub fn with_model_flag(mut self, flag: impl Into<String>) -> Self {
        self.model_flag = Some(flag.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, options: &CompletionOptions) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let (Some(flag), Some(model)) = (&self.model_flag, &options.model) {
            cmd.arg(flag).arg(model);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn attempt(&self, prompt: &str, options: &CompletionOptions) -> Attempt {
        let mut child = match self.command(options).spawn() {
            Ok(child) => child,
            Err(source) => {
                return Attempt::SpawnFailed(CompletionError::Spawn {
                    program: self.program.clone(),
                    source,
                })
            }
        };

        // Feed stdin from its own task so a chatty child cannot deadlock us
        // on a full stdout pipe.
        if let Some(mut stdin) = child.stdin.take() {
            let bytes = prompt.as_bytes().to_vec();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&bytes).await {
                    debug!(error = %e, "agent closed stdin early");
                }
            });
        }

        let limit = Duration::from_millis(options.timeout_ms);
        match tokio::time::timeout(limit, child.wait_with_output()).await {
            Err(_elapsed) => Attempt::TimedOut,
            Ok(Err(e)) => Attempt::Failed(e.to_string()),
            Ok(Ok(output)) if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Attempt::Failed(format!(
                    "exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ))
            }
            Ok(Ok(output)) => {
                let reply = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if reply.is_empty() {
                    Attempt::Failed("empty reply".to_string())
                } else {
                    Attempt::Reply(reply)
                }
            }
        }
    }
}

enum Attempt {
    Reply(String),
    Failed(String),
    TimedOut,
    SpawnFailed(CompletionError),
}

#[async_trait]
impl CompletionClient for CommandCompletionClient {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        let max_attempts = options.max_retries.saturating_add(1);
        let mut last_failure = String::new();

        for attempt in 1..=max_attempts {
            match self.attempt(prompt, options).await {
                Attempt::Reply(reply) => return Ok(reply),
                Attempt::SpawnFailed(err) => return Err(err),
                Attempt::TimedOut => {
                    warn!(
                        program = %self.program,
                        attempt,
                        limit_ms = options.timeout_ms,
                        "agent attempt timed out"
                    );
                    if attempt == max_attempts {
                        return Err(CompletionError::Timeout {
                            limit_ms: options.timeout_ms,
                        });
                    }
                }
                Attempt::Failed(reason) => {
                    warn!(
                        program = %self.program,
                        attempt,
                        reason = %reason,
                        "agent attempt failed"
                    );
                    last_failure = reason;
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(backoff_delay(options.backoff_base_ms, attempt)).await;
            }
        }

        Err(CompletionError::Failed {
            attempts: max_attempts,
            reason: last_failure,
        })
    }
}

/// Pause after the given 1-based attempt: `base * 2^(attempt - 1)`, capped
/// at [`MAX_BACKOFF`].
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor)).min(MAX_BACKOFF)
}

/// Extract the value of a `FIELD: value` line from a model reply.
///
/// Matching on the field name is case-insensitive; the first match wins.
pub fn extract_field(reply: &str, field: &str) -> Option<String> {
    reply.lines().find_map(|line| {
        let line = line.trim().trim_start_matches(['*', '#', '-', ' ']);
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case(field) {
            let value = value.trim().trim_matches('*').trim();
            (!value.is_empty()).then(|| value.to_string())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_options() -> CompletionOptions {
        CompletionOptions {
            timeout_ms: 5_000,
            max_retries: 1,
            backoff_base_ms: 10,
            model: None,
        }
    }

    #[test]
    fn test_completion_options_default() {
        let opts = CompletionOptions::default();
        assert_eq!(opts.timeout_ms, 120_000);
        assert_eq!(opts.max_retries, 2);
        assert_eq!(opts.backoff_base_ms, 500);
        assert!(opts.model.is_none());
    }

    #[test]
    fn test_backoff_delay_doubles_then_caps() {
        assert_eq!(backoff_delay(500, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(500, 3), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(500, 64), MAX_BACKOFF);
        assert_eq!(backoff_delay(u64::MAX, 2), MAX_BACKOFF);
        assert_eq!(backoff_delay(500, u32::MAX), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_command_client_survives_huge_retry_budget() {
        let client = CommandCompletionClient::new("passk-no-such-agent-binary", vec![]);
        let opts = CompletionOptions {
            max_retries: u32::MAX,
            ..fast_options()
        };
        let err = client.complete("ignored", &opts).await.unwrap_err();
        assert!(matches!(err, CompletionError::Spawn { .. }));
    }

    #[test]
    fn test_extract_field() {
        let reply = "Looks fine.\nVERDICT: PASS\nScore: 87\n";
        assert_eq!(extract_field(reply, "verdict").as_deref(), Some("PASS"));
        assert_eq!(extract_field(reply, "SCORE").as_deref(), Some("87"));
        assert_eq!(extract_field(reply, "reason"), None);
    }

    #[test]
    fn test_extract_field_tolerates_markdown() {
        let reply = "**VERDICT:** FAIL";
        assert_eq!(extract_field(reply, "verdict").as_deref(), Some("FAIL"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_client_echoes_stdin() {
        let client = CommandCompletionClient::new("cat", vec![]);
        let reply = client
            .complete("VERDICT: PASS", &fast_options())
            .await
            .expect("cat should echo");
        assert_eq!(reply, "VERDICT: PASS");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_client_reports_failure_after_retries() {
        let client = CommandCompletionClient::new("false", vec![]);
        let err = client.complete("ignored", &fast_options()).await.unwrap_err();
        match err {
            CompletionError::Failed { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_client_times_out() {
        let client = CommandCompletionClient::new("sleep", vec!["5".to_string()]);
        let opts = CompletionOptions {
            timeout_ms: 50,
            max_retries: 0,
            backoff_base_ms: 10,
            model: None,
        };
        let err = client.complete("ignored", &opts).await.unwrap_err();
        assert!(matches!(err, CompletionError::Timeout { limit_ms: 50 }));
    }

    #[tokio::test]
    async fn test_command_client_spawn_failure_is_not_retried() {
        let client = CommandCompletionClient::new("passk-no-such-agent-binary", vec![]);
        let err = client.complete("ignored", &fast_options()).await.unwrap_err();
        assert!(matches!(err, CompletionError::Spawn { .. }));
    }
}
