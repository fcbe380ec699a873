//! Verdict sources for meta-evaluation.
//!
//! A [`VerdictSource`] produces one verdict string per trial for a
//! [`TestCase`]. The runner collects k of them and hands them to the
//! aggregator.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::TestCase;
use crate::llm::{extract_field, CompletionClient, CompletionError, CompletionOptions};

#[async_trait]
pub trait VerdictSource: Send + Sync {
    /// Produce one verdict for `test`, working inside `working_dir`.
    async fn verdict(&self, test: &TestCase, working_dir: &Path)
        -> Result<String, CompletionError>;
}

/// Asks an agent for a verdict on the test input.
pub struct AgentVerdictSource {
    client: Arc<dyn CompletionClient>,
    options: CompletionOptions,
}

impl AgentVerdictSource {
    pub fn new(client: Arc<dyn CompletionClient>, options: CompletionOptions) -> Self {
        Self { client, options }
    }
}

#[async_trait]
impl VerdictSource for AgentVerdictSource {
    async fn verdict(
        &self,
        test: &TestCase,
        _working_dir: &Path,
    ) -> Result<String, CompletionError> {
        let prompt = format!(
            "{}\n\nEnd your answer with a single line of the form `VERDICT: <verdict>`.",
            test.input
        );
        let reply = self.client.complete(&prompt, &self.options).await?;
        parse_verdict(&reply).ok_or(CompletionError::EmptyReply)
    }
}

/// Normalise an agent reply to a verdict token.
///
/// Prefers a `VERDICT:` line; otherwise takes the first word of the first
/// non-empty line. The token is upper-cased with surrounding punctuation
/// stripped.
pub fn parse_verdict(reply: &str) -> Option<String> {
    let raw = extract_field(reply, "verdict")
        .or_else(|| reply.lines().map(str::trim).find(|l| !l.is_empty()).map(str::to_string))?;

    let token = raw
        .split_whitespace()
        .next()?
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        .to_ascii_uppercase();

    (!token.is_empty()).then_some(token)
}
