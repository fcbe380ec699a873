//! Built-in model graders.
//!
//! Both graders prompt a [`CompletionClient`] and expect a reply containing
//! a `VERDICT: PASS|FAIL` line and, optionally, a `SCORE: n` line.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::{GraderError, GraderResult};
use super::{
    clamp_score, GradeContext, ModelGradeResult, ModelGrader, CONTEXT_ARGUMENT, CONTEXT_RUBRIC,
    CONTEXT_TASK_SPEC,
};
use crate::llm::{extract_field, CompletionClient, CompletionOptions};

const REPLY_FORMAT: &str = "Reply with a short justification followed by exactly these lines:\n\
VERDICT: PASS or FAIL\n\
SCORE: an integer from 0 to 100";

/// A model reply reduced to its verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub passed: bool,
    pub score: f64,
    /// Reply text minus the VERDICT/SCORE lines.
    pub reasoning: String,
}

/// Parse a grading reply. A missing or unrecognised verdict is an error.
pub fn parse_model_reply(reply: &str) -> GraderResult<ParsedReply> {
    let verdict = extract_field(reply, "verdict").map(|v| v.to_ascii_uppercase());
    let passed = match verdict.as_deref().and_then(|v| v.split_whitespace().next()) {
        Some("PASS") => true,
        Some("FAIL") => false,
        _ => {
            return Err(GraderError::UnparsableReply {
                reply: reply.to_string(),
            })
        }
    };

    let score = extract_field(reply, "score")
        .and_then(|s| s.trim_end_matches('%').split('/').next()?.trim().parse::<f64>().ok())
        .map(clamp_score)
        .unwrap_or(if passed { 100.0 } else { 0.0 });

    let reasoning = reply
        .lines()
        .filter(|line| {
            let upper = line.trim().trim_start_matches(['*', '#', '-', ' ']).to_ascii_uppercase();
            !upper.starts_with("VERDICT") && !upper.starts_with("SCORE")
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    Ok(ParsedReply {
        passed,
        score,
        reasoning,
    })
}

fn required<'a>(context: &'a GradeContext, key: &str) -> GraderResult<&'a str> {
    context
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| GraderError::MissingContext {
            key: key.to_string(),
        })
}

async fn ask(
    client: &dyn CompletionClient,
    options: &CompletionOptions,
    prompt: &str,
) -> GraderResult<ModelGradeResult> {
    let reply = client.complete(prompt, options).await?;
    let parsed = parse_model_reply(&reply)?;
    let message = if parsed.reasoning.is_empty() {
        format!("model returned {}", if parsed.passed { "PASS" } else { "FAIL" })
    } else {
        parsed.reasoning
    };
    Ok(ModelGradeResult {
        passed: parsed.passed,
        score: parsed.score,
        message,
        details: reply,
    })
}

/// `task-alignment`: does the built content implement the requested task?
///
/// Requires the `task_spec` context key.
pub struct TaskAlignmentGrader {
    client: Arc<dyn CompletionClient>,
    options: CompletionOptions,
}

impl TaskAlignmentGrader {
    pub fn new(client: Arc<dyn CompletionClient>, options: CompletionOptions) -> Self {
        Self { client, options }
    }
}

#[async_trait]
impl ModelGrader for TaskAlignmentGrader {
    fn name(&self) -> &str {
        "task-alignment"
    }

    async fn grade(&self, content: &str, context: &GradeContext) -> GraderResult<ModelGradeResult> {
        let task_spec = required(context, CONTEXT_TASK_SPEC)?;
        let prompt = format!(
            "You are reviewing an agent's work against its task.\n\n\
             ## Task specification\n{task_spec}\n\n\
             ## What was built\n{content}\n\n\
             Decide whether what was built fully implements the task specification.\n\
             {REPLY_FORMAT}"
        );
        ask(self.client.as_ref(), &self.options, &prompt).await
    }
}

/// `rubric(...)`: grade content against a rubric.
///
/// The rubric comes from the `rubric` context key, falling back to the
/// criterion argument.
pub struct RubricGrader {
    client: Arc<dyn CompletionClient>,
    options: CompletionOptions,
}

impl RubricGrader {
    pub fn new(client: Arc<dyn CompletionClient>, options: CompletionOptions) -> Self {
        Self { client, options }
    }
}

#[async_trait]
impl ModelGrader for RubricGrader {
    fn name(&self) -> &str {
        "rubric"
    }

    async fn grade(&self, content: &str, context: &GradeContext) -> GraderResult<ModelGradeResult> {
        let rubric = required(context, CONTEXT_RUBRIC)
            .or_else(|_| required(context, CONTEXT_ARGUMENT))
            .map_err(|_| GraderError::MissingContext {
                key: CONTEXT_RUBRIC.to_string(),
            })?;
        let prompt = format!(
            "Grade the following content against the rubric.\n\n\
             ## Rubric\n{rubric}\n\n\
             ## Content\n{content}\n\n\
             {REPLY_FORMAT}"
        );
        ask(self.client.as_ref(), &self.options, &prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CompletionError;
    use std::sync::Mutex;

    struct Scripted {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionClient for Scripted {
        async fn complete(
            &self,
            prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<String, CompletionError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    fn context(pairs: &[(&str, &str)]) -> GradeContext {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_model_reply() {
        let parsed = parse_model_reply("Solid work.\nVERDICT: PASS\nSCORE: 92").unwrap();
        assert!(parsed.passed);
        assert_eq!(parsed.score, 92.0);
        assert_eq!(parsed.reasoning, "Solid work.");

        let parsed = parse_model_reply("verdict: fail").unwrap();
        assert!(!parsed.passed);
        assert_eq!(parsed.score, 0.0);

        let parsed = parse_model_reply("VERDICT: PASS\nSCORE: 80/100").unwrap();
        assert_eq!(parsed.score, 80.0);
    }

    #[test]
    fn test_parse_model_reply_without_verdict() {
        let err = parse_model_reply("I think it is fine").unwrap_err();
        assert!(matches!(err, GraderError::UnparsableReply { .. }));

        let err = parse_model_reply("VERDICT: MAYBE").unwrap_err();
        assert!(matches!(err, GraderError::UnparsableReply { .. }));
    }

    #[tokio::test]
    async fn test_task_alignment_requires_task_spec() {
        let client = Scripted::new("VERDICT: PASS");
        let grader = TaskAlignmentGrader::new(client.clone(), CompletionOptions::default());

        let err = grader.grade("built it", &GradeContext::new()).await.unwrap_err();
        match err {
            GraderError::MissingContext { key } => assert_eq!(key, "task_spec"),
            other => panic!("expected MissingContext, got {other:?}"),
        }
        assert!(client.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_task_alignment_grades() {
        let client = Scripted::new("Matches the task.\nVERDICT: PASS\nSCORE: 88");
        let grader = TaskAlignmentGrader::new(client.clone(), CompletionOptions::default());

        let result = grader
            .grade("added /health endpoint", &context(&[("task_spec", "add a health check")]))
            .await
            .unwrap();

        assert!(result.passed);
        assert_eq!(result.score, 88.0);
        assert_eq!(result.message, "Matches the task.");
        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].contains("add a health check"));
        assert!(prompts[0].contains("added /health endpoint"));
    }

    #[tokio::test]
    async fn test_rubric_falls_back_to_argument() {
        let client = Scripted::new("VERDICT: FAIL");
        let grader = RubricGrader::new(client.clone(), CompletionOptions::default());

        let result = grader
            .grade("wall of text", &context(&[("argument", "be concise")]))
            .await
            .unwrap();
        assert!(!result.passed);
        assert_eq!(result.message, "model returned FAIL");

        let err = grader.grade("text", &GradeContext::new()).await.unwrap_err();
        assert!(matches!(err, GraderError::MissingContext { ref key } if key == "rubric"));
    }

    #[test]
    fn test_empty_content_not_applicable() {
        let grader =
            RubricGrader::new(Scripted::new("VERDICT: PASS"), CompletionOptions::default());
        assert!(!grader.is_applicable("   ", &GradeContext::new()).is_applicable());
        assert!(grader.is_applicable("x", &GradeContext::new()).is_applicable());
    }
}
