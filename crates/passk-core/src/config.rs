//! Evaluation configuration.
//!
//! Loaded from an optional TOML file, then overridden from `PASSK_*`
//! environment variables, then validated.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{PasskError, Result, DEFAULT_K};
use crate::llm::{CommandCompletionClient, CompletionOptions};
use crate::telemetry::{is_json_format, LOG_FORMAT_ENV};

pub const CRITERION_TIMEOUT_ENV: &str = "PASSK_CRITERION_TIMEOUT_SECS";
pub const DEFAULT_K_ENV: &str = "PASSK_DEFAULT_K";
pub const REGRESSION_THRESHOLD_ENV: &str = "PASSK_REGRESSION_THRESHOLD";
pub const AGENT_PROGRAM_ENV: &str = "PASSK_AGENT_PROGRAM";

/// Most retries an agent invocation may be configured with.
pub const MAX_AGENT_RETRIES: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub criterion_timeout_secs: u64,
    /// Deadline for one meta-evaluation verdict.
    pub verdict_timeout_secs: u64,
    pub default_k: usize,
    pub regression_threshold_percent: f64,
    pub log_json: bool,
    pub agent: Option<AgentConfig>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            criterion_timeout_secs: 60,
            verdict_timeout_secs: 300,
            default_k: DEFAULT_K,
            regression_threshold_percent: 5.0,
            log_json: false,
            agent: None,
        }
    }
}

/// External agent command used by model graders and meta-evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Flag placed before the model name, e.g. `--model`.
    pub model_flag: Option<String>,
    pub model: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let options = CompletionOptions::default();
        Self {
            program: String::new(),
            args: Vec::new(),
            model_flag: None,
            model: None,
            timeout_ms: options.timeout_ms,
            max_retries: options.max_retries,
            backoff_base_ms: options.backoff_base_ms,
        }
    }
}

impl AgentConfig {
    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            timeout_ms: self.timeout_ms,
            max_retries: self.max_retries,
            backoff_base_ms: self.backoff_base_ms,
            model: self.model.clone(),
        }
    }

    pub fn client(&self) -> CommandCompletionClient {
        let client = CommandCompletionClient::new(self.program.clone(), self.args.clone());
        match &self.model_flag {
            Some(flag) => client.with_model_flag(flag.clone()),
            None => client,
        }
    }
}

impl EvalConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Read a TOML file, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(CRITERION_TIMEOUT_ENV) {
            self.criterion_timeout_secs = parse_env(CRITERION_TIMEOUT_ENV, &raw)?;
        }
        if let Some(raw) = lookup(DEFAULT_K_ENV) {
            self.default_k = parse_env(DEFAULT_K_ENV, &raw)?;
        }
        if let Some(raw) = lookup(REGRESSION_THRESHOLD_ENV) {
            self.regression_threshold_percent = parse_env(REGRESSION_THRESHOLD_ENV, &raw)?;
        }
        if let Some(raw) = lookup(LOG_FORMAT_ENV) {
            self.log_json = is_json_format(&raw);
        }
        if let Some(program) = lookup(AGENT_PROGRAM_ENV).filter(|p| !p.trim().is_empty()) {
            self.agent.get_or_insert_with(AgentConfig::default).program = program;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.criterion_timeout_secs == 0 {
            return Err(invalid("criterion_timeout_secs must be positive"));
        }
        if self.verdict_timeout_secs == 0 {
            return Err(invalid("verdict_timeout_secs must be positive"));
        }
        if self.default_k == 0 {
            return Err(invalid("default_k must be positive"));
        }
        if self.regression_threshold_percent.is_nan() || self.regression_threshold_percent < 0.0 {
            return Err(invalid("regression_threshold_percent must be non-negative"));
        }
        if let Some(agent) = &self.agent {
            if agent.program.trim().is_empty() {
                return Err(invalid("agent.program must not be empty"));
            }
            if agent.max_retries > MAX_AGENT_RETRIES {
                return Err(PasskError::InvalidConfig(format!(
                    "agent.max_retries must be at most {MAX_AGENT_RETRIES}"
                )));
            }
        }
        Ok(())
    }

    pub fn criterion_timeout(&self) -> Duration {
        Duration::from_secs(self.criterion_timeout_secs)
    }

    pub fn verdict_timeout(&self) -> Duration {
        Duration::from_secs(self.verdict_timeout_secs)
    }

    /// Completion options for the configured agent, or the defaults.
    pub fn completion_options(&self) -> CompletionOptions {
        self.agent
            .as_ref()
            .map(AgentConfig::completion_options)
            .unwrap_or_default()
    }
}

fn invalid(message: &str) -> PasskError {
    PasskError::InvalidConfig(message.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| PasskError::InvalidConfig(format!("{key}={raw:?} is not a valid value")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EvalConfig::default();
        assert_eq!(config.criterion_timeout(), Duration::from_secs(60));
        assert_eq!(config.default_k, 5);
        assert_eq!(config.regression_threshold_percent, 5.0);
        assert!(config.validate().is_ok());
        assert_eq!(config.completion_options(), CompletionOptions::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = EvalConfig::from_toml_str(
            r#"
            default_k = 3

            [agent]
            program = "claude"
            args = ["-p"]
            model = "fast"
            max_retries = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.default_k, 3);
        assert_eq!(config.criterion_timeout_secs, 60);

        let agent = config.agent.as_ref().unwrap();
        assert_eq!(agent.program, "claude");
        assert_eq!(agent.timeout_ms, 120_000);

        let options = config.completion_options();
        assert_eq!(options.max_retries, 0);
        assert_eq!(options.model.as_deref(), Some("fast"));
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        let err = EvalConfig::from_toml_str("default_k = \"many\"").unwrap_err();
        assert!(matches!(err, PasskError::ConfigParse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EvalConfig::default();
        config
            .apply_env_from(lookup(&[
                (CRITERION_TIMEOUT_ENV, "5"),
                (DEFAULT_K_ENV, "9"),
                (REGRESSION_THRESHOLD_ENV, "2.5"),
                (LOG_FORMAT_ENV, "JSON"),
                (AGENT_PROGRAM_ENV, "my-agent"),
            ]))
            .unwrap();
        assert_eq!(config.criterion_timeout_secs, 5);
        assert_eq!(config.default_k, 9);
        assert_eq!(config.regression_threshold_percent, 2.5);
        assert!(config.log_json);
        assert_eq!(config.agent.unwrap().program, "my-agent");
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = EvalConfig::default();
        let err = config
            .apply_env_from(lookup(&[(DEFAULT_K_ENV, "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains(DEFAULT_K_ENV));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_k = EvalConfig {
            default_k: 0,
            ..EvalConfig::default()
        };
        assert!(matches!(zero_k.validate(), Err(PasskError::InvalidConfig(_))));

        let zero_timeout = EvalConfig {
            criterion_timeout_secs: 0,
            ..EvalConfig::default()
        };
        assert!(zero_timeout.validate().is_err());

        let negative = EvalConfig {
            regression_threshold_percent: -1.0,
            ..EvalConfig::default()
        };
        assert!(negative.validate().is_err());

        let nan = EvalConfig {
            regression_threshold_percent: f64::NAN,
            ..EvalConfig::default()
        };
        assert!(nan.validate().is_err());

        let empty_agent = EvalConfig {
            agent: Some(AgentConfig::default()),
            ..EvalConfig::default()
        };
        assert!(empty_agent.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_agent_retries() {
        let mut agent = AgentConfig {
            program: "my-agent".to_string(),
            max_retries: MAX_AGENT_RETRIES,
            ..AgentConfig::default()
        };
        let config = EvalConfig {
            agent: Some(agent.clone()),
            ..EvalConfig::default()
        };
        assert!(config.validate().is_ok());

        agent.max_retries = u32::MAX;
        let config = EvalConfig {
            agent: Some(agent),
            ..EvalConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passk.toml");
        std::fs::write(&path, "criterion_timeout_secs = 10\n").unwrap();
        let config = EvalConfig::load(&path).unwrap();
        assert_eq!(config.criterion_timeout(), Duration::from_secs(10));
    }
}
