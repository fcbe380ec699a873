//! passk - pass^k evaluation CLI
//!
//! ## Commands
//!
//! - `eval`: run the criteria of a failure case k times
//! - `meta`: measure accuracy and consistency of an agent's verdicts
//! - `trend`: compare the two latest snapshots of a history log

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use passk_core::trend::{
    agent_consistency_trends, load_log, task_score_trends, AgentConsistencyRecord,
    TaskOutcomeRecord,
};
use passk_core::{
    passes, AgentVerdictSource, CompletionClient, EvalConfig, FailureCase, GraderRegistry,
    MetaEvaluation, SnapshotComparison, TempDirProvider, TestCase, TrendData, TrialResult,
    TrialRunner, TrialStats, METRICS,
};

#[derive(Parser)]
#[command(name = "passk")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Grade agents for correctness and pass^k consistency", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file
    #[arg(long, global = true, env = "PASSK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a failure case's criteria in k isolated trials
    Eval {
        /// Failure case (JSON)
        #[arg(long = "case")]
        case: PathBuf,

        /// Number of trials (default: config `default_k`)
        #[arg(short)]
        k: Option<usize>,

        /// Directory copied into every trial's working directory
        #[arg(long)]
        seed: Option<PathBuf>,
    },

    /// Ask the configured agent for verdicts on test cases
    Meta {
        /// Test cases (JSON array)
        #[arg(long)]
        cases: PathBuf,
    },

    /// Compare the two most recent snapshots of a history log
    Trend {
        #[command(flatten)]
        log: TrendLog,

        /// Regression threshold in percent (default: config value)
        #[arg(long)]
        threshold: Option<f64>,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct TrendLog {
    /// Task outcome log (JSON array)
    #[arg(long)]
    tasks: Option<PathBuf>,

    /// Agent consistency log (JSON array)
    #[arg(long)]
    agents: Option<PathBuf>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EvalOutput<'a> {
    case_id: &'a str,
    trials: &'a [TrialResult],
    stats: TrialStats,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TrendOutput<'a> {
    comparison: &'a SnapshotComparison,
    threshold_percent: f64,
    regressions: Vec<(String, TrendData)>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    passk_core::init_tracing(cli.json || config.log_json, level);

    let outcome = match cli.command {
        Commands::Eval { case, k, seed } => cmd_eval(&config, &case, k, seed).await,
        Commands::Meta { cases } => cmd_meta(&config, &cases).await,
        Commands::Trend { log, threshold } => cmd_trend(&config, &log, threshold),
    };
    METRICS.flush();
    outcome
}

fn load_config(path: Option<&Path>) -> Result<EvalConfig> {
    match path {
        Some(path) => EvalConfig::load(path)
            .with_context(|| format!("Failed to load config: {:?}", path)),
        None => {
            let mut config = EvalConfig::default();
            config
                .apply_env()
                .context("Invalid PASSK_* environment override")?;
            config.validate().context("Invalid configuration")?;
            Ok(config)
        }
    }
}

fn completion_client(config: &EvalConfig) -> Option<Arc<dyn CompletionClient>> {
    config
        .agent
        .as_ref()
        .map(|agent| Arc::new(agent.client()) as Arc<dyn CompletionClient>)
}

fn build_runner(
    config: &EvalConfig,
    registry: GraderRegistry,
    seed: Option<PathBuf>,
) -> TrialRunner {
    let provider = match seed {
        Some(seed) => TempDirProvider::new().with_seed(seed),
        None => TempDirProvider::new(),
    };
    TrialRunner::new(Arc::new(registry), Arc::new(provider))
        .with_criterion_timeout(config.criterion_timeout())
        .with_verdict_timeout(config.verdict_timeout())
}

async fn cmd_eval(
    config: &EvalConfig,
    case_path: &PathBuf,
    k: Option<usize>,
    seed: Option<PathBuf>,
) -> Result<()> {
    let case: FailureCase = read_json_file(case_path)?;
    let k = k.unwrap_or(config.default_k);
    if k == 0 {
        anyhow::bail!("k must be positive");
    }
    if let Some(seed) = &seed {
        if !seed.is_dir() {
            anyhow::bail!("Seed directory not found: {:?}", seed);
        }
    }

    let registry =
        GraderRegistry::with_builtins(completion_client(config), config.completion_options())
            .context("Failed to build grader registry")?;
    info!(case_id = %case.id, k, graders = ?registry.names(), "running evaluation");

    let runner = build_runner(config, registry, seed);
    let trials = runner.run_evaluation(&case, k).await;
    let stats = TrialStats::from_passes(&passes(&trials));

    print_json(&EvalOutput {
        case_id: &case.id,
        trials: &trials,
        stats,
    })
}

async fn cmd_meta(config: &EvalConfig, cases_path: &PathBuf) -> Result<()> {
    let tests: Vec<TestCase> = read_json_file(cases_path)?;
    let agent = config
        .agent
        .as_ref()
        .context("meta requires an agent: set [agent] in the config or PASSK_AGENT_PROGRAM")?;

    let source = Arc::new(AgentVerdictSource::new(
        Arc::new(agent.client()),
        agent.completion_options(),
    ));
    let runner = build_runner(config, GraderRegistry::default(), None);
    let evaluation: MetaEvaluation = runner
        .evaluate_test_cases(&tests, config.default_k, source)
        .await;

    info!(
        accuracy = evaluation.metrics.accuracy,
        consistency = evaluation.metrics.consistency,
        "meta-evaluation finished"
    );
    print_json(&evaluation)
}

fn cmd_trend(config: &EvalConfig, log: &TrendLog, threshold: Option<f64>) -> Result<()> {
    let threshold_percent = threshold.unwrap_or(config.regression_threshold_percent);

    let comparison = match (&log.tasks, &log.agents) {
        (Some(path), _) => {
            let records: Vec<TaskOutcomeRecord> = load_log(path)?;
            task_score_trends(&records)?
        }
        (None, Some(path)) => {
            let records: Vec<AgentConsistencyRecord> = load_log(path)?;
            agent_consistency_trends(&records)?
        }
        (None, None) => anyhow::bail!("one of --tasks or --agents is required"),
    };

    let regressions = comparison.regressions(threshold_percent);
    print_json(&TrendOutput {
        comparison: &comparison,
        threshold_percent,
        regressions: regressions.clone(),
    })?;

    if regressions.is_empty() {
        Ok(())
    } else {
        let names: Vec<&str> = regressions.iter().map(|(name, _)| name.as_str()).collect();
        anyhow::bail!(
            "Regression beyond {}% in: {}",
            threshold_percent,
            names.join(", ")
        )
    }
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read JSON file: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
