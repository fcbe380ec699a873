//! Trend/delta engine.
//!
//! Compares two snapshots of a metric and classifies the change. Snapshot
//! comparison over historical logs only ever looks at the two most recent
//! distinct timestamps.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::obs;

/// Absolute deltas within ±`STABLE_DEADBAND` count as stable.
pub const STABLE_DEADBAND: f64 = 0.01;

#[derive(Debug, Error)]
pub enum TrendError {
    #[error("trend needs at least two distinct snapshots, found {found}")]
    InsufficientSnapshots { found: usize },

    #[error("malformed log {path}: {source}")]
    MalformedLog {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot read log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type TrendResult<T> = std::result::Result<T, TrendError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Improvement,
    Regression,
    Stable,
}

/// Change between two values of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendData {
    pub previous_value: f64,
    pub current_value: f64,
    pub absolute_delta: f64,
    /// Percent change relative to `previous_value`, rounded to 2 decimals.
    /// Zero when `previous_value` is zero.
    pub percentage_delta: f64,
    pub direction: Direction,
}

pub fn calculate_delta(previous: f64, current: f64) -> TrendData {
    let absolute_delta = current - previous;
    let percentage_delta = if previous == 0.0 {
        0.0
    } else {
        round2(absolute_delta / previous * 100.0)
    };

    let direction = if absolute_delta > STABLE_DEADBAND {
        Direction::Improvement
    } else if absolute_delta < -STABLE_DEADBAND {
        Direction::Regression
    } else {
        Direction::Stable
    };

    TrendData {
        previous_value: previous,
        current_value: current,
        absolute_delta,
        percentage_delta,
        direction,
    }
}

/// A regression whose magnitude is strictly above `threshold_percent`.
pub fn exceeds_regression_threshold(trend: &TrendData, threshold_percent: f64) -> bool {
    trend.direction == Direction::Regression && trend.percentage_delta.abs() > threshold_percent
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// A log record that belongs to a snapshot.
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Trends between the two most recent snapshots of a log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotComparison {
    pub previous_timestamp: DateTime<Utc>,
    pub current_timestamp: DateTime<Utc>,
    /// Mean of all entity values at each timestamp.
    pub aggregate: TrendData,
    /// Entities present in both snapshots.
    pub entities: BTreeMap<String, TrendData>,
}

impl SnapshotComparison {
    /// Entities (plus `"aggregate"`) whose regression exceeds the threshold.
    ///
    /// Each flagged entity is logged at warn level.
    pub fn regressions(&self, threshold_percent: f64) -> Vec<(String, TrendData)> {
        let mut flagged: Vec<(String, TrendData)> = Vec::new();
        if exceeds_regression_threshold(&self.aggregate, threshold_percent) {
            flagged.push(("aggregate".to_string(), self.aggregate));
        }
        flagged.extend(
            self.entities
                .iter()
                .filter(|(_, trend)| exceeds_regression_threshold(trend, threshold_percent))
                .map(|(entity, trend)| (entity.clone(), *trend)),
        );

        for (entity, trend) in &flagged {
            obs::emit_regression(entity, trend.percentage_delta, threshold_percent);
        }
        flagged
    }
}

/// Compare the two most recent distinct timestamps in `records`.
///
/// Several records of one entity at one timestamp are averaged first.
pub fn compare_latest_snapshots<T, K, V>(
    records: &[T],
    key_fn: K,
    value_fn: V,
) -> TrendResult<SnapshotComparison>
where
    T: Timestamped,
    K: Fn(&T) -> String,
    V: Fn(&T) -> f64,
{
    // timestamp -> entity -> (sum, count)
    let mut snapshots: BTreeMap<DateTime<Utc>, BTreeMap<String, (f64, usize)>> = BTreeMap::new();
    for record in records {
        let slot = snapshots
            .entry(record.timestamp())
            .or_default()
            .entry(key_fn(record))
            .or_insert((0.0, 0));
        slot.0 += value_fn(record);
        slot.1 += 1;
    }

    let found = snapshots.len();
    let mut latest = snapshots.into_iter().rev();
    let (Some((current_timestamp, current)), Some((previous_timestamp, previous))) =
        (latest.next(), latest.next())
    else {
        return Err(TrendError::InsufficientSnapshots { found });
    };

    let current = entity_means(current);
    let previous = entity_means(previous);

    let entities = previous
        .iter()
        .filter_map(|(entity, before)| {
            current
                .get(entity)
                .map(|after| (entity.clone(), calculate_delta(*before, *after)))
        })
        .collect();

    Ok(SnapshotComparison {
        previous_timestamp,
        current_timestamp,
        aggregate: calculate_delta(mean(previous.values()), mean(current.values())),
        entities,
    })
}

fn entity_means(snapshot: BTreeMap<String, (f64, usize)>) -> BTreeMap<String, f64> {
    snapshot
        .into_iter()
        .map(|(entity, (sum, count))| (entity, sum / count as f64))
        .collect()
}

fn mean<'a>(values: impl ExactSizeIterator<Item = &'a f64>) -> f64 {
    let len = values.len();
    if len == 0 {
        return 0.0;
    }
    values.sum::<f64>() / len as f64
}

/// One task outcome in the task-level history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcomeRecord {
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    #[serde(default)]
    pub agent: Option<String>,
    pub passed: bool,
    /// 0–100; when absent the outcome scores 100 or 0 from `passed`.
    #[serde(default)]
    pub score: Option<f64>,
}

impl TaskOutcomeRecord {
    pub fn value(&self) -> f64 {
        self.score
            .unwrap_or(if self.passed { 100.0 } else { 0.0 })
    }
}

impl Timestamped for TaskOutcomeRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// One agent's measured consistency in the per-agent history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConsistencyRecord {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    /// Fraction in 0–1.
    pub consistency: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

impl Timestamped for AgentConsistencyRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Per-task score trends.
pub fn task_score_trends(records: &[TaskOutcomeRecord]) -> TrendResult<SnapshotComparison> {
    compare_latest_snapshots(records, |r| r.task_id.clone(), TaskOutcomeRecord::value)
}

/// Per-agent consistency trends, in percent.
pub fn agent_consistency_trends(
    records: &[AgentConsistencyRecord],
) -> TrendResult<SnapshotComparison> {
    compare_latest_snapshots(records, |r| r.agent.clone(), |r| r.consistency * 100.0)
}

/// Read a JSON array of records.
pub fn load_log<T: DeserializeOwned>(path: &Path) -> TrendResult<Vec<T>> {
    let raw = std::fs::read_to_string(path).map_err(|source| TrendError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| TrendError::MalformedLog {
        path: path.to_path_buf(),
        source,
    })
}
