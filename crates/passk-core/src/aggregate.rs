//! Verdict aggregation: majority verdict, accuracy and pass^k consistency.
//!
//! Consistency measures reproducibility independently of correctness: a
//! case can be fully consistent and always wrong, or correct on majority
//! yet flaky.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Most frequent verdict; ties go to the lexicographically smallest string.
///
/// Returns `None` only for an empty slice.
pub fn majority_verdict<S: AsRef<str>>(verdicts: &[S]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for verdict in verdicts {
        *counts.entry(verdict.as_ref()).or_default() += 1;
    }

    let max = counts.values().copied().max()?;
    // BTreeMap iterates in ascending key order, so the first hit is the
    // smallest of the tied verdicts.
    counts
        .into_iter()
        .find(|(_, count)| *count == max)
        .map(|(verdict, _)| verdict.to_string())
}

/// Whether every verdict equals the first. Vacuously true when empty.
pub fn all_runs_consistent<S: AsRef<str>>(verdicts: &[S]) -> bool {
    match verdicts.split_first() {
        Some((first, rest)) => rest.iter().all(|v| v.as_ref() == first.as_ref()),
        None => true,
    }
}

/// The k verdicts collected for one meta-evaluation case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseVerdicts {
    pub test_id: String,
    pub expected: String,
    pub verdicts: Vec<String>,
}

impl CaseVerdicts {
    pub fn new(
        test_id: impl Into<String>,
        expected: impl Into<String>,
        verdicts: Vec<String>,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            expected: expected.into(),
            verdicts,
        }
    }

    pub fn majority(&self) -> Option<String> {
        majority_verdict(&self.verdicts)
    }

    /// Majority verdict equals `expected` (exact match).
    pub fn is_correct(&self) -> bool {
        self.majority().as_deref() == Some(self.expected.as_str())
    }

    /// All k verdicts are identical.
    pub fn is_consistent(&self) -> bool {
        all_runs_consistent(&self.verdicts)
    }
}

/// Aggregate accuracy and consistency over a set of cases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub accuracy: f64,
    pub consistency: f64,
    pub total_tests: usize,
    pub correct_count: usize,
    pub consistent_count: usize,
}

/// Reduce per-case verdicts to [`Metrics`]. All-zero for no cases.
pub fn compute_metrics(cases: &[CaseVerdicts]) -> Metrics {
    let total_tests = cases.len();
    if total_tests == 0 {
        return Metrics::default();
    }

    let correct_count = cases.iter().filter(|c| c.is_correct()).count();
    let consistent_count = cases.iter().filter(|c| c.is_consistent()).count();

    Metrics {
        accuracy: correct_count as f64 / total_tests as f64,
        consistency: consistent_count as f64 / total_tests as f64,
        total_tests,
        correct_count,
        consistent_count,
    }
}

/// Pass statistics over the k boolean trials of one criterion-based case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialStats {
    pub trials: usize,
    pub passed: usize,
    /// `passed / trials`, 0 when there were no trials.
    pub pass_rate: f64,
    /// At least one trial passed.
    pub pass_at_k: bool,
    /// Every trial passed (pass^k).
    pub pass_pow_k: bool,
}

impl TrialStats {
    pub fn from_passes(passes: &[bool]) -> Self {
        let trials = passes.len();
        let passed = passes.iter().filter(|p| **p).count();
        Self {
            trials,
            passed,
            pass_rate: if trials == 0 {
                0.0
            } else {
                passed as f64 / trials as f64
            },
            pass_at_k: passed > 0,
            pass_pow_k: trials > 0 && passed == trials,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(vs: &[&str]) -> Vec<String> {
        vs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_majority_tie_breaks_lexicographically() {
        assert_eq!(
            majority_verdict(&["PASS", "FAIL", "PASS", "FAIL"]).as_deref(),
            Some("FAIL")
        );
        assert_eq!(
            majority_verdict(&["b", "c", "a", "c", "b", "a"]).as_deref(),
            Some("a")
        );
    }

    #[test]
    fn test_majority_is_order_independent() {
        let a = majority_verdict(&["FAIL", "PASS", "PASS"]);
        let b = majority_verdict(&["PASS", "FAIL", "PASS"]);
        let c = majority_verdict(&["PASS", "PASS", "FAIL"]);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.as_deref(), Some("PASS"));
    }

    #[test]
    fn test_majority_empty_is_none() {
        let empty: [&str; 0] = [];
        assert_eq!(majority_verdict(&empty), None);
    }

    #[test]
    fn test_all_runs_consistent() {
        assert!(all_runs_consistent(&["PASS", "PASS", "PASS"]));
        assert!(!all_runs_consistent(&["PASS", "PASS", "FAIL", "PASS", "PASS"]));
        assert!(all_runs_consistent(&["only"]));
    }

    #[test]
    fn test_correct_but_inconsistent() {
        let verdicts = strings(&["PASS", "PASS", "FAIL", "PASS", "PASS"]);
        let case = CaseVerdicts::new("t2", "PASS", verdicts);
        assert_eq!(case.majority().as_deref(), Some("PASS"));
        assert!(case.is_correct());
        assert!(!case.is_consistent());
    }

    #[test]
    fn test_consistent_but_wrong() {
        let case = CaseVerdicts::new("t3", "PASS", strings(&["FAIL"; 5]));
        assert!(!case.is_correct());
        assert!(case.is_consistent());
    }

    #[test]
    fn test_compute_metrics() {
        let cases = vec![
            CaseVerdicts::new("t1", "PASS", strings(&["PASS"; 5])),
            CaseVerdicts::new(
                "t2",
                "PASS",
                strings(&["PASS", "PASS", "FAIL", "PASS", "PASS"]),
            ),
        ];
        let metrics = compute_metrics(&cases);
        assert_eq!(
            metrics,
            Metrics {
                accuracy: 1.0,
                consistency: 0.5,
                total_tests: 2,
                correct_count: 2,
                consistent_count: 1,
            }
        );
    }

    #[test]
    fn test_compute_metrics_empty() {
        assert_eq!(compute_metrics(&[]), Metrics::default());
    }

    #[test]
    fn test_trial_stats() {
        let stats = TrialStats::from_passes(&[true, false, true, true]);
        assert_eq!(stats.trials, 4);
        assert_eq!(stats.passed, 3);
        assert_eq!(stats.pass_rate, 0.75);
        assert!(stats.pass_at_k);
        assert!(!stats.pass_pow_k);

        let all = TrialStats::from_passes(&[true, true, true]);
        assert!(all.pass_pow_k);

        let none = TrialStats::from_passes(&[]);
        assert_eq!(none.pass_rate, 0.0);
        assert!(!none.pass_at_k);
        assert!(!none.pass_pow_k);
    }
}
