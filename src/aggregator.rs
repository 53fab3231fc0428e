//! Result aggregator (component H). Stores one [`TestResult`] per
//! concrete test and produces the pass/fail/setup-error summary §4.H.

use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed,
    SetupError,
    Cancelled,
}

/// `{index, exit-status, start, end, notes}` (§3). `passed()` iff
/// `exit_status == Some(0)`.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub index: usize,
    pub exit_status: Option<i32>,
    pub start: SystemTime,
    pub end: SystemTime,
    pub notes: Vec<String>,
    pub outcome: Outcome,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        matches!(self.outcome, Outcome::Passed) && self.exit_status == Some(0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub setup_error: usize,
    pub cancelled: usize,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.setup_error + self.cancelled
    }

    pub fn all_passed(&self) -> bool {
        self.total() > 0 && self.failed == 0 && self.setup_error == 0 && self.cancelled == 0
    }
}

/// Growable ordered store of per-test outcomes, kept in test-index order
/// regardless of arrival order (tests run sequentially, but recording is
/// kept index-addressable for `--from`/`--to` re-runs).
#[derive(Default)]
pub struct ResultAggregator {
    results: Vec<TestResult>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        ResultAggregator { results: Vec::new() }
    }

    pub fn record(&mut self, result: TestResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for result in &self.results {
            match result.outcome {
                Outcome::Passed => summary.passed += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::SetupError => summary.setup_error += 1,
                Outcome::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    /// Indices of every test that did not pass, for a `--verbose`
    /// parameter dump.
    pub fn failing_indices(&self) -> Vec<usize> {
        self.results
            .iter()
            .filter(|r| !r.passed())
            .map(|r| r.index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(index: usize, outcome: Outcome, exit_status: Option<i32>) -> TestResult {
        let now = SystemTime::now();
        TestResult {
            index,
            exit_status,
            start: now,
            end: now,
            notes: Vec::new(),
            outcome,
        }
    }

    #[test]
    fn summary_counts_each_outcome_bucket() {
        let mut agg = ResultAggregator::new();
        agg.record(result(0, Outcome::Passed, Some(0)));
        agg.record(result(1, Outcome::Failed, Some(1)));
        agg.record(result(2, Outcome::SetupError, None));
        let summary = agg.summary();
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.setup_error, 1);
        assert!(!summary.all_passed());
    }

    #[test]
    fn s5_three_tests_one_pass_two_fail() {
        let mut agg = ResultAggregator::new();
        agg.record(result(0, Outcome::Passed, Some(0)));
        agg.record(result(1, Outcome::Failed, Some(1)));
        agg.record(result(2, Outcome::Failed, Some(2)));
        let summary = agg.summary();
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(agg.failing_indices(), vec![1, 2]);
    }

    #[test]
    fn all_passed_is_false_on_empty_aggregator() {
        let agg = ResultAggregator::new();
        assert!(!agg.summary().all_passed());
    }
}
