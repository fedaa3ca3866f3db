//! Validation results with a uniform shape for logical and infrastructural failures.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Infrastructure-side reason for a synthetic failing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Code did not parse; no sandbox call was made.
    Syntax,
    /// The caller's hard timeout or the sandbox's own timeout fired.
    Timeout,
    /// The sandbox reported a fault or answered inconsistently.
    Sandbox,
    /// The request exceeded a sandbox limit before being sent.
    Limit,
}

/// Outcome of a single test, or a synthetic entry describing a fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Index into the capsule's test cases; `None` for synthetic entries.
    pub test_index: Option<usize>,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<FaultKind>,
}

impl TestOutcome {
    pub fn pass(test_index: usize) -> Self {
        Self {
            test_index: Some(test_index),
            passed: true,
            error: None,
            actual_output: None,
            fault: None,
        }
    }

    pub fn fail(test_index: usize, error: impl Into<String>) -> Self {
        Self {
            test_index: Some(test_index),
            passed: false,
            error: Some(error.into()),
            actual_output: None,
            fault: None,
        }
    }

    /// A failing entry describing an infrastructure fault.
    pub fn synthetic(fault: FaultKind, message: impl Into<String>) -> Self {
        Self {
            test_index: None,
            passed: false,
            error: Some(message.into()),
            actual_output: None,
            fault: Some(fault),
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.test_index.is_none()
    }
}

/// Result of running a solution against its tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed_count: usize,
    pub total_count: usize,
    pub per_test_outcome: Vec<TestOutcome>,
    pub all_passed: bool,
}

impl ValidationResult {
    /// Derives counts from real per-test outcomes.
    ///
    /// `all_passed` requires at least one test, every test passing and no
    /// synthetic fault entries.
    pub fn from_outcomes(per_test_outcome: Vec<TestOutcome>) -> Self {
        let total_count = per_test_outcome.iter().filter(|o| !o.is_synthetic()).count();
        let passed_count = per_test_outcome
            .iter()
            .filter(|o| !o.is_synthetic() && o.passed)
            .count();
        let all_passed = total_count > 0
            && passed_count == total_count
            && per_test_outcome.iter().all(|o| !o.is_synthetic());
        Self {
            passed_count,
            total_count,
            per_test_outcome,
            all_passed,
        }
    }

    /// A failed result with a single synthetic entry; `total_count` is the
    /// number of tests that could not be evaluated.
    pub fn fault(fault: FaultKind, message: impl Into<String>, test_count: usize) -> Self {
        Self {
            passed_count: 0,
            total_count: test_count,
            per_test_outcome: vec![TestOutcome::synthetic(fault, message)],
            all_passed: false,
        }
    }

    /// Result for code that failed the syntax gate.
    pub fn syntax_failure(message: impl Into<String>, test_count: usize) -> Self {
        Self::fault(FaultKind::Syntax, message, test_count)
    }

    /// Failing outcomes in report order.
    pub fn failures(&self) -> impl Iterator<Item = &TestOutcome> {
        self.per_test_outcome.iter().filter(|o| !o.passed)
    }

    /// Indices of real (non-synthetic) failing tests.
    pub fn failing_indices(&self) -> Vec<usize> {
        self.failures().filter_map(|o| o.test_index).collect()
    }

    /// One-line summary for logs and rationales.
    pub fn summary(&self) -> String {
        match self.failures().next() {
            None => format!("{}/{} tests passed", self.passed_count, self.total_count),
            Some(first) => format!(
                "{}/{} tests passed; first failure: {}",
                self.passed_count,
                self.total_count,
                first.error.as_deref().unwrap_or("no error message")
            ),
        }
    }
}
