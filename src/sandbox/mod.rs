//! Contract with the external code-execution sandbox.
//!
//! The sandbox itself (WASM and container runtimes) is an external service.
//! The core only depends on the [`Sandbox`] trait; [`HttpSandbox`] is the
//! production client. Responses are untrusted: callers enforce their own
//! timeout and check the outcome count against the submitted tests.

pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capsule::{Language, RuntimeTier, TestCase, TestOutcome};
use crate::error::SandboxError;

pub use http::HttpSandbox;

/// Largest solution accepted for execution, in bytes.
pub const MAX_CODE_BYTES: usize = 50_000;

/// Upper bound on any per-call execution timeout.
pub const MAX_EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);

/// One execution request: run `solution_code` against every test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxRequest {
    pub language: Language,
    pub runtime_tier: RuntimeTier,
    pub solution_code: String,
    pub test_cases: Vec<TestCase>,
    /// Execution timeout requested from the sandbox, in seconds.
    pub timeout_secs: u64,
}

impl SandboxRequest {
    /// Builds a request, clamping the timeout to [`MAX_EXECUTION_TIMEOUT`].
    pub fn new(
        language: Language,
        solution_code: impl Into<String>,
        test_cases: Vec<TestCase>,
        timeout: Duration,
    ) -> Self {
        Self {
            language,
            runtime_tier: language.default_tier(),
            solution_code: solution_code.into(),
            test_cases,
            timeout_secs: timeout.min(MAX_EXECUTION_TIMEOUT).as_secs().max(1),
        }
    }

    /// Whether the payload exceeds the sandbox's code size limit.
    pub fn exceeds_code_limit(&self) -> bool {
        self.solution_code.len() > MAX_CODE_BYTES
    }
}

/// What the sandbox reported back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxResponse {
    #[serde(default)]
    pub per_test_outcome: Vec<TestOutcome>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault_message: Option<String>,
}

/// Code-execution service.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Executes the solution against the tests.
    ///
    /// `Err` means the call itself failed (transport, HTTP status, undecodable
    /// body). Timeouts and faults inside the sandbox come back as `Ok` with
    /// `timed_out` or `fault_message` set.
    async fn execute(&self, request: SandboxRequest) -> Result<SandboxResponse, SandboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timeout_is_capped() {
        let request = SandboxRequest::new(
            Language::Python,
            "print(1)",
            Vec::new(),
            Duration::from_secs(120),
        );
        assert_eq!(request.timeout_secs, 30);
        assert_eq!(request.runtime_tier, RuntimeTier::Wasm);
    }

    #[test]
    fn test_code_limit() {
        let big = "x".repeat(MAX_CODE_BYTES + 1);
        let request = SandboxRequest::new(Language::Go, big, Vec::new(), Duration::from_secs(5));
        assert!(request.exceeds_code_limit());
        assert_eq!(request.runtime_tier, RuntimeTier::Container);
    }

    #[test]
    fn test_request_wire_format() {
        let request = SandboxRequest::new(
            Language::JavaScript,
            "module.exports = (a, b) => a + b;",
            vec![TestCase::new(vec![json!(1), json!(2)], json!(3), "adds")],
            Duration::from_secs(10),
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["language"], "javascript");
        assert_eq!(value["runtimeTier"], "wasm");
        assert_eq!(value["timeoutSecs"], 10);
        assert!(value["solutionCode"].is_string());
        assert_eq!(value["testCases"][0]["expected_output"], 3);
    }

    #[test]
    fn test_response_tolerates_missing_fields() {
        let response: SandboxResponse =
            serde_json::from_value(json!({"faultMessage": "worker crashed"})).unwrap();
        assert!(response.per_test_outcome.is_empty());
        assert!(!response.timed_out);
        assert_eq!(response.fault_message.as_deref(), Some("worker crashed"));
    }
}
