//! Pipeline configuration for the generation orchestrator.
//!
//! Covers concurrency, the per-request wall-clock budget, backend and sandbox
//! call limits, the debugger's attempt bound, the pedagogist's acceptance
//! threshold and the policy for fixes that rewrite test cases.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sandbox::MAX_EXECUTION_TIMEOUT;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration file.
    #[error("Failed to parse configuration file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// What to do with a debugging fix that rewrites test cases instead of the solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestRewritePolicy {
    /// Accept the rewrite and publish normally.
    Allow,
    /// Accept the rewrite but hold the capsule for human review.
    #[default]
    RequireReview,
    /// Treat a rewrite proposal as a malformed fix.
    Forbid,
}

impl std::str::FromStr for TestRewritePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "allow" => Ok(TestRewritePolicy::Allow),
            "require_review" | "review" => Ok(TestRewritePolicy::RequireReview),
            "forbid" => Ok(TestRewritePolicy::Forbid),
            other => Err(format!(
                "unknown test rewrite policy '{}', expected allow, require_review or forbid",
                other
            )),
        }
    }
}

/// Configuration for the pipeline orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Concurrency and budget
    /// Maximum number of `generate` calls in flight at once.
    pub max_concurrent_generations: usize,
    /// Wall-clock budget for one request across all stages.
    pub wall_clock_budget: Duration,

    // Generation backend
    /// Timeout for a single backend call.
    pub backend_call_timeout: Duration,
    /// Extra attempts after a failed or unusable backend call.
    pub backend_retries: u32,
    /// Model identifier; empty uses the client default.
    pub model: String,
    pub temperature: f64,

    // Sandbox
    /// Hard timeout for one sandbox call, capped at 30 seconds.
    pub sandbox_timeout: Duration,
    /// Extra attempts after a sandbox transport failure.
    pub sandbox_retries: u32,

    // Stage policy
    /// Upper bound on debugger fix attempts per request.
    pub max_debug_attempts: u32,
    /// Minimum pedagogist score (inclusive) for an idea to proceed.
    pub acceptance_threshold: u8,
    /// Floor on the number of generated test cases.
    pub min_test_cases: usize,
    pub test_rewrite_policy: TestRewritePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_generations: 4,
            wall_clock_budget: Duration::from_secs(600),

            backend_call_timeout: Duration::from_secs(90),
            backend_retries: 2,
            model: String::new(),
            temperature: 0.4,

            sandbox_timeout: Duration::from_secs(30),
            sandbox_retries: 2,

            max_debug_attempts: 3,
            acceptance_threshold: 60,
            min_test_cases: 3,
            test_rewrite_policy: TestRewritePolicy::RequireReview,
        }
    }
}

/// On-disk form of [`PipelineConfig`]; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    max_concurrent_generations: Option<usize>,
    wall_clock_budget_secs: Option<u64>,
    backend_call_timeout_secs: Option<u64>,
    backend_retries: Option<u32>,
    model: Option<String>,
    temperature: Option<f64>,
    sandbox_timeout_secs: Option<u64>,
    sandbox_retries: Option<u32>,
    max_debug_attempts: Option<u32>,
    acceptance_threshold: Option<u8>,
    min_test_cases: Option<usize>,
    test_rewrite_policy: Option<TestRewritePolicy>,
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CAPSULE_MAX_CONCURRENT`: Maximum in-flight generations (default: 4)
    /// - `CAPSULE_BUDGET_SECS`: Wall-clock budget per request (default: 600)
    /// - `CAPSULE_BACKEND_TIMEOUT_SECS`: Per-call backend timeout (default: 90)
    /// - `CAPSULE_BACKEND_RETRIES`: Backend retries after the first attempt (default: 2)
    /// - `CAPSULE_MODEL`: Model identifier (default: client default)
    /// - `CAPSULE_TEMPERATURE`: Sampling temperature (default: 0.4)
    /// - `CAPSULE_SANDBOX_TIMEOUT_SECS`: Per-call sandbox timeout (default: 30, max 30)
    /// - `CAPSULE_SANDBOX_RETRIES`: Sandbox transport retries (default: 2)
    /// - `CAPSULE_MAX_DEBUG_ATTEMPTS`: Debugger attempt bound (default: 3)
    /// - `CAPSULE_ACCEPTANCE_THRESHOLD`: Pedagogist threshold 0-100 (default: 60)
    /// - `CAPSULE_MIN_TEST_CASES`: Minimum generated tests (default: 3)
    /// - `CAPSULE_TEST_REWRITE_POLICY`: allow, require_review or forbid
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the result
    /// fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CAPSULE_MAX_CONCURRENT") {
            config.max_concurrent_generations = parse_env_value(&val, "CAPSULE_MAX_CONCURRENT")?;
        }

        if let Ok(val) = std::env::var("CAPSULE_BUDGET_SECS") {
            let secs: u64 = parse_env_value(&val, "CAPSULE_BUDGET_SECS")?;
            config.wall_clock_budget = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("CAPSULE_BACKEND_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "CAPSULE_BACKEND_TIMEOUT_SECS")?;
            config.backend_call_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("CAPSULE_BACKEND_RETRIES") {
            config.backend_retries = parse_env_value(&val, "CAPSULE_BACKEND_RETRIES")?;
        }

        if let Ok(val) = std::env::var("CAPSULE_MODEL") {
            config.model = val;
        }

        if let Ok(val) = std::env::var("CAPSULE_TEMPERATURE") {
            config.temperature = parse_env_value(&val, "CAPSULE_TEMPERATURE")?;
        }

        if let Ok(val) = std::env::var("CAPSULE_SANDBOX_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "CAPSULE_SANDBOX_TIMEOUT_SECS")?;
            config.sandbox_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("CAPSULE_SANDBOX_RETRIES") {
            config.sandbox_retries = parse_env_value(&val, "CAPSULE_SANDBOX_RETRIES")?;
        }

        if let Ok(val) = std::env::var("CAPSULE_MAX_DEBUG_ATTEMPTS") {
            config.max_debug_attempts = parse_env_value(&val, "CAPSULE_MAX_DEBUG_ATTEMPTS")?;
        }

        if let Ok(val) = std::env::var("CAPSULE_ACCEPTANCE_THRESHOLD") {
            config.acceptance_threshold = parse_env_value(&val, "CAPSULE_ACCEPTANCE_THRESHOLD")?;
        }

        if let Ok(val) = std::env::var("CAPSULE_MIN_TEST_CASES") {
            config.min_test_cases = parse_env_value(&val, "CAPSULE_MIN_TEST_CASES")?;
        }

        if let Ok(val) = std::env::var("CAPSULE_TEST_REWRITE_POLICY") {
            config.test_rewrite_policy = val.parse::<TestRewritePolicy>().map_err(|message| {
                ConfigError::InvalidValue {
                    key: "CAPSULE_TEST_REWRITE_POLICY".to_string(),
                    message,
                }
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file, layering it over the defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parses YAML configuration, layering it over the defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let file: PipelineConfigFile = if content.trim().is_empty() {
            PipelineConfigFile::default()
        } else {
            serde_yaml::from_str(content)?
        };

        let mut config = Self::default();
        if let Some(v) = file.max_concurrent_generations {
            config.max_concurrent_generations = v;
        }
        if let Some(v) = file.wall_clock_budget_secs {
            config.wall_clock_budget = Duration::from_secs(v);
        }
        if let Some(v) = file.backend_call_timeout_secs {
            config.backend_call_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.backend_retries {
            config.backend_retries = v;
        }
        if let Some(v) = file.model {
            config.model = v;
        }
        if let Some(v) = file.temperature {
            config.temperature = v;
        }
        if let Some(v) = file.sandbox_timeout_secs {
            config.sandbox_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.sandbox_retries {
            config.sandbox_retries = v;
        }
        if let Some(v) = file.max_debug_attempts {
            config.max_debug_attempts = v;
        }
        if let Some(v) = file.acceptance_threshold {
            config.acceptance_threshold = v;
        }
        if let Some(v) = file.min_test_cases {
            config.min_test_cases = v;
        }
        if let Some(v) = file.test_rewrite_policy {
            config.test_rewrite_policy = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_generations == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_generations must be greater than 0".to_string(),
            ));
        }

        if self.wall_clock_budget.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "wall_clock_budget must be greater than 0".to_string(),
            ));
        }

        if self.backend_call_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "backend_call_timeout must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.sandbox_timeout.is_zero() || self.sandbox_timeout > MAX_EXECUTION_TIMEOUT {
            return Err(ConfigError::ValidationFailed(format!(
                "sandbox_timeout must be between 1 and {} seconds",
                MAX_EXECUTION_TIMEOUT.as_secs()
            )));
        }

        if self.acceptance_threshold > 100 {
            return Err(ConfigError::ValidationFailed(
                "acceptance_threshold must be between 0 and 100".to_string(),
            ));
        }

        if self.min_test_cases == 0 {
            return Err(ConfigError::ValidationFailed(
                "min_test_cases must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the concurrency cap.
    pub fn with_max_concurrent_generations(mut self, max: usize) -> Self {
        self.max_concurrent_generations = max;
        self
    }

    /// Builder method to set the per-request wall-clock budget.
    pub fn with_wall_clock_budget(mut self, budget: Duration) -> Self {
        self.wall_clock_budget = budget;
        self
    }

    /// Builder method to set the backend call timeout.
    pub fn with_backend_call_timeout(mut self, timeout: Duration) -> Self {
        self.backend_call_timeout = timeout;
        self
    }

    /// Builder method to set extra backend attempts per interaction.
    pub fn with_backend_retries(mut self, retries: u32) -> Self {
        self.backend_retries = retries;
        self
    }

    /// Builder method to set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Builder method to set temperature.
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    /// Builder method to set the sandbox timeout (capped at 30 seconds).
    pub fn with_sandbox_timeout(mut self, timeout: Duration) -> Self {
        self.sandbox_timeout = timeout.min(MAX_EXECUTION_TIMEOUT);
        self
    }

    /// Builder method to set sandbox transport retries.
    pub fn with_sandbox_retries(mut self, retries: u32) -> Self {
        self.sandbox_retries = retries;
        self
    }

    /// Builder method to set the debugger attempt bound.
    pub fn with_max_debug_attempts(mut self, attempts: u32) -> Self {
        self.max_debug_attempts = attempts;
        self
    }

    /// Builder method to set the acceptance threshold.
    pub fn with_acceptance_threshold(mut self, threshold: u8) -> Self {
        self.acceptance_threshold = threshold;
        self
    }

    /// Builder method to set the minimum number of test cases.
    pub fn with_min_test_cases(mut self, count: usize) -> Self {
        self.min_test_cases = count;
        self
    }

    /// Builder method to set the test rewrite policy.
    pub fn with_test_rewrite_policy(mut self, policy: TestRewritePolicy) -> Self {
        self.test_rewrite_policy = policy;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
