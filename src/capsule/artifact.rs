//! Generated capsule body: starter code, reference solution and tests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::idea::{Language, RuntimeTier};

/// One test case. Identity is its index within the owning result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Positional arguments passed to the entry point.
    #[serde(default)]
    pub input_args: Vec<Value>,
    pub expected_output: Value,
    #[serde(default)]
    pub description: String,
}

impl TestCase {
    pub fn new(input_args: Vec<Value>, expected_output: Value, description: impl Into<String>) -> Self {
        Self {
            input_args,
            expected_output,
            description: description.into(),
        }
    }
}

/// The draft capsule body produced by the Coder and repaired by the Debugger.
///
/// Only `solution_code` and `test_cases` ever change after generation;
/// starter code is fixed once the Coder emits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeGenerationResult {
    pub problem_statement: String,
    pub starter_code: String,
    pub solution_code: String,
    pub test_cases: Vec<TestCase>,
    pub language: Language,
    pub runtime_tier: RuntimeTier,
}

impl CodeGenerationResult {
    /// Copy with a replaced reference solution.
    pub fn with_solution(&self, solution_code: impl Into<String>) -> Self {
        Self {
            solution_code: solution_code.into(),
            ..self.clone()
        }
    }

    /// Copy with replaced test cases.
    pub fn with_test_cases(&self, test_cases: Vec<TestCase>) -> Self {
        Self {
            test_cases,
            ..self.clone()
        }
    }

    /// Description of the test at `index`, if it exists and has one.
    pub fn test_description(&self, index: usize) -> Option<&str> {
        self.test_cases
            .get(index)
            .map(|t| t.description.as_str())
            .filter(|d| !d.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> CodeGenerationResult {
        CodeGenerationResult {
            problem_statement: "Add two numbers".to_string(),
            starter_code: "def add(a, b):\n    pass\n".to_string(),
            solution_code: "def add(a, b):\n    return a + b\n".to_string(),
            test_cases: vec![TestCase::new(vec![json!(1), json!(2)], json!(3), "small")],
            language: Language::Python,
            runtime_tier: RuntimeTier::Wasm,
        }
    }

    #[test]
    fn test_with_solution_keeps_starter() {
        let original = sample();
        let patched = original.with_solution("def add(a, b):\n    return b + a\n");
        assert_eq!(patched.starter_code, original.starter_code);
        assert_eq!(patched.test_cases, original.test_cases);
        assert_ne!(patched.solution_code, original.solution_code);
    }

    #[test]
    fn test_test_description() {
        let capsule = sample();
        assert_eq!(capsule.test_description(0), Some("small"));
        assert_eq!(capsule.test_description(5), None);
    }

    #[test]
    fn test_test_case_defaults_on_deserialize() {
        let tc: TestCase = serde_json::from_value(json!({"expected_output": 4})).unwrap();
        assert!(tc.input_args.is_empty());
        assert!(tc.description.is_empty());
    }
}
