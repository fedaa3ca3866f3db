//! Capsule data model.
//!
//! A capsule is one interactive coding exercise: a problem statement, starter
//! code, a reference solution and test cases. This module holds the types that
//! flow between pipeline stages, from the intake of a raw idea to the
//! validation result the publish decision is made on.

pub mod artifact;
pub mod idea;
pub mod syntax;
pub mod validation;

pub use artifact::{CodeGenerationResult, TestCase};
pub use idea::{CapsuleIdea, Difficulty, Language, RuntimeTier, MAX_PROMPT_CHARS};
pub use syntax::SyntaxIssue;
pub use validation::{FaultKind, TestOutcome, ValidationResult};
