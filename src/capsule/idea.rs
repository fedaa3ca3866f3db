//! Idea intake: normalising a raw prompt into a [`CapsuleIdea`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IntakeError;

/// Longest accepted idea prompt, in characters, after whitespace collapsing.
pub const MAX_PROMPT_CHARS: usize = 2_000;

/// Languages a capsule can be authored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Java,
    Go,
    CSharp,
    Sql,
}

impl Language {
    /// Resolves a user-supplied language name or alias.
    pub fn parse(raw: &str) -> Result<Self, IntakeError> {
        match raw.trim().to_lowercase().as_str() {
            "python" | "py" | "python3" => Ok(Language::Python),
            "javascript" | "js" | "node" | "nodejs" => Ok(Language::JavaScript),
            "java" => Ok(Language::Java),
            "go" | "golang" => Ok(Language::Go),
            "csharp" | "c#" | "cs" | "dotnet" => Ok(Language::CSharp),
            "sql" | "postgres" | "postgresql" | "sqlite" => Ok(Language::Sql),
            _ => Err(IntakeError::UnknownLanguage(raw.trim().to_string())),
        }
    }

    /// Canonical lowercase identifier used on the wire and in metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Java => "java",
            Language::Go => "go",
            Language::CSharp => "csharp",
            Language::Sql => "sql",
        }
    }

    /// Execution tier the sandbox runs this language on.
    pub fn default_tier(&self) -> RuntimeTier {
        match self {
            Language::Python | Language::JavaScript | Language::Sql => RuntimeTier::Wasm,
            Language::Java | Language::Go | Language::CSharp => RuntimeTier::Container,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a capsule's code executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeTier {
    /// In-browser WebAssembly runtime.
    Wasm,
    /// Serverless container runtime.
    Container,
}

/// Intended difficulty of a capsule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// Resolves a user-supplied difficulty name or alias.
    pub fn parse(raw: &str) -> Result<Self, IntakeError> {
        match raw.trim().to_lowercase().as_str() {
            "easy" | "beginner" | "intro" => Ok(Difficulty::Easy),
            "medium" | "intermediate" => Ok(Difficulty::Medium),
            "hard" | "advanced" | "expert" => Ok(Difficulty::Hard),
            _ => Err(IntakeError::UnknownDifficulty(raw.trim().to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The natural-language seed for one generation request.
///
/// Ideas are immutable: refinement produces a new idea with a new id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapsuleIdea {
    pub idea_id: Uuid,
    pub topic: String,
    pub language: Language,
    pub difficulty: Difficulty,
    pub audience_hint: Option<String>,
    /// Extra guidance attached by the feedback loop when regenerating.
    pub refinement_hint: Option<String>,
}

impl CapsuleIdea {
    /// Normalises raw user input into an idea.
    ///
    /// Whitespace in the prompt is collapsed; empty or overlong prompts and
    /// unknown language or difficulty names are rejected.
    pub fn intake(raw_prompt: &str, language: &str, difficulty: &str) -> Result<Self, IntakeError> {
        let topic = raw_prompt.split_whitespace().collect::<Vec<_>>().join(" ");
        if topic.is_empty() {
            return Err(IntakeError::EmptyPrompt);
        }
        let length = topic.chars().count();
        if length > MAX_PROMPT_CHARS {
            return Err(IntakeError::PromptTooLong {
                length,
                max: MAX_PROMPT_CHARS,
            });
        }

        Ok(Self::new(
            topic,
            Language::parse(language)?,
            Difficulty::parse(difficulty)?,
        ))
    }

    /// Creates an idea from already-normalised parts.
    pub fn new(topic: impl Into<String>, language: Language, difficulty: Difficulty) -> Self {
        Self {
            idea_id: Uuid::new_v4(),
            topic: topic.into(),
            language,
            difficulty,
            audience_hint: None,
            refinement_hint: None,
        }
    }

    /// Returns a copy of this idea aimed at a specific audience.
    pub fn with_audience_hint(&self, hint: impl Into<String>) -> Self {
        let hint = hint.into();
        let trimmed = hint.trim();
        Self {
            idea_id: Uuid::new_v4(),
            audience_hint: (!trimmed.is_empty()).then(|| trimmed.to_string()),
            ..self.clone()
        }
    }

    /// Returns a copy of this idea carrying a refinement hint for regeneration.
    pub fn with_refinement(&self, hint: impl Into<String>) -> Self {
        Self {
            idea_id: Uuid::new_v4(),
            refinement_hint: Some(hint.into()),
            ..self.clone()
        }
    }

    /// Tier the generated capsule will run on.
    pub fn runtime_tier(&self) -> RuntimeTier {
        self.language.default_tier()
    }
}
