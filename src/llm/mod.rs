//! Text/code generation backend integration.
//!
//! Pipeline stages and the mentor depend only on the [`LlmProvider`] trait.
//! [`LiteLlmClient`] is the production implementation speaking the
//! OpenAI-compatible chat completions protocol (LiteLLM, OpenRouter, ...).
//!
//! ```ignore
//! use capsule_forge::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
//!
//! let client = LiteLlmClient::from_env()?;
//! let request = GenerationRequest::new("", vec![Message::user("Hello")]);
//! let response = client.generate(request).await?;
//! ```

pub mod litellm;

pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message,
    ResponseFormat, Usage,
};
