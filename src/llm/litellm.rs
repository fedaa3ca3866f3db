//! OpenAI-compatible chat completions client and the provider trait the
//! stages are written against.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::LlmError;

const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// "system", "user" or "assistant".
    pub role: String,
    pub content: String,
}

impl Message {
    fn with_role(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role("assistant", content)
    }
}

/// Output constraint passed through to backends that support it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

/// One completion request. An empty `model` means the client default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            response_format: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Asks the backend for a single JSON object.
    pub fn with_json_output(mut self) -> Self {
        self.response_format = Some(ResponseFormat::JsonObject);
        self
    }

    /// Content of the first system message, if any.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl GenerationResponse {
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    /// "stop", "length", ...
    pub finish_reason: String,
}

/// Token accounting reported by the backend; zero when it reports none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The text/code generation backend.
///
/// Implementations do not retry; callers own retry and timeout policy.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// HTTP client for LiteLLM, OpenRouter and other chat completions endpoints.
pub struct LiteLlmClient {
    api_base: String,
    api_key: Option<String>,
    default_model: String,
    http_client: Client,
}

impl std::fmt::Debug for LiteLlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiteLlmClient")
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .field("has_api_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl LiteLlmClient {
    pub fn new(
        api_base: String,
        api_key: Option<String>,
        default_model: String,
    ) -> Result<Self, LlmError> {
        Self::with_timeout(api_base, api_key, default_model, DEFAULT_REQUEST_TIMEOUT)
    }

    /// `request_timeout` caps a single HTTP exchange. Stage deadlines are
    /// enforced separately by the caller and are usually shorter.
    pub fn with_timeout(
        api_base: String,
        api_key: Option<String>,
        default_model: String,
        request_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http_client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            default_model,
            http_client,
        })
    }

    /// OpenRouter with the default model.
    pub fn new_with_defaults(api_key: String) -> Result<Self, LlmError> {
        Self::new(
            OPENROUTER_API_BASE.to_string(),
            Some(api_key),
            DEFAULT_MODEL.to_string(),
        )
    }

    /// Reads `LITELLM_API_BASE` (required), `LITELLM_API_KEY`,
    /// `LITELLM_DEFAULT_MODEL` and `LITELLM_TIMEOUT_SECS`.
    ///
    /// # Errors
    ///
    /// `LlmError::MissingApiBase` when `LITELLM_API_BASE` is unset.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_base = env::var("LITELLM_API_BASE").map_err(|_| LlmError::MissingApiBase)?;
        let api_key = env::var("LITELLM_API_KEY").ok().filter(|k| !k.is_empty());
        let default_model =
            env::var("LITELLM_DEFAULT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let timeout = env::var("LITELLM_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs);

        Self::with_timeout(api_base, api_key, default_model, timeout)
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

/// Completion body. Several gateways omit `usage`, `finish_reason` or
/// return `content: null`, so all of those are optional on the wire.
#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    index: u32,
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default = "assistant_role")]
    role: String,
    #[serde(default)]
    content: Option<String>,
}

fn assistant_role() -> String {
    "assistant".to_string()
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: WireErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    message: String,
}

impl From<WireResponse> for GenerationResponse {
    fn from(wire: WireResponse) -> Self {
        let choices = wire
            .choices
            .into_iter()
            .map(|choice| Choice {
                index: choice.index,
                message: Message {
                    role: choice.message.role,
                    content: choice.message.content.unwrap_or_default(),
                },
                finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            })
            .collect();
        Self {
            id: wire.id,
            model: wire.model,
            choices,
            usage: wire.usage.unwrap_or_default(),
        }
    }
}

/// Maps a non-success status and its body onto an error.
fn status_error(status: StatusCode, body: String) -> LlmError {
    let message = serde_json::from_str::<WireError>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited(message),
        _ => LlmError::ApiError {
            code: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl LlmProvider for LiteLlmClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let model = if request.model.is_empty() {
            self.default_model.as_str()
        } else {
            request.model.as_str()
        };
        let body = WireRequest {
            model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.response_format,
        };

        let mut http_request = self
            .http_client
            .post(self.completions_url())
            .header("X-Title", "capsule-forge")
            .json(&body);
        if let Some(api_key) = &self.api_key {
            http_request = http_request.bearer_auth(api_key);
        }

        let http_response = http_request
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = http_response.status();
        if !status.is_success() {
            let body = http_response
                .text()
                .await
                .unwrap_or_else(|e| format!("unreadable error body: {}", e));
            tracing::debug!(status = status.as_u16(), "Backend returned an error status");
            return Err(status_error(status, body));
        }

        let wire: WireResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;
        Ok(wire.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = GenerationRequest::new(
            "gpt-4",
            vec![Message::system("rules"), Message::user("test")],
        )
        .with_temperature(0.7)
        .with_max_tokens(1000)
        .with_json_output();

        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(1000));
        assert_eq!(request.response_format, Some(ResponseFormat::JsonObject));
        assert_eq!(request.system_prompt(), Some("rules"));
        assert_eq!(
            GenerationRequest::new("", vec![Message::user("x")]).system_prompt(),
            None
        );
    }

    #[test]
    fn test_wire_request_shape() {
        let messages = vec![Message::user("test")];
        let body = WireRequest {
            model: "gpt-4",
            messages: &messages,
            temperature: Some(0.7),
            max_tokens: None,
            response_format: Some(ResponseFormat::JsonObject),
        };

        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["model"], "gpt-4");
        assert_eq!(json["temperature"], 0.7);
        assert_eq!(json["response_format"]["type"], "json_object");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_wire_response_tolerates_sparse_gateways() {
        let raw = r#"{"choices":[{"message":{"content":null}}]}"#;
        let wire: WireResponse = serde_json::from_str(raw).expect("should parse");
        let response = GenerationResponse::from(wire);

        assert_eq!(response.first_content(), Some(""));
        assert_eq!(response.choices[0].message.role, "assistant");
        assert_eq!(response.choices[0].finish_reason, "stop");
        assert_eq!(response.usage, Usage::default());
    }

    #[test]
    fn test_status_error_mapping() {
        let err = status_error(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"message":"slow down"}}"#.to_string(),
        );
        assert!(matches!(err, LlmError::RateLimited(m) if m == "slow down"));

        let err = status_error(StatusCode::BAD_GATEWAY, "upstream died".to_string());
        assert!(matches!(
            err,
            LlmError::ApiError { code: 502, ref message } if message == "upstream died"
        ));
    }

    #[test]
    fn test_client_construction() {
        let client = LiteLlmClient::new(
            "http://localhost:4000/".to_string(),
            Some("test-key".to_string()),
            "gpt-4".to_string(),
        )
        .expect("client should build");
        assert_eq!(client.api_base(), "http://localhost:4000");
        assert_eq!(client.completions_url(), "http://localhost:4000/chat/completions");
        assert!(client.has_api_key());

        let client = LiteLlmClient::new_with_defaults("key".to_string()).expect("client");
        assert_eq!(client.api_base(), OPENROUTER_API_BASE);
        assert_eq!(client.default_model(), DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn test_connection_error_is_request_failure() {
        let client = LiteLlmClient::with_timeout(
            "http://127.0.0.1:9".to_string(),
            None,
            "gpt-4".to_string(),
            Duration::from_secs(2),
        )
        .expect("client should build");

        let request = GenerationRequest::new("", vec![Message::user("test")]);
        let err = client.generate(request).await.unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed(_)));
    }
}
