//! HTTP client for a remote sandbox speaking JSON over `POST {base}/execute`.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{Sandbox, SandboxRequest, SandboxResponse, MAX_EXECUTION_TIMEOUT};
use crate::error::SandboxError;

/// Extra time allowed on the HTTP call beyond the execution timeout.
const TRANSPORT_GRACE: Duration = Duration::from_secs(10);

/// Sandbox reached over HTTP.
pub struct HttpSandbox {
    base_url: String,
    api_key: Option<String>,
    http_client: Client,
}

impl std::fmt::Debug for HttpSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSandbox")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpSandbox {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, SandboxError> {
        let http_client = Client::builder()
            .timeout(MAX_EXECUTION_TIMEOUT + TRANSPORT_GRACE)
            .build()
            .map_err(|e| {
                SandboxError::RequestFailed(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self {
            base_url: base_url.into(),
            api_key,
            http_client,
        })
    }

    /// Reads `CAPSULE_SANDBOX_URL` (required) and `CAPSULE_SANDBOX_API_KEY`.
    pub fn from_env() -> Result<Self, SandboxError> {
        let base_url = env::var("CAPSULE_SANDBOX_URL").map_err(|_| SandboxError::MissingEndpoint)?;
        let api_key = env::var("CAPSULE_SANDBOX_API_KEY").ok();
        Self::new(base_url, api_key)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Sandbox for HttpSandbox {
    async fn execute(&self, request: SandboxRequest) -> Result<SandboxResponse, SandboxError> {
        let url = format!("{}/execute", self.base_url.trim_end_matches('/'));

        let mut http_request = self
            .http_client
            .post(&url)
            .timeout(Duration::from_secs(request.timeout_secs) + TRANSPORT_GRACE)
            .header("Content-Type", "application/json");

        if let Some(ref api_key) = self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", api_key));
        }

        let http_response = http_request
            .json(&request)
            .send()
            .await
            .map_err(|e| SandboxError::RequestFailed(e.to_string()))?;

        let status = http_response.status();
        if !status.is_success() {
            let message = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(SandboxError::HttpStatus {
                code: status.as_u16(),
                message,
            });
        }

        http_response
            .json::<SandboxResponse>()
            .await
            .map_err(|e| SandboxError::MalformedResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_key() {
        let sandbox =
            HttpSandbox::new("http://localhost:9000", Some("secret".to_string())).unwrap();
        let debug = format!("{:?}", sandbox);
        assert!(debug.contains("has_api_key: true"));
        assert!(!debug.contains("secret"));
        assert_eq!(sandbox.base_url(), "http://localhost:9000");
    }
}
