//! The `ModelClient` seam: the one place NarraForge talks to an LLM
//! provider over the network.
//!
//! Built on the `reqwest` dependency and the request/response
//! cycle of `orchestrator/runner.rs`'s subprocess loop, replayed here as an
//! HTTP call instead of a subprocess invocation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One message in a chat-style completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }
}

/// A successful completion, along with the token counts needed for cost
/// accounting.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// The three error classes the router needs the client to distinguish, so
/// it can branch retry/fallback policy on the kind rather than on
/// string-matching a provider's error body.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientCallError {
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("transient provider error: rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },
    #[error("permanent provider error (status {status}): {body}")]
    Permanent { status: u16, body: String },
}

/// A request to complete one prompt against one concrete model.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model_id: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// The egress interface every concrete provider implementation satisfies.
/// The orchestrator/router never talk to `reqwest` directly — only through
/// this trait — so tests substitute a `MockModelClient` with the identical
/// seam.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<ModelResponse, ClientCallError>;

    /// Provider identifier used in circuit-breaker state and the cost
    /// ledger's `model_id` column prefix.
    fn provider_id(&self) -> &str;
}

/// Concrete HTTP-backed implementation, talking to an Anthropic-shaped
/// messages API over `reqwest` with `rustls`.
pub struct HttpModelClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    provider_id: String,
    timeout: Duration,
}

impl HttpModelClient {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            api_key: api_key.into(),
            provider_id: provider_id.into(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct ProviderRequestBody<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: &'a [Message],
}

#[derive(Deserialize)]
struct ProviderUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Deserialize)]
struct ProviderContentBlock {
    text: String,
}

#[derive(Deserialize)]
struct ProviderResponseBody {
    content: Vec<ProviderContentBlock>,
    usage: ProviderUsage,
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(&self, request: CompletionRequest) -> Result<ModelResponse, ClientCallError> {
        let body = ProviderRequestBody {
            model: &request.model_id,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: &request.messages,
        };

        let response = self
            .http
            .post(format!("{}/messages", self.api_base))
            .timeout(self.timeout)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() || err.is_connect() {
                    ClientCallError::Transient(err.to_string())
                } else {
                    ClientCallError::Transient(err.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ClientCallError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientCallError::Transient(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientCallError::Permanent { status: status.as_u16(), body });
        }

        let parsed: ProviderResponseBody = response
            .json()
            .await
            .map_err(|err| ClientCallError::Transient(format!("malformed response body: {err}")))?;

        let text = parsed.content.into_iter().map(|c| c.text).collect::<Vec<_>>().join("");

        Ok(ModelResponse {
            text,
            prompt_tokens: parsed.usage.input_tokens,
            completion_tokens: parsed.usage.output_tokens,
        })
    }

    fn provider_id(&self) -> &str {
        &self.provider_id
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{MockModelClient, ScriptedOutcome};
    use super::*;

    #[tokio::test]
    async fn mock_client_replays_script_in_order() {
        let client = MockModelClient::new(
            "primary",
            vec![
                ScriptedOutcome::Err(ClientCallError::RateLimited { retry_after: None }),
                ScriptedOutcome::Ok(ModelResponse { text: "ok".into(), prompt_tokens: 10, completion_tokens: 5 }),
            ],
        );
        let req = CompletionRequest {
            model_id: "mini".into(),
            messages: vec![Message::user("hi")],
            max_tokens: 100,
            temperature: 0.5,
        };
        assert!(client.complete(req.clone()).await.is_err());
        let response = client.complete(req).await.unwrap();
        assert_eq!(response.text, "ok");
        assert_eq!(client.call_count(), 2);
    }
}
