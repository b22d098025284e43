//! HTTP client for the Anthropic Messages API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use vaultzero_shared::{AnthropicConfig, Result, VaultZeroError};

use crate::{Generation, GenerationRequest, Generator, Role};

/// API version header value.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// User-Agent string for generation requests.
const USER_AGENT: &str = concat!("VaultZero/", env!("CARGO_PKG_VERSION"));

/// Connection settings for [`AnthropicClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl ClientOptions {
    pub fn from_config(config: &AnthropicConfig, api_key: String) -> Self {
        Self {
            api_key,
            base_url: config.base_url.clone(),
            timeout: config.request_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// One long-lived client handle, shared by every stage of a run.
pub struct AnthropicClient {
    http: Client,
    endpoint: Url,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(opts: ClientOptions) -> Result<Self> {
        let base = Url::parse(&opts.base_url).map_err(|e| {
            VaultZeroError::config(format!("invalid base URL '{}': {e}", opts.base_url))
        })?;
        let endpoint = base
            .join("v1/messages")
            .map_err(|e| VaultZeroError::config(format!("invalid base URL: {e}")))?;

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(opts.timeout)
            .build()
            .map_err(|e| VaultZeroError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint,
            api_key: opts.api_key,
        })
    }
}

#[async_trait]
impl Generator for AnthropicClient {
    #[instrument(skip_all, fields(model = %request.model))]
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let messages = request
            .messages
            .iter()
            .filter_map(|m| match m.role {
                Role::System => None,
                Role::User => Some(WireMessage {
                    role: "user",
                    content: &m.content,
                }),
                Role::Assistant => Some(WireMessage {
                    role: "assistant",
                    content: &m.content,
                }),
            })
            .collect();

        let body = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages,
        };

        let started = Instant::now();
        let response = self
            .http
            .post(self.endpoint.clone())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| VaultZeroError::Generation(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<ErrorEnvelope>(&text) {
                Ok(env) => format!("{}: {}", env.error.kind, env.error.message),
                Err(_) => text,
            };
            return Err(VaultZeroError::Generation(format!("HTTP {status}: {detail}")));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| VaultZeroError::Generation(format!("invalid response body: {e}")))?;

        let text: String = parsed
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text.as_str())
            .collect();
        let latency_ms = started.elapsed().as_millis() as u64;

        debug!(
            tokens_in = parsed.usage.input_tokens,
            tokens_out = parsed.usage.output_tokens,
            latency_ms,
            "generation complete"
        );

        Ok(Generation {
            text,
            model: if parsed.model.is_empty() {
                request.model.clone()
            } else {
                parsed.model
            },
            tokens_in: parsed.usage.input_tokens,
            tokens_out: parsed.usage.output_tokens,
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Message, create_prompt};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> AnthropicClient {
        AnthropicClient::new(ClientOptions {
            api_key: "test-key".into(),
            base_url: server.uri(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn request(messages: Vec<Message>) -> GenerationRequest {
        GenerationRequest {
            model: "claude-test".into(),
            messages,
            max_tokens: 256,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn sends_messages_request() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(serde_json::json!({
                "model": "claude-test",
                "max_tokens": 256,
                "system": "You are an auditor.",
                "messages": [{"role": "user", "content": "Score identity."}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "claude-test",
                "content": [{"type": "text", "text": "SCORE: 3"}],
                "usage": {"input_tokens": 12, "output_tokens": 4}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let generation = client
            .generate(&request(create_prompt("You are an auditor.", "Score identity.", &[])))
            .await
            .unwrap();

        assert_eq!(generation.text, "SCORE: 3");
        assert_eq!(generation.tokens_in, 12);
        assert_eq!(generation.tokens_out, 4);
        assert_eq!(generation.model, "claude-test");
    }

    #[tokio::test]
    async fn concatenates_text_blocks() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [
                    {"type": "text", "text": "GAPS:\n"},
                    {"type": "tool_use", "id": "x"},
                    {"type": "text", "text": "- none"}
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let generation = client
            .generate(&request(vec![Message::user("hi")]))
            .await
            .unwrap();

        assert_eq!(generation.text, "GAPS:\n- none");
        assert_eq!(generation.model, "claude-test");
    }

    #[tokio::test]
    async fn api_error_becomes_generation_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_json(serde_json::json!({
                "type": "error",
                "error": {"type": "overloaded_error", "message": "Overloaded"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .generate(&request(vec![Message::user("hi")]))
            .await
            .unwrap_err();

        assert!(matches!(err, VaultZeroError::Generation(_)));
        let msg = err.to_string();
        assert!(msg.contains("529"), "{msg}");
        assert!(msg.contains("overloaded_error"), "{msg}");
    }

    #[test]
    fn rejects_bad_base_url() {
        let result = AnthropicClient::new(ClientOptions {
            api_key: "k".into(),
            base_url: "not a url".into(),
            timeout: Duration::from_secs(1),
        });
        assert!(result.is_err());
    }
}
