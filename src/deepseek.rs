//! DeepSeek chat-completion client.
//!
//! DeepSeek exposes an OpenAI-compatible REST API. We talk to it directly
//! with `reqwest` instead of through a provider abstraction because the
//! connectivity check has to report the exact upstream HTTP status, and the
//! request shape is a handful of fields.

use crate::config::ServiceConfig;
use crate::error::BeautifyError;
use crate::store::preview_body;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One chat message in the OpenAI wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Sampling options for a single call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

/// The parts of a completion the pipeline cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCompletion {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Result of the connectivity check, serialised as-is by `/api/test-deepseek`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingOutcome {
    /// True exactly when the upstream answered with a 2xx status.
    pub success: bool,
    pub upstream_status: Option<u16>,
    pub model: String,
    pub latency_ms: u64,
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl PingOutcome {
    /// Outcome reported when no API key is configured.
    pub fn not_configured(model: &str) -> Self {
        Self {
            success: false,
            upstream_status: None,
            model: model.to_string(),
            latency_ms: 0,
            reply: None,
            error: Some("DEEPSEEK_API_KEY is not set".to_string()),
        }
    }
}

// ── Wire types ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Pull a readable message out of an error response body.
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| preview_body(body))
}

// ── Client ────────────────────────────────────────────────────────────────

/// Thin DeepSeek REST client. Cheap to clone.
#[derive(Clone)]
pub struct DeepSeekClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for DeepSeekClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepSeekClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl DeepSeekClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, BeautifyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BeautifyError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Build a client from configuration, or `None` when no key is set.
    pub fn from_config(config: &ServiceConfig) -> Result<Option<Self>, BeautifyError> {
        match &config.deepseek_api_key {
            Some(key) => Ok(Some(Self::new(
                key,
                &config.deepseek_base_url,
                &config.model,
                config.api_timeout_secs,
            )?)),
            None => Ok(None),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream: false,
        };
        self.http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
    }

    /// Run one chat completion.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<ChatCompletion, BeautifyError> {
        let resp = self.send(messages, options).await.map_err(|e| BeautifyError::LlmApi {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| BeautifyError::LlmApi {
            status: Some(status.as_u16()),
            message: format!("failed to read body: {e}"),
        })?;

        if !status.is_success() {
            return Err(BeautifyError::LlmApi {
                status: Some(status.as_u16()),
                message: upstream_message(&text),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| BeautifyError::LlmApi {
            status: Some(status.as_u16()),
            message: format!("unexpected response shape: {e}"),
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BeautifyError::LlmApi {
                status: Some(status.as_u16()),
                message: "response contained no choices".into(),
            })?;
        let usage = parsed.usage.unwrap_or_default();

        debug!(
            "DeepSeek: {} prompt tokens, {} completion tokens",
            usage.prompt_tokens, usage.completion_tokens
        );

        Ok(ChatCompletion {
            content,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }

    /// Send a tiny prompt and report whether DeepSeek answered with 2xx.
    ///
    /// Never returns an error: transport failures become an unsuccessful
    /// outcome without an upstream status.
    pub async fn ping(&self) -> PingOutcome {
        let start = Instant::now();
        let messages = [ChatMessage::user("Reply with the single word: pong")];
        let options = CompletionOptions {
            temperature: Some(0.0),
            max_tokens: Some(5),
        };

        let resp = match self.send(&messages, &options).await {
            Ok(r) => r,
            Err(e) => {
                warn!("DeepSeek ping failed to connect: {}", e);
                return PingOutcome {
                    success: false,
                    upstream_status: None,
                    model: self.model.clone(),
                    latency_ms: start.elapsed().as_millis() as u64,
                    reply: None,
                    error: Some(e.to_string()),
                };
            }
        };

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let latency_ms = start.elapsed().as_millis() as u64;

        if status.is_success() {
            let reply = serde_json::from_str::<ChatResponse>(&text)
                .ok()
                .and_then(|r| r.choices.into_iter().next())
                .and_then(|c| c.message.content)
                .map(|s| s.trim().to_string());
            info!("DeepSeek ping OK (HTTP {}, {}ms)", status.as_u16(), latency_ms);
            PingOutcome {
                success: true,
                upstream_status: Some(status.as_u16()),
                model: self.model.clone(),
                latency_ms,
                reply,
                error: None,
            }
        } else {
            warn!("DeepSeek ping got HTTP {}", status.as_u16());
            PingOutcome {
                success: false,
                upstream_status: Some(status.as_u16()),
                model: self.model.clone(),
                latency_ms,
                reply: None,
                error: Some(upstream_message(&text)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    const OK_BODY: &str = r#"{
        "id": "chatcmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "<h1>Hi</h1>"}}],
        "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
    }"#;

    fn client(url: &str) -> DeepSeekClient {
        DeepSeekClient::new("sk-test", url, "deepseek-chat", 5).unwrap()
    }

    #[tokio::test]
    async fn chat_parses_content_and_usage() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "deepseek-chat",
                "max_tokens": 100,
                "stream": false
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(OK_BODY)
            .create_async()
            .await;

        let out = client(&server.url())
            .chat(
                &[ChatMessage::system("s"), ChatMessage::user("u")],
                &CompletionOptions {
                    temperature: Some(0.3),
                    max_tokens: Some(100),
                },
            )
            .await
            .unwrap();

        assert_eq!(out.content, "<h1>Hi</h1>");
        assert_eq!(out.prompt_tokens, 12);
        assert_eq!(out.completion_tokens, 4);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn chat_surfaces_upstream_error_message() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error":{"message":"Authentication Fails","type":"authentication_error"}}"#)
            .create_async()
            .await;

        let err = client(&server.url())
            .chat(&[ChatMessage::user("u")], &CompletionOptions::default())
            .await
            .unwrap_err();
        match err {
            BeautifyError::LlmApi { status, message } => {
                assert_eq!(status, Some(401));
                assert_eq!(message, "Authentication Fails");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn chat_without_choices_is_an_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let err = client(&server.url())
            .chat(&[ChatMessage::user("u")], &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BeautifyError::LlmApi { .. }));
    }

    #[tokio::test]
    async fn ping_success_follows_2xx() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(serde_json::json!({ "max_tokens": 5 })))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":" pong "}}]}"#)
            .create_async()
            .await;

        let out = client(&server.url()).ping().await;
        assert!(out.success);
        assert_eq!(out.upstream_status, Some(200));
        assert_eq!(out.reply.as_deref(), Some("pong"));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn ping_failure_reports_status() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/chat/completions")
            .with_status(402)
            .with_body(r#"{"error":{"message":"Insufficient Balance"}}"#)
            .create_async()
            .await;

        let out = client(&server.url()).ping().await;
        assert!(!out.success);
        assert_eq!(out.upstream_status, Some(402));
        assert_eq!(out.error.as_deref(), Some("Insufficient Balance"));
    }

    #[tokio::test]
    async fn ping_unreachable_has_no_status() {
        // Port 9 (discard) on localhost is closed in test environments.
        let out = client("http://127.0.0.1:9").ping().await;
        assert!(!out.success);
        assert_eq!(out.upstream_status, None);
        assert!(out.error.is_some());
    }

    #[test]
    fn upstream_message_falls_back_to_body() {
        assert_eq!(upstream_message("gateway down"), "gateway down");
        assert_eq!(upstream_message(r#"{"error":{"message":"x"}}"#), "x");
    }

    #[test]
    fn ping_outcome_is_camel_case() {
        let v = serde_json::to_value(PingOutcome::not_configured("deepseek-chat")).unwrap();
        assert_eq!(v["success"], false);
        assert!(v.get("upstreamStatus").is_some());
        assert!(v.get("latencyMs").is_some());
    }
}
