//! OpenAI-compatible chat completion client.
//!
//! This client works with any OpenAI-compatible API endpoint. Failures are
//! mapped onto classified [`RagError`] variants so the retry policy can tell
//! transient errors from fatal ones.

use crate::config::LlmConfig;
use crate::error::{RagError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Error envelope returned with non-2xx statuses.
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Token accounting reported by the API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A completed chat turn.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub finish_reason: Option<String>,
    /// Absent when the endpoint does not report usage.
    pub usage: Option<TokenUsage>,
}

/// A text-completion capability.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Send one chat completion request. No retries.
    async fn chat(&self, messages: &[Message]) -> Result<LlmResponse>;

    /// Model name reported in results.
    fn model(&self) -> &str;

    /// One user turn, preceded by `system` when given.
    async fn complete(&self, system: Option<&str>, user: &str) -> Result<LlmResponse> {
        let messages: Vec<Message> = system
            .map(Message::system)
            .into_iter()
            .chain(std::iter::once(Message::user(user)))
            .collect();
        self.chat(&messages).await
    }
}

/// HTTP backend for `/v1/chat/completions`.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
}

impl LlmClient {
    /// The request timeout comes from `config.timeout_secs`.
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.api_base.trim_end_matches('/')
        )
    }

    fn request<'a>(&'a self, messages: &'a [Message]) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
        }
    }

    /// Round-trip a trivial prompt and check the model echoes it.
    pub async fn test_connection(&self) -> Result<()> {
        let reply = self.complete(None, "Reply with the single word: ready").await?;
        if reply.content.to_lowercase().contains("ready") {
            Ok(())
        } else {
            Err(RagError::LlmParse(format!(
                "Unexpected test reply: {}",
                reply.content
            )))
        }
    }
}

/// Map a non-success HTTP response onto a classified error.
fn status_error(status: StatusCode, body: &str) -> RagError {
    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());

    if status == StatusCode::TOO_MANY_REQUESTS {
        RagError::RateLimited(message)
    } else {
        RagError::LlmApi {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn chat(&self, messages: &[Message]) -> Result<LlmResponse> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&self.request(messages))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        let completion: ChatCompletionResponse = serde_json::from_str(&body)?;

        let Some(choice) = completion.choices.into_iter().next() else {
            return Err(RagError::LlmParse("completion had no choices".to_string()));
        };

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            usage: completion.usage,
        })
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_base: &str) -> LlmClient {
        LlmClient::new(LlmConfig {
            api_base: api_base.to_string(),
            model: "gpt-4o-mini".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_endpoint_ignores_trailing_slash() {
        for base in ["https://llm.internal/", "https://llm.internal"] {
            assert_eq!(
                client(base).endpoint(),
                "https://llm.internal/v1/chat/completions"
            );
        }
    }

    #[test]
    fn test_request_body_shape() {
        let client = client("https://llm.internal");
        let messages = [Message::system("rules"), Message::user("question")];
        let body = serde_json::to_value(client.request(&messages)).unwrap();

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "question");
        assert_eq!(body["max_tokens"], 2048);
    }

    #[test]
    fn test_status_error_classification() {
        let rate = status_error(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"message": "Rate limit reached", "type": "requests"}}"#,
        );
        assert!(matches!(rate, RagError::RateLimited(ref m) if m == "Rate limit reached"));
        assert!(rate.is_retryable());

        let server = status_error(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(server.is_retryable());

        let auth = status_error(StatusCode::UNAUTHORIZED, r#"{"error": {"message": "bad key"}}"#);
        assert!(matches!(auth, RagError::LlmApi { status: 401, .. }));
        assert!(!auth.is_retryable());
    }

    #[test]
    fn test_parse_completion_with_usage() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": "Answer"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Answer"));
        assert_eq!(parsed.usage.unwrap().total_tokens, 15);
    }
}
