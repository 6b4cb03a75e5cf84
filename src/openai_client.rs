use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Substituted whenever the generator is unavailable or fails; a turn
/// never fails because of the generator.
pub const FALLBACK_REPLY: &str =
    "I apologize, but I'm having trouble processing your request right now.";

const SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Keep your responses concise and friendly.";

// Length/cost cap on a single reply
const MAX_COMPLETION_TOKENS: u32 = 150;

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("Request error: {0}")]
    Request(String),
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("Empty completion in response")]
    EmptyCompletion,
}

/// Conversational response generator: prior context plus new user text in,
/// generated text out. Implementations may fail; callers substitute
/// [`FALLBACK_REPLY`] and carry on.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(
        &self,
        history: &[ChatTurnMessage],
        user_text: &str,
    ) -> Result<String, GeneratorError>;
}

/// Role + content pair handed to the generator as prior context.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurnMessage {
    pub role: String,
    pub content: String,
}

impl ChatTurnMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatTurnMessage>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
        }
    }

    async fn chat_completion(
        &self,
        messages: Vec<ChatTurnMessage>,
    ) -> Result<CompletionResponse, GeneratorError> {
        let request = CompletionRequest {
            model: self.model.clone(),
            max_tokens: MAX_COMPLETION_TOKENS,
            messages,
        };

        let backoff_config = ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        let operation = || async {
            let response = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .timeout(Duration::from_secs(30))
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_connect() || e.is_timeout() {
                        tracing::warn!("OpenAI API connection error (retrying): {}", e);
                        backoff::Error::transient(GeneratorError::Request(e.to_string()))
                    } else {
                        backoff::Error::permanent(GeneratorError::Request(e.to_string()))
                    }
                })?;

            let status = response.status();
            let body = response.text().await.map_err(|e| {
                backoff::Error::permanent(GeneratorError::Request(e.to_string()))
            })?;

            // Retry transient upstream failures and rate limits
            if matches!(status.as_u16(), 429 | 500 | 502 | 503) {
                tracing::warn!("OpenAI API returned {} (retrying)", status);
                return Err(backoff::Error::transient(GeneratorError::Api {
                    status: status.as_u16(),
                    body,
                }));
            }

            if !status.is_success() {
                return Err(backoff::Error::permanent(GeneratorError::Api {
                    status: status.as_u16(),
                    body,
                }));
            }

            serde_json::from_str(&body)
                .map_err(|e| backoff::Error::permanent(GeneratorError::Request(e.to_string())))
        };

        retry(backoff_config, operation).await
    }
}

#[async_trait]
impl ResponseGenerator for OpenAiClient {
    async fn generate(
        &self,
        history: &[ChatTurnMessage],
        user_text: &str,
    ) -> Result<String, GeneratorError> {
        let mut messages = vec![ChatTurnMessage {
            role: "system".to_string(),
            content: SYSTEM_PROMPT.to_string(),
        }];
        messages.extend_from_slice(history);
        messages.push(ChatTurnMessage::user(user_text));

        let response = self.chat_completion(messages).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.is_empty())
            .ok_or(GeneratorError::EmptyCompletion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_response_parsing() {
        let body = r#"{
            "id": "chatcmpl-123",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "Hello there!"}}
            ]
        }"#;

        let parsed: CompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("Hello there!")
        );
    }

    #[test]
    fn test_turn_message_roles() {
        assert_eq!(ChatTurnMessage::user("hi").role, "user");
        assert_eq!(ChatTurnMessage::assistant("hi").role, "assistant");
    }
}
