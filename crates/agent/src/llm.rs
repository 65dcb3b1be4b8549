use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("completion transport failed: {0}")]
    Transport(String),
    #[error("completion request timed out")]
    Timeout,
    #[error("completion API returned HTTP {status}")]
    Status { status: u16 },
    #[error("completion response could not be decoded: {0}")]
    Decode(String),
    #[error("completion API returned no choices")]
    EmptyChoices,
}

impl CompletionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::Status { .. } | Self::Decode(_) => true,
            Self::EmptyChoices => true,
        }
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [RequestMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

impl ChatCompletionResponse {
    fn into_text(self) -> Result<String, CompletionError> {
        self.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(CompletionError::EmptyChoices)
    }
}

pub struct OpenAiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: SecretString,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretString,
    ) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| CompletionError::Transport(error.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            model: model.into(),
            api_key,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request<'a>(&'a self, prompt: &'a str) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            temperature: 0.0,
            messages: [RequestMessage { role: "user", content: prompt }],
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.request(prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompletionError::Status { status: status.as_u16() });
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        debug!(model = %self.model, choices = parsed.choices.len(), "completion received");
        parsed.into_text()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ChatCompletionResponse, CompletionError, OpenAiClient};

    fn client() -> OpenAiClient {
        OpenAiClient::new("https://llm.example/v1/", "gpt-3.5-turbo", "sk-test".to_owned().into())
            .expect("client builds")
    }

    #[test]
    fn request_is_deterministic_single_user_message() {
        let client = client();
        let body = serde_json::to_value(client.request("explain this")).expect("serialize");

        assert_eq!(
            body,
            json!({
                "model": "gpt-3.5-turbo",
                "temperature": 0.0,
                "messages": [{"role": "user", "content": "explain this"}]
            })
        );
        assert_eq!(client.endpoint(), "https://llm.example/v1/chat/completions");
    }

    #[test]
    fn first_choice_is_returned() {
        let response: ChatCompletionResponse = serde_json::from_value(json!({
            "id": "cmpl-1",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "Problem: x"}},
                {"index": 1, "message": {"role": "assistant", "content": "ignored"}}
            ]
        }))
        .expect("response shape");

        assert_eq!(response.into_text(), Ok("Problem: x".to_owned()));
    }

    #[test]
    fn zero_choices_is_a_retryable_failure() {
        let response: ChatCompletionResponse =
            serde_json::from_value(json!({"choices": []})).expect("response shape");

        let error = response.into_text().unwrap_err();
        assert_eq!(error, CompletionError::EmptyChoices);
        assert!(error.is_retryable());
    }

    #[test]
    fn non_success_statuses_are_retried() {
        assert!(CompletionError::Status { status: 429 }.is_retryable());
        assert!(CompletionError::Status { status: 503 }.is_retryable());
        assert!(CompletionError::Timeout.is_retryable());
    }
}
