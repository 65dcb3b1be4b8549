use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use vigil_core::domain::ThreadHandle;

use crate::attachments::Attachment;

pub const BOT_USERNAME: &str = "Vigil";
pub const BOT_ICON_URL: &str = "https://raw.githubusercontent.com/cncf/artwork/main/projects/falco/icon/color/falco-icon-color.png";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Slack error codes that describe a transient condition on Slack's side.
const TRANSIENT_API_ERRORS: [&str; 5] =
    ["ratelimited", "internal_error", "fatal_error", "service_unavailable", "request_timeout"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub channel: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub thread: Option<ThreadHandle>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("chat transport failed: {0}")]
    Transport(String),
    #[error("chat request timed out")]
    Timeout,
    #[error("chat API returned HTTP {status}")]
    Status { status: u16 },
    #[error("chat API response could not be decoded: {0}")]
    Decode(String),
    #[error("chat API rejected the message: {code}")]
    Api { code: String },
    #[error("chat API response is missing the message timestamp")]
    MissingThread,
}

impl ChatError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::Status { .. } | Self::Decode(_) => true,
            Self::Api { code } => TRANSIENT_API_ERRORS.contains(&code.as_str()),
            Self::MissingThread => false,
        }
    }
}

impl From<reqwest::Error> for ChatError {
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
pub trait ChatClient: Send + Sync {
    /// Posts `message` and returns the handle a later reply can thread under.
    async fn post_message(&self, message: &ChatMessage) -> Result<ThreadHandle, ChatError>;
}

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "no_attachments")]
    attachments: &'a [Attachment],
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_ts: Option<&'a str>,
    username: &'static str,
    icon_url: &'static str,
}

impl<'a> PostMessageRequest<'a> {
    fn from_message(message: &'a ChatMessage) -> Self {
        Self {
            channel: &message.channel,
            text: &message.text,
            attachments: &message.attachments,
            thread_ts: message.thread.as_ref().map(ThreadHandle::as_str),
            username: BOT_USERNAME,
            icon_url: BOT_ICON_URL,
        }
    }
}

fn no_attachments(attachments: &&[Attachment]) -> bool {
    attachments.is_empty()
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    error: Option<String>,
    ts: Option<String>,
}

impl PostMessageResponse {
    fn into_thread(self) -> Result<ThreadHandle, ChatError> {
        if !self.ok {
            return Err(ChatError::Api {
                code: self.error.unwrap_or_else(|| "unknown_error".to_owned()),
            });
        }
        self.ts.filter(|ts| !ts.is_empty()).map(ThreadHandle).ok_or(ChatError::MissingThread)
    }
}

pub struct SlackWebClient {
    client: Client,
    base_url: String,
    token: SecretString,
}

impl SlackWebClient {
    pub fn new(base_url: impl Into<String>, token: SecretString) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| ChatError::Transport(error.to_string()))?;
        Ok(Self { client, base_url: base_url.into().trim_end_matches('/').to_owned(), token })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat.postMessage", self.base_url)
    }
}

#[async_trait]
impl ChatClient for SlackWebClient {
    async fn post_message(&self, message: &ChatMessage) -> Result<ThreadHandle, ChatError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.token.expose_secret())
            .json(&PostMessageRequest::from_message(message))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Status { status: status.as_u16() });
        }

        let parsed: PostMessageResponse = response.json().await?;
        let thread = parsed.into_thread()?;
        debug!(
            channel = %message.channel,
            threaded = message.thread.is_some(),
            ts = %thread,
            "chat message posted"
        );
        Ok(thread)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use vigil_core::domain::ThreadHandle;

    use super::{
        ChatError, ChatMessage, PostMessageRequest, PostMessageResponse, SlackWebClient,
        BOT_USERNAME,
    };
    use crate::attachments::AttachmentBuilder;

    fn response(value: serde_json::Value) -> PostMessageResponse {
        serde_json::from_value(value).expect("response shape")
    }

    #[test]
    fn request_body_carries_thread_and_identity() {
        let message = ChatMessage {
            channel: "C0ALERTS".to_owned(),
            text: "Problem: shell in container".to_owned(),
            attachments: Vec::new(),
            thread: Some(ThreadHandle("1700000000.000100".to_owned())),
        };

        let body = serde_json::to_value(PostMessageRequest::from_message(&message)).expect("serialize");

        assert_eq!(body["channel"], "C0ALERTS");
        assert_eq!(body["thread_ts"], "1700000000.000100");
        assert_eq!(body["username"], BOT_USERNAME);
        assert!(body.get("attachments").is_none());
    }

    #[test]
    fn first_post_body_has_attachments_and_no_thread() {
        let message = ChatMessage {
            channel: "C0ALERTS".to_owned(),
            text: "output".to_owned(),
            attachments: vec![AttachmentBuilder::new("#ffc700").long("rule", "r1").build()],
            thread: None,
        };

        let body = serde_json::to_value(PostMessageRequest::from_message(&message)).expect("serialize");

        assert!(body.get("thread_ts").is_none());
        assert_eq!(body["attachments"][0]["color"], "#ffc700");
        assert_eq!(body["attachments"][0]["fields"][0]["title"], "rule");
    }

    #[test]
    fn ok_response_yields_thread_handle() {
        let thread = response(json!({"ok": true, "ts": "1700000000.000100"})).into_thread();
        assert_eq!(thread, Ok(ThreadHandle("1700000000.000100".to_owned())));
    }

    #[test]
    fn api_errors_are_classified() {
        let auth = response(json!({"ok": false, "error": "invalid_auth"})).into_thread().unwrap_err();
        let limited = response(json!({"ok": false, "error": "ratelimited"})).into_thread().unwrap_err();
        let missing = response(json!({"ok": true})).into_thread().unwrap_err();

        assert_eq!(auth, ChatError::Api { code: "invalid_auth".to_owned() });
        assert!(!auth.is_retryable());
        assert!(limited.is_retryable());
        assert_eq!(missing, ChatError::MissingThread);
    }

    #[test]
    fn transport_level_failures_are_retryable() {
        assert!(ChatError::Timeout.is_retryable());
        assert!(ChatError::Status { status: 502 }.is_retryable());
        assert!(ChatError::Transport("connection reset".to_owned()).is_retryable());
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let client = SlackWebClient::new("https://slack.example/api/", "xoxb-test".to_owned().into())
            .expect("client builds");
        assert_eq!(client.endpoint(), "https://slack.example/api/chat.postMessage");
    }
}
