use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;
use crate::priority::Priority;

pub const DEFAULT_SOURCE: &str = "syscalls";
pub const MISSING_VALUE: &str = "<NA>";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque handle returned by the chat service for a posted message; replies
/// addressed to it land in that message's thread.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadHandle(pub String);

impl ThreadHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scalar value of one entry in an alert's `output_fields`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

impl OutputValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn display(&self) -> Cow<'_, str> {
        match self {
            Self::String(value) => Cow::Borrowed(value),
            Self::Number(value) => Cow::Owned(value.to_string()),
            Self::Bool(true) => Cow::Borrowed("true"),
            Self::Bool(false) => Cow::Borrowed("false"),
            Self::Null => Cow::Borrowed(MISSING_VALUE),
        }
    }
}

/// Wire shape of an inbound alert.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub output: String,
    pub priority: String,
    pub rule: String,
    #[serde(default = "Utc::now")]
    pub time: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub output_fields: BTreeMap<String, OutputValue>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// Senders emit `null` for empty optional members; read it as absent.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl AlertPayload {
    pub fn parse(raw: &[u8]) -> Result<Self, DomainError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(DomainError::EmptyPayload);
        }

        let mut payload: Self = serde_json::from_slice(raw)
            .map_err(|error| DomainError::MalformedPayload(error.to_string()))?;
        if payload.source.trim().is_empty() {
            payload.source = DEFAULT_SOURCE.to_owned();
        }
        Ok(payload)
    }
}

/// One alert moving through the relay, plus the correlation state picked up
/// on the way (target channel, thread handle of the first chat post).
#[derive(Clone, Debug)]
pub struct AlertEvent {
    id: EventId,
    raw: Arc<[u8]>,
    payload: AlertPayload,
    priority: Priority,
    channel: Option<String>,
    thread: Option<ThreadHandle>,
}

impl AlertEvent {
    pub fn from_raw(raw: &[u8]) -> Result<Self, DomainError> {
        let payload = AlertPayload::parse(raw)?;
        Ok(Self::new(payload, raw))
    }

    pub fn new(payload: AlertPayload, raw: &[u8]) -> Self {
        let priority = Priority::classify(&payload.priority);
        Self { id: EventId::new(), raw: Arc::from(raw), payload, priority, channel: None, thread: None }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn raw_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw)
    }

    pub fn payload(&self) -> &AlertPayload {
        &self.payload
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn rule(&self) -> &str {
        &self.payload.rule
    }

    pub fn emitted_at(&self) -> DateTime<Utc> {
        self.payload.time
    }

    pub fn hostname(&self) -> Option<&str> {
        self.payload.hostname.as_deref().filter(|hostname| !hostname.trim().is_empty())
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn thread(&self) -> Option<&ThreadHandle> {
        self.thread.as_ref()
    }

    /// String-valued output fields in key order.
    pub fn string_fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.payload
            .output_fields
            .iter()
            .filter_map(|(key, value)| value.as_str().map(|value| (key.as_str(), value)))
    }

    /// Records the chat thread handle. Only the first assignment is accepted.
    pub fn attach_thread(&mut self, handle: ThreadHandle) -> Result<(), DomainError> {
        if self.thread.is_some() {
            return Err(DomainError::ThreadAlreadyAssigned { event_id: self.id.to_string() });
        }
        self.thread = Some(handle);
        Ok(())
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.payload.time)
    }

    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        // Negative ages (clock skew, future timestamps) are never stale.
        self.age(now).to_std().map(|age| age > window).unwrap_or(false)
    }
}
