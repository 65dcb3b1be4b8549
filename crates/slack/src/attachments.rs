use serde::Serialize;
use vigil_core::domain::{AlertEvent, ThreadHandle};

use crate::client::ChatMessage;

pub const DEFAULT_FOOTER: &str = "https://github.com/vigil-relay/vigil";

/// String output fields shorter than this render side by side.
const SHORT_FIELD_LIMIT: usize = 36;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttachmentField {
    pub title: String,
    pub value: String,
    pub short: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub color: String,
    pub fields: Vec<AttachmentField>,
    pub footer: String,
}

pub struct AttachmentBuilder {
    color: String,
    fields: Vec<AttachmentField>,
    footer: String,
}

impl AttachmentBuilder {
    pub fn new(color: impl Into<String>) -> Self {
        Self { color: color.into(), fields: Vec::new(), footer: DEFAULT_FOOTER.to_owned() }
    }

    pub fn short(mut self, title: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(AttachmentField { title: title.into(), value: value.into(), short: true });
        self
    }

    pub fn long(mut self, title: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(AttachmentField { title: title.into(), value: value.into(), short: false });
        self
    }

    pub fn fields<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut Vec<AttachmentField>),
    {
        build(&mut self.fields);
        self
    }

    pub fn build(self) -> Attachment {
        Attachment { color: self.color, fields: self.fields, footer: self.footer }
    }
}

/// Card for the first post of an alert: rule, priority, source, hostname,
/// string output fields in key order, then the emission time. The priority
/// field shows the label as sent; only the color comes from classification.
pub fn alert_attachment(event: &AlertEvent) -> Attachment {
    let builder = AttachmentBuilder::new(event.priority().color())
        .long("rule", event.rule())
        .short("priority", event.payload().priority.as_str())
        .short("source", event.payload().source.as_str());

    let builder = match event.hostname() {
        Some(hostname) => builder.short("hostname", hostname),
        None => builder,
    };

    builder
        .fields(|fields| {
            for (key, value) in event.string_fields() {
                fields.push(AttachmentField {
                    title: key.to_owned(),
                    value: value.to_owned(),
                    short: value.chars().count() < SHORT_FIELD_LIMIT,
                });
            }
        })
        .long("time", event.emitted_at().to_rfc3339())
        .build()
}

pub fn alert_message(event: &AlertEvent, channel: &str) -> ChatMessage {
    ChatMessage {
        channel: channel.to_owned(),
        text: event.payload().output.clone(),
        attachments: vec![alert_attachment(event)],
        thread: None,
    }
}

pub fn enrichment_reply(channel: &str, thread: &ThreadHandle, text: impl Into<String>) -> ChatMessage {
    ChatMessage {
        channel: channel.to_owned(),
        text: text.into(),
        attachments: Vec::new(),
        thread: Some(thread.clone()),
    }
}
