//! Slack side of the relay.
//!
//! - **Attachments** (`attachments`) - builds the colored alert card posted for every admitted event
//! - **Client** (`client`) - `ChatClient` seam plus the Web API implementation (`chat.postMessage`)
//!
//! # Flow
//!
//! ```text
//! AlertEvent → alert_message() → ChatMessage → ChatClient::post_message → ThreadHandle
//!                                                   ↑
//!                      enrichment reply (thread = handle of the first post)
//! ```

pub mod attachments;
pub mod client;

pub use attachments::{alert_attachment, alert_message, enrichment_reply, Attachment, AttachmentField};
pub use client::{ChatClient, ChatError, ChatMessage, SlackWebClient};
