use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};
use vigil_core::bus::{Subscriber, Topic};
use vigil_core::domain::{AlertEvent, ThreadHandle};
use vigil_core::retry::{RetryDecision, RetryPolicy};
use vigil_slack::attachments::alert_message;
use vigil_slack::client::{ChatClient, ChatError};

use super::AlertBus;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Posted and handed to the enrichment stage.
    Forwarded { thread: ThreadHandle },
    /// Posted, but the enrich hop was refused; the alert stays unenriched.
    PostedOnly { thread: ThreadHandle },
    Dropped,
}

/// Subscriber on `raw-alert`: posts the alert card and forwards the event,
/// now carrying its thread handle, to `enrich`.
pub struct Notifier {
    chat: Arc<dyn ChatClient>,
    bus: AlertBus,
    default_channel: String,
    retry: RetryPolicy,
}

impl Notifier {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        bus: AlertBus,
        default_channel: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self { chat, bus, default_channel: default_channel.into(), retry }
    }

    pub async fn process(&self, mut event: AlertEvent) -> NotifyOutcome {
        let correlation_id = event.id().to_string();
        let channel = event.channel().unwrap_or(&self.default_channel).to_owned();
        let message = alert_message(&event, &channel);

        let posted = self
            .retry
            .run(
                |_| self.chat.post_message(&message),
                |error: &ChatError| RetryDecision::from_retryable(error.is_retryable()),
                |retry| {
                    warn!(
                        event_name = "pipeline.notifier.retry",
                        correlation_id = %correlation_id,
                        rule = %event.rule(),
                        priority = %event.priority(),
                        attempt = retry.attempt,
                        delay_ms = retry.delay.as_millis() as u64,
                        error = %retry.error,
                        "chat post failed; retrying"
                    );
                },
            )
            .await;

        let thread = match posted {
            Ok(thread) => thread,
            Err(failure) => {
                error!(
                    event_name = "pipeline.notifier.dropped",
                    correlation_id = %correlation_id,
                    rule = %event.rule(),
                    priority = %event.priority(),
                    attempts = failure.attempts(),
                    error = %failure,
                    "chat post failed; alert dropped"
                );
                return NotifyOutcome::Dropped;
            }
        };

        if let Err(domain_error) = event.attach_thread(thread.clone()) {
            error!(
                event_name = "pipeline.notifier.thread_conflict",
                correlation_id = %correlation_id,
                rule = %event.rule(),
                priority = %event.priority(),
                error = %domain_error,
                "alert already carried a thread handle; not forwarding"
            );
            return NotifyOutcome::PostedOnly { thread };
        }

        info!(
            event_name = "pipeline.notifier.posted",
            correlation_id = %correlation_id,
            rule = %event.rule(),
            priority = %event.priority(),
            thread = %thread,
            "alert posted to chat"
        );

        let rule = event.rule().to_owned();
        let priority = event.priority();
        match self.bus.publish(Topic::ENRICH, event) {
            Ok(_) => NotifyOutcome::Forwarded { thread },
            Err(bus_error) => {
                warn!(
                    event_name = "pipeline.notifier.enrich_skipped",
                    correlation_id = %correlation_id,
                    rule = %rule,
                    priority = %priority,
                    error = %bus_error,
                    "could not hand alert to enrichment"
                );
                NotifyOutcome::PostedOnly { thread }
            }
        }
    }
}

#[async_trait]
impl Subscriber<AlertEvent> for Notifier {
    type Work = AlertEvent;

    fn accept(&self, event: AlertEvent) -> Option<AlertEvent> {
        Some(event)
    }

    async fn complete(&self, event: AlertEvent) {
        self.process(event).await;
    }
}
