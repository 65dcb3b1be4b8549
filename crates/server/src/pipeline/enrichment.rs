use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use vigil_agent::llm::{CompletionError, LlmClient};
use vigil_agent::prompt::PromptTemplate;
use vigil_core::bus::Subscriber;
use vigil_core::domain::{AlertEvent, ThreadHandle};
use vigil_core::rate_limit::{RateLimiter, Reservation};
use vigil_core::retry::{RetryDecision, RetryPolicy};
use vigil_slack::attachments::enrichment_reply;
use vigil_slack::client::{ChatClient, ChatError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnrichOutcome {
    Replied { thread: ThreadHandle },
    Stale,
    Throttled,
    Unthreaded,
    PromptFailed,
    CompletionFailed,
    ReplyFailed,
}

#[derive(Clone, Debug)]
pub struct EnrichmentSettings {
    pub staleness_window: Duration,
    pub wait_deadline: Duration,
    pub default_channel: String,
}

/// Subscriber on `enrich`: asks the model to explain the alert and replies
/// in the alert's chat thread.
pub struct Enricher {
    llm: Arc<dyn LlmClient>,
    chat: Arc<dyn ChatClient>,
    limiter: Arc<RateLimiter>,
    prompt: Arc<PromptTemplate>,
    retry: RetryPolicy,
    settings: EnrichmentSettings,
}

/// An alert that passed the local checks and holds its limiter reservation.
pub struct PendingEnrichment {
    event: AlertEvent,
    thread: ThreadHandle,
    prompt: String,
    reservation: Reservation,
}

impl Enricher {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        chat: Arc<dyn ChatClient>,
        limiter: Arc<RateLimiter>,
        prompt: Arc<PromptTemplate>,
        retry: RetryPolicy,
        settings: EnrichmentSettings,
    ) -> Self {
        Self { llm, chat, limiter, prompt, retry, settings }
    }

    /// Runs the checks that need no I/O and takes a limiter reservation.
    /// Called in delivery order, so reservations follow publish order.
    pub fn begin(&self, event: AlertEvent) -> Result<PendingEnrichment, EnrichOutcome> {
        let correlation_id = event.id().to_string();
        let rule = event.rule();
        let priority = event.priority();

        let Some(thread) = event.thread().cloned() else {
            error!(
                event_name = "pipeline.enrichment.unthreaded",
                correlation_id = %correlation_id,
                rule = %rule,
                priority = %priority,
                "alert reached enrichment without a thread handle"
            );
            return Err(EnrichOutcome::Unthreaded);
        };

        if event.is_stale(Utc::now(), self.settings.staleness_window) {
            debug!(
                event_name = "pipeline.enrichment.stale",
                correlation_id = %correlation_id,
                rule = %rule,
                priority = %priority,
                age_secs = event.age(Utc::now()).num_seconds(),
                "alert older than staleness window; skipping enrichment"
            );
            return Err(EnrichOutcome::Stale);
        }

        let prompt = match self.prompt.render(&event) {
            Ok(prompt) => prompt,
            Err(prompt_error) => {
                error!(
                    event_name = "pipeline.enrichment.prompt_failed",
                    correlation_id = %correlation_id,
                    rule = %rule,
                    priority = %priority,
                    error = %prompt_error,
                    "could not render enrichment prompt"
                );
                return Err(EnrichOutcome::PromptFailed);
            }
        };

        let reservation = self.limiter.reserve(Instant::now() + self.settings.wait_deadline);
        Ok(PendingEnrichment { event, thread, prompt, reservation })
    }

    /// Waits for the reserved token, asks for the completion and posts it in
    /// the alert's thread.
    pub async fn finish(&self, pending: PendingEnrichment) -> EnrichOutcome {
        let PendingEnrichment { event, thread, prompt, reservation } = pending;
        let correlation_id = event.id().to_string();
        let rule = event.rule();
        let priority = event.priority();

        if let Err(limit_error) = reservation.wait().await {
            warn!(
                event_name = "pipeline.enrichment.throttled",
                correlation_id = %correlation_id,
                rule = %rule,
                priority = %priority,
                error = %limit_error,
                "rate limiter wait cancelled; alert left unenriched"
            );
            return EnrichOutcome::Throttled;
        }

        let completion = self
            .retry
            .run(
                |_| self.llm.complete(&prompt),
                |error: &CompletionError| RetryDecision::from_retryable(error.is_retryable()),
                |retry| {
                    warn!(
                        event_name = "pipeline.enrichment.completion_retry",
                        correlation_id = %correlation_id,
                        rule = %rule,
                        priority = %priority,
                        attempt = retry.attempt,
                        delay_ms = retry.delay.as_millis() as u64,
                        error = %retry.error,
                        "completion failed; retrying"
                    );
                },
            )
            .await;

        let text = match completion {
            Ok(text) => text,
            Err(failure) => {
                error!(
                    event_name = "pipeline.enrichment.completion_failed",
                    correlation_id = %correlation_id,
                    rule = %rule,
                    priority = %priority,
                    attempts = failure.attempts(),
                    error = %failure,
                    "completion failed; alert left unenriched"
                );
                return EnrichOutcome::CompletionFailed;
            }
        };

        let channel = event.channel().unwrap_or(&self.settings.default_channel);
        let reply = enrichment_reply(channel, &thread, text);
        let replied = self
            .retry
            .run(
                |_| self.chat.post_message(&reply),
                |error: &ChatError| RetryDecision::from_retryable(error.is_retryable()),
                |retry| {
                    warn!(
                        event_name = "pipeline.enrichment.reply_retry",
                        correlation_id = %correlation_id,
                        rule = %rule,
                        priority = %priority,
                        attempt = retry.attempt,
                        delay_ms = retry.delay.as_millis() as u64,
                        error = %retry.error,
                        "threaded reply failed; retrying"
                    );
                },
            )
            .await;

        match replied {
            Ok(_) => {
                info!(
                    event_name = "pipeline.enrichment.replied",
                    correlation_id = %correlation_id,
                    rule = %rule,
                    priority = %priority,
                    thread = %thread,
                    "enrichment posted in thread"
                );
                EnrichOutcome::Replied { thread }
            }
            Err(failure) => {
                error!(
                    event_name = "pipeline.enrichment.reply_failed",
                    correlation_id = %correlation_id,
                    rule = %rule,
                    priority = %priority,
                    attempts = failure.attempts(),
                    error = %failure,
                    "threaded reply failed; enrichment dropped"
                );
                EnrichOutcome::ReplyFailed
            }
        }
    }
}

#[async_trait]
impl Subscriber<AlertEvent> for Enricher {
    type Work = PendingEnrichment;

    fn accept(&self, event: AlertEvent) -> Option<PendingEnrichment> {
        self.begin(event).ok()
    }

    async fn complete(&self, pending: PendingEnrichment) {
        self.finish(pending).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Duration as Age;
    use vigil_agent::llm::CompletionError;
    use vigil_agent::prompt::PromptTemplate;
    use vigil_core::domain::{AlertEvent, ThreadHandle};
    use vigil_core::rate_limit::{RateLimiter, Reservation};
    use vigil_core::retry::RetryPolicy;
    use vigil_slack::client::ChatError;

    use super::{EnrichOutcome, Enricher, EnrichmentSettings};
    use crate::pipeline::testing::{alert, ScriptedChat, ScriptedLlm};

    const HOUR: Duration = Duration::from_secs(3600);

    struct Harness {
        enricher: Enricher,
        chat: Arc<ScriptedChat>,
        llm: Arc<ScriptedLlm>,
    }

    fn harness(chat: ScriptedChat, llm: ScriptedLlm, limiter: RateLimiter) -> Harness {
        let chat = Arc::new(chat);
        let llm = Arc::new(llm);
        let enricher = Enricher::new(
            llm.clone(),
            chat.clone(),
            Arc::new(limiter),
            Arc::new(PromptTemplate::from_source("Explain: {{ payload }}", None).expect("template")),
            RetryPolicy { base_delay: Duration::ZERO, ..RetryPolicy::default() },
            EnrichmentSettings {
                staleness_window: HOUR,
                wait_deadline: HOUR,
                default_channel: "C0ALERTS".to_owned(),
            },
        );
        Harness { enricher, chat, llm }
    }

    async fn process(enricher: &Enricher, event: AlertEvent) -> EnrichOutcome {
        match enricher.begin(event) {
            Ok(pending) => enricher.finish(pending).await,
            Err(outcome) => outcome,
        }
    }

    fn threaded(mut event: AlertEvent) -> AlertEvent {
        event.attach_thread(ThreadHandle("111.222".to_owned())).expect("first thread assignment");
        event
    }

    #[tokio::test(start_paused = true)]
    async fn completion_is_posted_as_threaded_reply() {
        let h = harness(
            ScriptedChat::default(),
            ScriptedLlm::new(vec![Ok("Problem: shell\nRemediation: kill it".to_owned())]),
            RateLimiter::per_hour(10),
        );
        let event = threaded(alert("critical", Age::minutes(5)));
        let raw = event.raw_text().into_owned();

        let outcome = process(&h.enricher, event).await;

        assert_eq!(outcome, EnrichOutcome::Replied { thread: ThreadHandle("111.222".to_owned()) });
        assert_eq!(h.llm.prompts().await, vec![format!("Explain: {raw}")]);
        let posted = h.chat.posted().await;
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].thread, Some(ThreadHandle("111.222".to_owned())));
        assert_eq!(posted[0].text, "Problem: shell\nRemediation: kill it");
        assert!(posted[0].attachments.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_alert_never_reaches_the_model() {
        let h = harness(ScriptedChat::default(), ScriptedLlm::default(), RateLimiter::per_hour(10));

        let outcome = process(&h.enricher, threaded(alert("critical", Age::hours(2)))).await;

        assert_eq!(outcome, EnrichOutcome::Stale);
        assert!(h.llm.prompts().await.is_empty());
        assert!(h.chat.posted().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_choices_is_retried_three_times_then_dropped() {
        let h = harness(
            ScriptedChat::default(),
            ScriptedLlm::new(vec![
                Err(CompletionError::EmptyChoices),
                Err(CompletionError::EmptyChoices),
                Err(CompletionError::EmptyChoices),
            ]),
            RateLimiter::per_hour(10),
        );

        let outcome = process(&h.enricher, threaded(alert("error", Age::minutes(1)))).await;

        assert_eq!(outcome, EnrichOutcome::CompletionFailed);
        assert_eq!(h.llm.prompts().await.len(), 3);
        assert!(h.chat.posted().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_event_waits_for_refill_and_is_dropped_at_deadline() {
        let limiter = RateLimiter::per_hour(1);
        let chat = Arc::new(ScriptedChat::default());
        let llm = Arc::new(ScriptedLlm::default());
        let enricher = Enricher::new(
            llm.clone(),
            chat.clone(),
            Arc::new(limiter),
            Arc::new(PromptTemplate::builtin().expect("builtin")),
            RetryPolicy { base_delay: Duration::ZERO, ..RetryPolicy::default() },
            EnrichmentSettings {
                staleness_window: 24 * HOUR,
                wait_deadline: Duration::from_secs(600),
                default_channel: "C0ALERTS".to_owned(),
            },
        );
        let started = tokio::time::Instant::now();

        let first = process(&enricher, threaded(alert("critical", Age::minutes(1)))).await;
        let second = process(&enricher, threaded(alert("critical", Age::minutes(1)))).await;

        assert!(matches!(first, EnrichOutcome::Replied { .. }));
        assert_eq!(second, EnrichOutcome::Throttled);
        assert_eq!(tokio::time::Instant::now() - started, Duration::from_secs(600));
        assert_eq!(llm.prompts().await.len(), 1);
        assert_eq!(chat.posted().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_slots_follow_begin_order_not_finish_order() {
        let h = harness(ScriptedChat::default(), ScriptedLlm::default(), RateLimiter::per_hour(1));
        let first = threaded(alert("critical", Age::minutes(1)));
        let second = threaded(alert("warning", Age::minutes(1)));
        let first_raw = first.raw_text().into_owned();
        let second_raw = second.raw_text().into_owned();
        let started = tokio::time::Instant::now();

        let first = h.enricher.begin(first).expect("first accepted");
        let second = h.enricher.begin(second).expect("second accepted");
        let (second_outcome, first_outcome) =
            tokio::join!(h.enricher.finish(second), h.enricher.finish(first));

        assert!(matches!(first_outcome, EnrichOutcome::Replied { .. }));
        assert!(matches!(second_outcome, EnrichOutcome::Replied { .. }));
        assert_eq!(
            h.llm.prompts().await,
            vec![format!("Explain: {first_raw}"), format!("Explain: {second_raw}")]
        );
        assert_eq!(tokio::time::Instant::now() - started, HOUR);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reply_is_dropped_after_retries() {
        let h = harness(
            ScriptedChat::new(vec![
                Err(ChatError::Transport("reset".to_owned())),
                Err(ChatError::Transport("reset".to_owned())),
                Err(ChatError::Transport("reset".to_owned())),
            ]),
            ScriptedLlm::default(),
            RateLimiter::per_hour(10),
        );

        let outcome = process(&h.enricher, threaded(alert("warning", Age::minutes(1)))).await;

        assert_eq!(outcome, EnrichOutcome::ReplyFailed);
        assert_eq!(h.chat.posted().await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unthreaded_alert_is_rejected() {
        let h = harness(ScriptedChat::default(), ScriptedLlm::default(), RateLimiter::per_hour(10));

        let outcome = process(&h.enricher, alert("warning", Age::minutes(1))).await;

        assert_eq!(outcome, EnrichOutcome::Unthreaded);
        assert!(h.llm.prompts().await.is_empty());
    }
}
