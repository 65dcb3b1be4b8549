use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vigil_agent::llm::{CompletionError, LlmClient, OpenAiClient};
use vigil_agent::prompt::{PromptError, PromptTemplate};
use vigil_core::bus::{BusError, Topic};
use vigil_core::config::{AppConfig, ConfigError};
use vigil_core::rate_limit::RateLimiter;
use vigil_core::retry::RetryPolicy;
use vigil_slack::client::{ChatClient, ChatError, SlackWebClient};

use crate::ingress::IngressState;
use crate::pipeline::enrichment::EnrichmentSettings;
use crate::pipeline::{AlertBus, Enricher, Notifier};

pub struct Application {
    pub config: AppConfig,
    pub bus: AlertBus,
    pub ingress: IngressState,
    workers: Vec<JoinHandle<()>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("prompt template could not be loaded: {0}")]
    Prompt(#[from] PromptError),
    #[error("chat client could not be built: {0}")]
    Chat(#[source] ChatError),
    #[error("completion client could not be built: {0}")]
    Completion(#[source] CompletionError),
    #[error("pipeline stage could not subscribe: {0}")]
    Subscribe(#[from] BusError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let prompt = PromptTemplate::load(config.llm.template_file.as_deref())?;
    let chat = SlackWebClient::new(config.slack.base_url.clone(), config.slack.bot_token.clone())
        .map_err(BootstrapError::Chat)?;
    let llm = OpenAiClient::new(
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        config.llm.api_key.clone(),
    )
    .map_err(BootstrapError::Completion)?;

    info!(
        event_name = "system.bootstrap.clients_ready",
        correlation_id = "bootstrap",
        model = %config.llm.model,
        template = %prompt.origin().map(|path| path.display().to_string()).unwrap_or_else(|| "builtin".to_owned()),
        "chat and completion clients initialised"
    );

    wire(config, Arc::new(chat), Arc::new(llm), prompt, RetryPolicy::default())
}

/// Builds the bus and subscribes both stages. Must run inside a tokio runtime.
pub fn wire(
    config: AppConfig,
    chat: Arc<dyn ChatClient>,
    llm: Arc<dyn LlmClient>,
    prompt: PromptTemplate,
    retry: RetryPolicy,
) -> Result<Application, BootstrapError> {
    let bus = AlertBus::new(config.pipeline.buffer_size);
    let limiter = Arc::new(RateLimiter::per_hour(config.pipeline.hourly_quota));

    let notifier = Notifier::new(chat.clone(), bus.clone(), config.slack.channel.clone(), retry.clone());
    let enricher = Enricher::new(
        llm,
        chat,
        limiter,
        Arc::new(prompt),
        retry,
        EnrichmentSettings {
            staleness_window: config.pipeline.staleness_window(),
            wait_deadline: config.pipeline.wait_deadline(),
            default_channel: config.slack.channel.clone(),
        },
    );

    let workers = vec![
        bus.spawn_subscriber(Topic::RAW_ALERT, Arc::new(notifier))?,
        bus.spawn_subscriber(Topic::ENRICH, Arc::new(enricher))?,
    ];

    info!(
        event_name = "system.bootstrap.pipeline_ready",
        correlation_id = "bootstrap",
        buffer_size = config.pipeline.buffer_size,
        hourly_quota = config.pipeline.hourly_quota,
        min_priority = %config.pipeline.min_priority,
        "pipeline stages subscribed"
    );

    let ingress = IngressState {
        bus: bus.clone(),
        min_priority: config.pipeline.min_priority,
        channel: config.slack.channel.clone(),
    };

    Ok(Application { config, bus, ingress, workers })
}

impl Application {
    /// Closes the bus and gives in-flight handlers up to `grace` to finish.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.bus.close();
        let drain = async {
            for worker in self.workers {
                if let Err(join_error) = worker.await {
                    warn!(
                        event_name = "system.shutdown.worker_failed",
                        correlation_id = "shutdown",
                        error = %join_error,
                        "pipeline worker ended abnormally"
                    );
                }
            }
        };

        match tokio::time::timeout(grace, drain).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    event_name = "system.shutdown.drain_timeout",
                    correlation_id = "shutdown",
                    grace_secs = grace.as_secs(),
                    "in-flight alerts abandoned at shutdown"
                );
                false
            }
        }
    }
}
