mod bootstrap;
mod health;
mod ingress;
mod pipeline;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use vigil_core::config::{AppConfig, ConfigOverrides, LoadOptions};

#[derive(Debug, Parser)]
#[command(name = "vigil-server", version, about = "Relay runtime security alerts into chat with model-written triage")]
struct Args {
    /// Path to a vigil.toml config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Port the alert listener binds to
    #[arg(long)]
    port: Option<u16>,
    /// Queue size per pipeline stage
    #[arg(long)]
    buffer: Option<usize>,
    /// Completion requests allowed per hour
    #[arg(long)]
    qps: Option<u32>,
    /// Lowest priority that is relayed
    #[arg(long = "min-priority")]
    min_priority: Option<String>,
    /// Completion model identifier
    #[arg(long)]
    model: Option<String>,
    /// Alerts older than this many hours are not enriched
    #[arg(long = "stale-hours")]
    stale_hours: Option<u64>,
    /// Prompt template replacing the built-in one
    #[arg(long = "template-file")]
    template_file: Option<PathBuf>,
    /// Chat channel alerts are posted to
    #[arg(long)]
    channel: Option<String>,
    /// Log level: trace, debug, info, warn or error
    #[arg(long = "log-level")]
    log_level: Option<String>,
}

impl Args {
    fn into_load_options(self) -> LoadOptions {
        LoadOptions {
            require_file: self.config.is_some(),
            config_path: self.config,
            overrides: ConfigOverrides {
                port: self.port,
                buffer_size: self.buffer,
                hourly_quota: self.qps,
                min_priority: self.min_priority,
                staleness_hours: self.stale_hours,
                llm_model: self.model,
                template_file: self.template_file,
                slack_channel: self.channel,
                log_level: self.log_level,
            },
        }
    }
}

fn init_logging(config: &AppConfig) {
    use tracing::Level;
    use vigil_core::config::LogFormat::*;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run(Args::parse()).await
}

async fn run(args: Args) -> Result<()> {
    let config = AppConfig::load(args.into_load_options())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        min_priority = %app.config.pipeline.min_priority,
        "vigil-server listening"
    );

    axum::serve(listener, ingress::router(app.ingress.clone()))
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "listener stopped; draining pipeline"
    );
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let drained = app.shutdown(grace).await;
    tracing::info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        drained,
        "vigil-server stopped"
    );

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "could not listen for shutdown signal"
        );
    }
}
