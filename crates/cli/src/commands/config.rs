use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use toml::Value;
use vigil_core::config::{resolve_config_path, AppConfig, LoadOptions, LogFormat};

use crate::commands::CommandResult;

struct Field {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                1,
            )
        }
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: flag > env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    CommandResult::report(0, lines.join("\n"))
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    vec![
        field(
            "server.bind_address",
            &["VIGIL_SERVER_BIND_ADDRESS"],
            config.server.bind_address.clone(),
        ),
        field("server.port", &["VIGIL_SERVER_PORT"], config.server.port.to_string()),
        field(
            "server.graceful_shutdown_secs",
            &["VIGIL_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            config.server.graceful_shutdown_secs.to_string(),
        ),
        field(
            "pipeline.buffer_size",
            &["VIGIL_PIPELINE_BUFFER_SIZE"],
            config.pipeline.buffer_size.to_string(),
        ),
        field(
            "pipeline.min_priority",
            &["VIGIL_PIPELINE_MIN_PRIORITY"],
            config.pipeline.min_priority.to_string(),
        ),
        field(
            "pipeline.hourly_quota",
            &["VIGIL_PIPELINE_HOURLY_QUOTA"],
            config.pipeline.hourly_quota.to_string(),
        ),
        field(
            "pipeline.staleness_hours",
            &["VIGIL_PIPELINE_STALENESS_HOURS"],
            config.pipeline.staleness_hours.to_string(),
        ),
        field(
            "pipeline.wait_deadline_secs",
            &["VIGIL_PIPELINE_WAIT_DEADLINE_SECS"],
            config.pipeline.wait_deadline_secs.to_string(),
        ),
        field(
            "slack.bot_token",
            &["VIGIL_SLACK_BOT_TOKEN", "SLACK_TOKEN"],
            redact_token(config.slack.bot_token.expose_secret()),
        ),
        field("slack.channel", &["VIGIL_SLACK_CHANNEL", "SLACK_CHANNEL"], config.slack.channel.clone()),
        field("slack.base_url", &["VIGIL_SLACK_BASE_URL"], config.slack.base_url.clone()),
        field(
            "llm.api_key",
            &["VIGIL_LLM_API_KEY", "OPENAI_TOKEN"],
            redact_token(config.llm.api_key.expose_secret()),
        ),
        field("llm.model", &["VIGIL_LLM_MODEL"], config.llm.model.clone()),
        field("llm.base_url", &["VIGIL_LLM_BASE_URL"], config.llm.base_url.clone()),
        field(
            "llm.template_file",
            &["VIGIL_LLM_TEMPLATE_FILE"],
            config
                .llm
                .template_file
                .as_deref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<builtin>".to_string()),
        ),
        field(
            "logging.level",
            &["VIGIL_LOGGING_LEVEL", "VIGIL_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        field(
            "logging.format",
            &["VIGIL_LOGGING_FORMAT", "VIGIL_LOG_FORMAT"],
            format_name(config.logging.format).to_string(),
        ),
    ]
}

fn field(key: &'static str, env_keys: &'static [&'static str], value: String) -> Field {
    Field { key, env_keys, value }
}

fn format_name(format: LogFormat) -> &'static str {
    match format {
        LogFormat::Compact => "compact",
        LogFormat::Pretty => "pretty",
        LogFormat::Json => "json",
    }
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

/// The first env key that is set wins, so an alias is only reported when the
/// primary name is absent.
fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("config file"));
            return format!("file ({})", file_path.display());
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

pub(crate) fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
