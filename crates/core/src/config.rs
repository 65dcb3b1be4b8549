use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::priority::Priority;

pub const DEFAULT_CONFIG_FILE: &str = "vigil.toml";
pub const NESTED_CONFIG_FILE: &str = "config/vigil.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub slack: SlackConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub buffer_size: usize,
    pub min_priority: Priority,
    pub hourly_quota: u32,
    pub staleness_hours: u64,
    pub wait_deadline_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub bot_token: SecretString,
    pub channel: String,
    pub base_url: String,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
    pub template_file: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl PipelineConfig {
    pub fn staleness_window(&self) -> Duration {
        Duration::from_secs(self.staleness_hours.saturating_mul(3600))
    }

    pub fn wait_deadline(&self) -> Duration {
        Duration::from_secs(self.wait_deadline_secs)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub buffer_size: Option<usize>,
    pub hourly_quota: Option<u32>,
    pub min_priority: Option<String>,
    pub staleness_hours: Option<u64>,
    pub llm_model: Option<String>,
    pub template_file: Option<PathBuf>,
    pub slack_channel: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            pipeline: PipelineConfig {
                buffer_size: 1000,
                min_priority: Priority::Warning,
                hourly_quota: 10,
                staleness_hours: 24,
                wait_deadline_secs: 3600,
            },
            slack: SlackConfig {
                bot_token: String::new().into(),
                channel: String::new(),
                base_url: "https://slack.com/api".to_string(),
            },
            llm: LlmConfig {
                api_key: String::new().into(),
                model: "gpt-3.5-turbo".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
                template_file: None,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides)?;
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(pipeline) = patch.pipeline {
            if let Some(buffer_size) = pipeline.buffer_size {
                self.pipeline.buffer_size = buffer_size;
            }
            if let Some(min_priority) = pipeline.min_priority {
                self.pipeline.min_priority = parse_priority_floor(&min_priority)?;
            }
            if let Some(hourly_quota) = pipeline.hourly_quota {
                self.pipeline.hourly_quota = hourly_quota;
            }
            if let Some(staleness_hours) = pipeline.staleness_hours {
                self.pipeline.staleness_hours = staleness_hours;
            }
            if let Some(wait_deadline_secs) = pipeline.wait_deadline_secs {
                self.pipeline.wait_deadline_secs = wait_deadline_secs;
            }
        }

        if let Some(slack) = patch.slack {
            if let Some(slack_bot_token_value) = slack.bot_token {
                self.slack.bot_token = secret_value(slack_bot_token_value);
            }
            if let Some(channel) = slack.channel {
                self.slack.channel = channel;
            }
            if let Some(base_url) = slack.base_url {
                self.slack.base_url = base_url;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = secret_value(llm_api_key_value);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(template_file) = llm.template_file {
                self.llm.template_file = Some(template_file);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("VIGIL_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("VIGIL_SERVER_PORT") {
            self.server.port = parse_u16("VIGIL_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("VIGIL_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("VIGIL_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("VIGIL_PIPELINE_BUFFER_SIZE") {
            self.pipeline.buffer_size = parse_usize("VIGIL_PIPELINE_BUFFER_SIZE", &value)?;
        }
        if let Some(value) = read_env("VIGIL_PIPELINE_MIN_PRIORITY") {
            self.pipeline.min_priority = parse_priority_floor(&value)?;
        }
        if let Some(value) = read_env("VIGIL_PIPELINE_HOURLY_QUOTA") {
            self.pipeline.hourly_quota = parse_u32("VIGIL_PIPELINE_HOURLY_QUOTA", &value)?;
        }
        if let Some(value) = read_env("VIGIL_PIPELINE_STALENESS_HOURS") {
            self.pipeline.staleness_hours = parse_u64("VIGIL_PIPELINE_STALENESS_HOURS", &value)?;
        }
        if let Some(value) = read_env("VIGIL_PIPELINE_WAIT_DEADLINE_SECS") {
            self.pipeline.wait_deadline_secs =
                parse_u64("VIGIL_PIPELINE_WAIT_DEADLINE_SECS", &value)?;
        }

        let bot_token = read_env("VIGIL_SLACK_BOT_TOKEN").or_else(|| read_env("SLACK_TOKEN"));
        if let Some(value) = bot_token {
            self.slack.bot_token = secret_value(value);
        }
        let channel = read_env("VIGIL_SLACK_CHANNEL").or_else(|| read_env("SLACK_CHANNEL"));
        if let Some(value) = channel {
            self.slack.channel = value;
        }
        if let Some(value) = read_env("VIGIL_SLACK_BASE_URL") {
            self.slack.base_url = value;
        }

        let api_key = read_env("VIGIL_LLM_API_KEY").or_else(|| read_env("OPENAI_TOKEN"));
        if let Some(value) = api_key {
            self.llm.api_key = secret_value(value);
        }
        if let Some(value) = read_env("VIGIL_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("VIGIL_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("VIGIL_LLM_TEMPLATE_FILE") {
            self.llm.template_file = Some(PathBuf::from(value));
        }

        let log_level = read_env("VIGIL_LOGGING_LEVEL").or_else(|| read_env("VIGIL_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("VIGIL_LOGGING_FORMAT").or_else(|| read_env("VIGIL_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) -> Result<(), ConfigError> {
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(buffer_size) = overrides.buffer_size {
            self.pipeline.buffer_size = buffer_size;
        }
        if let Some(hourly_quota) = overrides.hourly_quota {
            self.pipeline.hourly_quota = hourly_quota;
        }
        if let Some(min_priority) = overrides.min_priority {
            self.pipeline.min_priority = parse_priority_floor(&min_priority)?;
        }
        if let Some(staleness_hours) = overrides.staleness_hours {
            self.pipeline.staleness_hours = staleness_hours;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(template_file) = overrides.template_file {
            self.llm.template_file = Some(template_file);
        }
        if let Some(slack_channel) = overrides.slack_channel {
            self.slack.channel = slack_channel;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_server(&self.server)?;
        validate_pipeline(&self.pipeline)?;
        validate_slack(&self.slack)?;
        validate_llm(&self.llm)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from(NESTED_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn parse_priority_floor(value: &str) -> Result<Priority, ConfigError> {
    Priority::parse_strict(value).ok_or_else(|| {
        ConfigError::Validation(format!(
            "pipeline.min_priority `{}` is not a known priority \
             (expected debug|informational|notice|warning|error|critical|alert|emergency)",
            value.trim()
        ))
    })
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_pipeline(pipeline: &PipelineConfig) -> Result<(), ConfigError> {
    if pipeline.buffer_size == 0 {
        return Err(ConfigError::Validation(
            "pipeline.buffer_size must be greater than zero".to_string(),
        ));
    }

    if pipeline.hourly_quota == 0 {
        return Err(ConfigError::Validation(
            "pipeline.hourly_quota must be greater than zero".to_string(),
        ));
    }

    if pipeline.staleness_hours == 0 {
        return Err(ConfigError::Validation(
            "pipeline.staleness_hours must be greater than zero".to_string(),
        ));
    }

    if pipeline.wait_deadline_secs == 0 {
        return Err(ConfigError::Validation(
            "pipeline.wait_deadline_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let bot_token = slack.bot_token.expose_secret();
    if bot_token.trim().is_empty() {
        return Err(ConfigError::Validation(
            "slack.bot_token is required (set VIGIL_SLACK_BOT_TOKEN or SLACK_TOKEN). Get it from https://api.slack.com/apps > Your App > OAuth & Permissions".to_string(),
        ));
    }
    if bot_token.starts_with("xapp-") {
        return Err(ConfigError::Validation(
            "slack.bot_token looks like an app-level token (`xapp-`); posting messages needs a bot or user token".to_string(),
        ));
    }

    if slack.channel.trim().is_empty() {
        return Err(ConfigError::Validation(
            "slack.channel is required (set VIGIL_SLACK_CHANNEL or pass --channel)".to_string(),
        ));
    }

    validate_http_url("slack.base_url", &slack.base_url)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.api_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "llm.api_key is required (set VIGIL_LLM_API_KEY or OPENAI_TOKEN)".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    validate_http_url("llm.base_url", &llm.base_url)
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ConfigError::Validation(format!("{key} must start with http:// or https://")));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    server: Option<ServerPatch>,
    pipeline: Option<PipelinePatch>,
    slack: Option<SlackPatch>,
    llm: Option<LlmPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelinePatch {
    buffer_size: Option<usize>,
    min_priority: Option<String>,
    hourly_quota: Option<u32>,
    staleness_hours: Option<u64>,
    wait_deadline_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    bot_token: Option<String>,
    channel: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    template_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
