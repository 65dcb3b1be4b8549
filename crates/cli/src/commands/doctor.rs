use secrecy::ExposeSecret;
use serde::Serialize;
use vigil_agent::prompt::PromptTemplate;
use vigil_core::config::{AppConfig, LoadOptions};
use vigil_core::domain::AlertEvent;

use crate::commands::{escape_json, CommandResult};

const SAMPLE_ALERT: &str = r#"{"output":"doctor sample alert","priority":"warning","rule":"doctor","time":"2024-01-01T00:00:00Z","output_fields":{"proc.name":"sh"}}"#;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult::report(exit_code, output);
    }

    CommandResult::report(exit_code, render_human(&report))
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_slack_token(&config));
            checks.push(check_prompt_template(&config));
            checks.push(check_priority_floor(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["slack_token_readiness", "prompt_template", "priority_floor"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// `chat.postMessage` with a custom username and icon needs a bot token.
fn check_slack_token(config: &AppConfig) -> DoctorCheck {
    let token = config.slack.bot_token.expose_secret();
    if token.starts_with("xoxb-") {
        return DoctorCheck {
            name: "slack_token_readiness",
            status: CheckStatus::Pass,
            details: format!("bot token present for channel `{}`", config.slack.channel),
        };
    }

    DoctorCheck {
        name: "slack_token_readiness",
        status: CheckStatus::Fail,
        details: "slack.bot_token should be a bot token (xoxb-...)".to_string(),
    }
}

fn check_prompt_template(config: &AppConfig) -> DoctorCheck {
    match render_sample(config) {
        Ok((origin, prompt)) => DoctorCheck {
            name: "prompt_template",
            status: CheckStatus::Pass,
            details: format!("{origin} template renders a {}-byte prompt for a sample alert", prompt.len()),
        },
        Err(error) => DoctorCheck { name: "prompt_template", status: CheckStatus::Fail, details: error },
    }
}

fn render_sample(config: &AppConfig) -> Result<(String, String), String> {
    let template =
        PromptTemplate::load(config.llm.template_file.as_deref()).map_err(|error| error.to_string())?;
    let sample = AlertEvent::from_raw(SAMPLE_ALERT.as_bytes()).map_err(|error| error.to_string())?;
    let prompt = template.render(&sample).map_err(|error| error.to_string())?;

    let origin = template
        .origin()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "builtin".to_string());
    Ok((origin, prompt))
}

fn check_priority_floor(config: &AppConfig) -> DoctorCheck {
    let floor = config.pipeline.min_priority;
    DoctorCheck {
        name: "priority_floor",
        status: CheckStatus::Pass,
        details: format!(
            "alerts at `{floor}` (rank {}) or above are relayed; {} enrichments per hour",
            floor.rank(),
            config.pipeline.hourly_quota
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
