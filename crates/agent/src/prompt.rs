use std::collections::BTreeMap;
use std::error::Error as _;
use std::fs;
use std::path::{Path, PathBuf};

use tera::{Context, Tera};
use thiserror::Error;
use vigil_core::domain::AlertEvent;

const TEMPLATE_NAME: &str = "enrichment_prompt";
const LEGACY_PLACEHOLDER: &str = "%s";
const PAYLOAD_PLACEHOLDER: &str = "{{ payload }}";

pub const DEFAULT_TEMPLATE: &str = r#"You are a seasoned audit log analyst talking to an experienced Linux administrator. The input below is a runtime security alert emitted by Falco.

Answer with exactly two root bullet points, prefixed "Problem:" and "Remediation:" in that order, and nothing else. Each root has a single bullet. Wrap file paths, keywords and commands in backticks.

* Problem: restate the alert as one plain sentence, keeping the critical details and the important keywords.
* Remediation: describe the likely scenarios and how to fix them as technically as possible. Lead with concrete commands or scripts.

The JSON input is:

{{ payload }}
"#;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("could not read prompt template `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("prompt template is invalid: {0}")]
    Parse(String),
    #[error("prompt rendering failed: {0}")]
    Render(String),
}

/// Enrichment prompt, compiled once at startup.
///
/// Templates see `payload` (the raw alert body) plus `rule`, `priority`,
/// `source`, `output`, `hostname` and `fields` (display strings of every
/// output field).
#[derive(Debug)]
pub struct PromptTemplate {
    tera: Tera,
    origin: Option<PathBuf>,
}

impl PromptTemplate {
    pub fn builtin() -> Result<Self, PromptError> {
        Self::from_source(DEFAULT_TEMPLATE, None)
    }

    pub fn from_file(path: &Path) -> Result<Self, PromptError> {
        let source = fs::read_to_string(path)
            .map_err(|source| PromptError::Read { path: path.to_path_buf(), source })?;
        Self::from_source(&source, Some(path.to_path_buf()))
    }

    pub fn load(path: Option<&Path>) -> Result<Self, PromptError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::builtin(),
        }
    }

    pub fn from_source(source: &str, origin: Option<PathBuf>) -> Result<Self, PromptError> {
        let normalized = normalize_legacy(source);
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, &normalized)
            .map_err(|error| PromptError::Parse(describe(&error)))?;
        Ok(Self { tera, origin })
    }

    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    pub fn render(&self, event: &AlertEvent) -> Result<String, PromptError> {
        let payload = event.payload();
        let fields: BTreeMap<&str, String> = payload
            .output_fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.display().into_owned()))
            .collect();

        let raw = event.raw_text();
        let mut context = Context::new();
        context.insert("payload", &raw);
        context.insert("rule", &payload.rule);
        context.insert("priority", event.priority().as_str());
        context.insert("source", &payload.source);
        context.insert("output", &payload.output);
        context.insert("hostname", event.hostname().unwrap_or_default());
        context.insert("fields", &fields);

        self.tera
            .render(TEMPLATE_NAME, &context)
            .map_err(|error| PromptError::Render(describe(&error)))
    }
}

/// Printf-style templates (`%s`, no `{{`) are rewritten to the tera form.
fn normalize_legacy(source: &str) -> String {
    if source.contains("{{") || !source.contains(LEGACY_PLACEHOLDER) {
        return source.to_owned();
    }
    source.replace(LEGACY_PLACEHOLDER, PAYLOAD_PLACEHOLDER)
}

fn describe(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut cause = error.source();
    while let Some(inner) = cause {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        cause = inner.source();
    }
    message
}
