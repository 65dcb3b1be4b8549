//! Completion side of the relay.
//!
//! - **LLM client** (`llm`) - `LlmClient` seam and an OpenAI-compatible chat-completions client
//! - **Prompt** (`prompt`) - renders the enrichment prompt for one alert
//!
//! The model only explains an alert. It never decides whether an alert is
//! posted, how it is classified, or where it goes.

pub mod llm;
pub mod prompt;

pub use llm::{CompletionError, LlmClient, OpenAiClient};
pub use prompt::{PromptError, PromptTemplate};
