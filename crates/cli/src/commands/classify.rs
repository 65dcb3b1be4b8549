use serde::Serialize;
use vigil_core::priority::Priority;

use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
struct Classification<'a> {
    label: &'a str,
    priority: Priority,
    rank: u8,
    color: &'static str,
    recognised: bool,
    relayed_by_default: bool,
}

/// Unknown labels classify as `default`; `recognised` tells the two apart.
pub fn run(label: &str) -> CommandResult {
    let priority = Priority::classify(label);
    let classification = Classification {
        label,
        priority,
        rank: priority.rank(),
        color: priority.color(),
        recognised: Priority::parse_strict(label).is_some(),
        relayed_by_default: priority.admits(Priority::Warning),
    };

    match serde_json::to_string(&classification) {
        Ok(output) => CommandResult::report(0, output),
        Err(error) => {
            CommandResult::failure("classify", "serialization", error.to_string(), 1)
        }
    }
}
