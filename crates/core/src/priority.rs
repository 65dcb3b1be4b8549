use std::fmt;

use serde::{Deserialize, Serialize};

pub const PALE_CYAN: &str = "#ccfff2";
pub const YELLOW: &str = "#ffc700";
pub const RED: &str = "#e20b0b";
pub const LIGHT_BLUE: &str = "#68c2ff";
pub const LIGHT_CYAN: &str = "#5bffb5";
pub const ORANGE: &str = "#ff5400";

/// Severity rank of an alert, ordered from `Default` (unspecified) up to `Emergency`.
///
/// Classification is total: any label that is not recognised resolves to
/// [`Priority::Default`] rather than failing.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Default,
    Debug,
    Informational,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl Priority {
    pub const ALL: [Priority; 9] = [
        Self::Default,
        Self::Debug,
        Self::Informational,
        Self::Notice,
        Self::Warning,
        Self::Error,
        Self::Critical,
        Self::Alert,
        Self::Emergency,
    ];

    pub fn classify(label: &str) -> Self {
        Self::parse_strict(label).unwrap_or_default()
    }

    /// Like [`Priority::classify`] but refuses unknown labels. Used where a typo
    /// should be reported, e.g. the configured admission floor.
    pub fn parse_strict(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "emergency" => Some(Self::Emergency),
            "alert" => Some(Self::Alert),
            "critical" => Some(Self::Critical),
            "error" => Some(Self::Error),
            "warning" => Some(Self::Warning),
            "notice" => Some(Self::Notice),
            "informational" | "info" => Some(Self::Informational),
            "debug" => Some(Self::Debug),
            "" | "default" => Some(Self::Default),
            _ => None,
        }
    }

    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Debug => "debug",
            Self::Informational => "informational",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
            Self::Alert => "alert",
            Self::Emergency => "emergency",
        }
    }

    /// Display color for chat attachments. Presentation only.
    pub fn color(self) -> &'static str {
        match self {
            Self::Emergency | Self::Error => RED,
            Self::Alert | Self::Critical => ORANGE,
            Self::Warning => YELLOW,
            Self::Notice => LIGHT_CYAN,
            Self::Informational => LIGHT_BLUE,
            Self::Debug | Self::Default => PALE_CYAN,
        }
    }

    pub fn admits(self, floor: Priority) -> bool {
        self >= floor
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Priority {
    fn from(label: &str) -> Self {
        Self::classify(label)
    }
}

#[cfg(test)]
mod tests {
    use super::{Priority, LIGHT_BLUE, ORANGE, PALE_CYAN, RED, YELLOW};

    #[test]
    fn recognised_labels_rank_strictly_increasing() {
        let labels = [
            "debug",
            "informational",
            "notice",
            "warning",
            "error",
            "critical",
            "alert",
            "emergency",
        ];

        let ranks: Vec<u8> = labels.iter().map(|label| Priority::classify(label).rank()).collect();
        assert!(ranks.windows(2).all(|pair| pair[0] < pair[1]), "ranks: {ranks:?}");
        assert!(ranks[0] > Priority::Default.rank());
    }

    #[test]
    fn unknown_and_empty_labels_resolve_to_lowest_rank() {
        for label in ["", "   ", "severe", "warn", "EMERGENCY!"] {
            assert_eq!(Priority::classify(label), Priority::Default, "label `{label}`");
        }
    }

    #[test]
    fn classification_ignores_case_and_accepts_info_alias() {
        assert_eq!(Priority::classify("WaRnInG"), Priority::Warning);
        assert_eq!(Priority::classify("Info"), Priority::Informational);
        assert_eq!(Priority::classify(" critical "), Priority::Critical);
    }

    #[test]
    fn classification_is_idempotent_for_rank_and_color() {
        for label in ["notice", "bogus", "Alert"] {
            let first = Priority::classify(label);
            let second = Priority::classify(label);
            assert_eq!(first, second);
            assert_eq!(first.color(), second.color());
        }
    }

    #[test]
    fn palette_matches_severity() {
        assert_eq!(Priority::Emergency.color(), RED);
        assert_eq!(Priority::Error.color(), RED);
        assert_eq!(Priority::Critical.color(), ORANGE);
        assert_eq!(Priority::Warning.color(), YELLOW);
        assert_eq!(Priority::Informational.color(), LIGHT_BLUE);
        assert_eq!(Priority::Default.color(), PALE_CYAN);
    }

    #[test]
    fn strict_parse_rejects_unknown_labels() {
        assert_eq!(Priority::parse_strict("warning"), Some(Priority::Warning));
        assert_eq!(Priority::parse_strict("warn"), None);
    }

    #[test]
    fn admission_compares_against_floor() {
        assert!(Priority::Warning.admits(Priority::Warning));
        assert!(Priority::Critical.admits(Priority::Warning));
        assert!(!Priority::Debug.admits(Priority::Warning));
    }
}
