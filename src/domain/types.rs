use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_SNIPPET_MAX_CHARS: usize = 300;

/// User consent and snippet bounds, persisted as a single document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub send_snippet: bool,
    pub snippet_max_chars: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            send_snippet: false,
            snippet_max_chars: DEFAULT_SNIPPET_MAX_CHARS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictAction {
    Allow,
    Warn,
    Block,
}

impl VerdictAction {
    /// Parses the classifier's `action` field. Anything unrecognised is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "allow" => Some(Self::Allow),
            "warn" => Some(Self::Warn),
            "block" => Some(Self::Block),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Warn => "warn",
            Self::Block => "block",
        }
    }
}

impl fmt::Display for VerdictAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub action: VerdictAction,
    pub tag: String,
    pub reason: String,
}
