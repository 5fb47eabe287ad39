use serde::Serialize;
use serde_json::Value;

use crate::domain::{Sample, Settings, Verdict, VerdictAction};

/// Body POSTed to the classifier endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationRequest {
    pub domain: String,
    pub title: String,
    pub snippet: String,
}

/// Applies the user's consent and length bound to a sample.
///
/// The snippet is empty unless `send_snippet` is set, and never longer than
/// `snippet_max_chars` characters.
pub fn build_request(sample: &Sample, settings: &Settings) -> ClassificationRequest {
    let snippet = if settings.send_snippet {
        truncate_chars(&sample.snippet, settings.snippet_max_chars)
    } else {
        String::new()
    };
    ClassificationRequest {
        domain: sample.domain.clone(),
        title: sample.title.clone(),
        snippet,
    }
}

/// Normalizes a decoded classifier response into a [`Verdict`].
///
/// A missing or unrecognised `action` means `allow`. `reason` wins over `message`.
pub fn parse_verdict(body: &Value) -> Verdict {
    let action = body
        .get("action")
        .and_then(Value::as_str)
        .and_then(VerdictAction::parse);

    if action.is_none() {
        tracing::debug!(target: "classifier", body = %body, "verdict without usable action; treating as allow");
    }

    Verdict {
        action: action.unwrap_or(VerdictAction::Allow),
        tag: string_field(body, "tag").unwrap_or_default(),
        reason: string_field(body, "reason")
            .or_else(|| string_field(body, "message"))
            .unwrap_or_default(),
    }
}

fn string_field(body: &Value, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
