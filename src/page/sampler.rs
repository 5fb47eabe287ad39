use std::{collections::HashSet, sync::Arc, time::Duration};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::sleep;

use crate::{config::SamplerConfig, domain::Sample};

use super::host::PageHost;

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "and", "or", "is", "are", "was", "were", "to", "of", "in", "that",
        "this", "it", "for", "on", "with", "as", "by", "be", "at", "from", "your", "you", "i",
        "we", "they", "their", "our", "but", "if", "not", "can", "will", "just", "up", "out",
        "about", "into", "so", "no", "yes",
    ]
    .into_iter()
    .collect()
});

static CONTROL_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{Cc}\p{Cf}]").expect("valid control char regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Ready(Sample),
    GaveUp { attempts: u32 },
}

#[derive(Clone)]
pub struct Sampler {
    host: Arc<dyn PageHost>,
    config: SamplerConfig,
}

impl Sampler {
    pub fn new(host: Arc<dyn PageHost>, config: SamplerConfig) -> Self {
        Self { host, config }
    }

    pub async fn extract(&self) -> Extraction {
        self.extract_with(self.config.max_attempts, self.config.retry_delay)
            .await
    }

    /// Reads the page up to `max_attempts` times, waiting `retry_delay` between
    /// reads, until the cleaned text is long enough to classify.
    pub async fn extract_with(&self, max_attempts: u32, retry_delay: Duration) -> Extraction {
        let attempts = max_attempts.max(1);
        for attempt in 1..=attempts {
            let cleaned = clean_text(
                &self.read_text(),
                self.config.strip_stopwords,
                self.config.max_chars,
            );
            let length = cleaned.chars().count();
            tracing::debug!(target: "sampler", attempt, length, "cleaned snippet");

            if length > self.config.min_content_chars {
                return Extraction::Ready(Sample::new(
                    self.host.domain(),
                    self.host.title(),
                    cleaned,
                ));
            }
            if attempt < attempts {
                sleep(retry_delay).await;
            }
        }

        tracing::info!(target: "sampler", attempts, url = %self.host.url(), "snippet too small, giving up");
        Extraction::GaveUp { attempts }
    }

    fn read_text(&self) -> String {
        match self.host.body_text() {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!(target: "sampler", error = %err, "text extraction failed; treating as empty");
                String::new()
            }
        }
    }
}

/// Collapses whitespace, optionally drops stop words, and caps the length in characters.
pub fn clean_text(text: &str, strip_stopwords: bool, max_chars: usize) -> String {
    let text = CONTROL_CHARS.replace_all(text, " ");
    let mut cleaned = String::new();
    let mut length = 0;

    for word in text.split_whitespace() {
        if strip_stopwords && STOPWORDS.contains(word.to_lowercase().as_str()) {
            continue;
        }
        if !cleaned.is_empty() {
            if length >= max_chars {
                break;
            }
            cleaned.push(' ');
            length += 1;
        }
        for ch in word.chars() {
            if length >= max_chars {
                return cleaned;
            }
            cleaned.push(ch);
            length += 1;
        }
    }
    cleaned
}
