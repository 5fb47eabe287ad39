use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::{config::GateConfig, domain::Sample};

pub type DedupKey = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Send(DedupKey),
    Throttled,
    Duplicate,
}

/// Per-page suppression of outbound samples, by time and by content.
#[derive(Debug)]
pub struct Gate {
    min_interval: Duration,
    last_send: Option<Instant>,
    last_key: Option<DedupKey>,
}

impl Gate {
    pub fn new(config: &GateConfig) -> Self {
        Self {
            min_interval: config.min_interval,
            last_send: None,
            last_key: None,
        }
    }

    pub fn admit(&mut self, sample: &Sample) -> Admission {
        self.admit_at(sample, Instant::now())
    }

    /// The throttle window is checked before hashing. An accepted sample starts a
    /// new window; its key only counts as sent once [`Gate::mark_sent`] is called.
    pub fn admit_at(&mut self, sample: &Sample, now: Instant) -> Admission {
        if let Some(last) = self.last_send {
            if now.saturating_duration_since(last) < self.min_interval {
                return Admission::Throttled;
            }
        }

        let key = dedup_key(&sample.snippet);
        if self.last_key == Some(key) {
            return Admission::Duplicate;
        }

        self.last_send = Some(now);
        Admission::Send(key)
    }

    pub fn mark_sent(&mut self, key: DedupKey) {
        self.last_key = Some(key);
    }
}

pub fn dedup_key(snippet: &str) -> DedupKey {
    Sha256::digest(snippet.as_bytes()).into()
}
