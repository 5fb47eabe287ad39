use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub classifier: ClassifierConfig,
    pub page: PageConfig,
    pub channel: ChannelConfig,
    pub settings_overrides: SettingsOverrides,
    pub pages: Vec<String>,
    pub directories: DirectoryConfig,
    pub logging: LoggingConfig,
    pub web: WebContentConfig,
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub endpoint: String,
    pub timeout: Duration,
}

/// Everything a page session needs to sample, throttle and poll.
#[derive(Debug, Clone)]
pub struct PageConfig {
    pub sampler: SamplerConfig,
    pub gate: GateConfig,
    pub initial_delay: Duration,
    pub url_poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub min_content_chars: usize,
    pub max_chars: usize,
    pub strip_stopwords: bool,
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub min_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub capacity: usize,
    pub ack_timeout: Duration,
}

/// Values applied to the persisted settings at startup, mirroring the popup toggle.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub send_snippet: Option<bool>,
    pub snippet_max_chars: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub logs_dir: String,
    pub data_dir: String,
    pub db_filename: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone)]
pub struct WebContentConfig {
    pub fetch_timeout: Duration,
    pub content_max_length: usize,
    pub refresh_interval: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:5000/check".to_string(),
            timeout: Duration::from_millis(3_000),
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            retry_delay: Duration::from_millis(1_500),
            min_content_chars: 40,
            max_chars: 1_500,
            strip_stopwords: true,
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(1_500),
        }
    }
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::default(),
            gate: GateConfig::default(),
            initial_delay: Duration::from_millis(1_200),
            url_poll_interval: Duration::from_millis(1_000),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            ack_timeout: Duration::from_millis(1_000),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
