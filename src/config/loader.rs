use std::{env, str::FromStr, time::Duration};

use url::Url;

use super::env::{
    AppConfig, ChannelConfig, ClassifierConfig, ConfigError, DirectoryConfig, GateConfig,
    LoggingConfig, PageConfig, SamplerConfig, SettingsOverrides, WebContentConfig,
};

pub fn load_config() -> Result<AppConfig, ConfigError> {
    AppConfig::from_env()
}

impl AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let classifier_defaults = ClassifierConfig::default();
        let endpoint = env::var("CLASSIFIER_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or(classifier_defaults.endpoint);
        validate_endpoint(&endpoint)?;

        let classifier = ClassifierConfig {
            endpoint,
            timeout: parse_nonzero_millis("CLASSIFIER_TIMEOUT_MS")
                .unwrap_or(classifier_defaults.timeout),
        };

        let sampler_defaults = SamplerConfig::default();
        let sampler = SamplerConfig {
            max_attempts: parse::<u32>("SAMPLER_MAX_ATTEMPTS")
                .filter(|n| *n > 0)
                .unwrap_or(sampler_defaults.max_attempts),
            retry_delay: parse_millis("SAMPLER_RETRY_DELAY_MS")
                .unwrap_or(sampler_defaults.retry_delay),
            min_content_chars: parse("SAMPLER_MIN_CONTENT_CHARS")
                .unwrap_or(sampler_defaults.min_content_chars),
            max_chars: parse::<usize>("SAMPLER_MAX_CHARS")
                .filter(|n| *n > 0)
                .unwrap_or(sampler_defaults.max_chars),
            strip_stopwords: parse_bool("SAMPLER_STRIP_STOPWORDS")
                .unwrap_or(sampler_defaults.strip_stopwords),
        };

        let page_defaults = PageConfig::default();
        let page = PageConfig {
            sampler,
            gate: GateConfig {
                min_interval: parse_millis("GATE_MIN_INTERVAL_MS")
                    .unwrap_or(page_defaults.gate.min_interval),
            },
            initial_delay: parse_millis("PAGE_INITIAL_DELAY_MS")
                .unwrap_or(page_defaults.initial_delay),
            url_poll_interval: parse_nonzero_millis("URL_POLL_INTERVAL_MS")
                .unwrap_or(page_defaults.url_poll_interval),
        };

        let channel_defaults = ChannelConfig::default();
        let channel = ChannelConfig {
            capacity: parse::<usize>("CHANNEL_CAPACITY")
                .filter(|n| *n > 0)
                .unwrap_or(channel_defaults.capacity),
            ack_timeout: parse_millis("CHANNEL_ACK_TIMEOUT_MS")
                .unwrap_or(channel_defaults.ack_timeout),
        };

        let settings_overrides = SettingsOverrides {
            send_snippet: parse_bool("SEND_SNIPPET"),
            snippet_max_chars: parse::<usize>("SNIPPET_MAX_CHARS").filter(|n| *n > 0),
        };

        let pages = env::var("PAGE_URLS")
            .map(|value| split_list(&value))
            .unwrap_or_default();

        let directories = DirectoryConfig {
            logs_dir: env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string()),
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            db_filename: env::var("DB_FILENAME").unwrap_or_else(|_| "focus-gate.db".to_string()),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        };

        let web = WebContentConfig {
            fetch_timeout: parse_millis("WEBPAGE_FETCH_TIMEOUT")
                .unwrap_or(Duration::from_millis(10_000)),
            content_max_length: parse("WEBPAGE_CONTENT_MAX_LENGTH").unwrap_or(20_000),
            refresh_interval: parse_nonzero_millis("WEBPAGE_REFRESH_INTERVAL_MS")
                .unwrap_or(Duration::from_millis(10_000)),
        };

        Ok(Self {
            classifier,
            page,
            channel,
            settings_overrides,
            pages,
            directories,
            logging,
            web,
        })
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    match Url::parse(endpoint) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => Err(ConfigError::Invalid {
            key: "CLASSIFIER_URL",
            reason: format!("unsupported scheme {}", url.scheme()),
        }),
        Err(err) => Err(ConfigError::Invalid {
            key: "CLASSIFIER_URL",
            reason: err.to_string(),
        }),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse::<T>().ok())
}

fn parse_millis(key: &str) -> Option<Duration> {
    parse::<u64>(key).map(Duration::from_millis)
}

fn parse_nonzero_millis(key: &str) -> Option<Duration> {
    parse_millis(key).filter(|d| !d.is_zero())
}

fn parse_bool(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .and_then(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}
