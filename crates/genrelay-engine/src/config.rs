use std::env;
use std::time::Duration;

use genrelay_contracts::access::AccessList;
use genrelay_contracts::preferences::DEFAULT_IMAGE_ADAPTER;

use crate::adapters::{AdapterSettings, DEFAULT_NEGATIVE_PROMPT};
use crate::extract::DEFAULT_PAGE_TIMEOUT;
use crate::llm::{DEFAULT_GEMINI_API_BASE, DEFAULT_TEXT_MODEL};
use crate::retry::RetryPolicy;
use crate::stream::DEFAULT_RENDER_INTERVAL;

const MAX_RETRIES: usize = 10;
const MAX_DELAY_MS: u64 = 60_000;

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_api_base: String,
    pub text_model: String,
    pub default_image_adapter: String,
    pub adapters: AdapterSettings,
    pub job_retry: RetryPolicy,
    pub chat_retry: RetryPolicy,
    pub render_interval: Duration,
    pub page_timeout: Duration,
    pub access: AccessList,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            default_image_adapter: DEFAULT_IMAGE_ADAPTER.to_string(),
            adapters: AdapterSettings::default(),
            job_retry: RetryPolicy::new(3, Duration::from_millis(1000)),
            chat_retry: RetryPolicy::new(2, Duration::from_millis(500)),
            render_interval: DEFAULT_RENDER_INTERVAL,
            page_timeout: DEFAULT_PAGE_TIMEOUT,
            access: AccessList::default(),
        }
    }
}

impl RelayConfig {
    /// Loads `.env` (if any) and then reads the process environment.
    pub fn load() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        Self::from_env()
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let base = |key: &str| get(key).map(|value| value.trim_end_matches('/').to_string());
        let count = |key: &str, default: usize| {
            get(key)
                .and_then(|value| value.parse::<usize>().ok())
                .map(|value| value.min(MAX_RETRIES))
                .unwrap_or(default)
        };
        let millis = |key: &str, default: Duration| {
            get(key)
                .and_then(|value| value.parse::<u64>().ok())
                .map(|value| Duration::from_millis(value.min(MAX_DELAY_MS)))
                .unwrap_or(default)
        };

        let defaults = Self::default();
        let adapter_defaults = AdapterSettings::default();
        Self {
            gemini_api_key: get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY")),
            gemini_api_base: base("GEMINI_API_BASE").unwrap_or(defaults.gemini_api_base),
            text_model: get("GENRELAY_TEXT_MODEL").unwrap_or(defaults.text_model),
            default_image_adapter: get("GENRELAY_IMAGE_ADAPTER")
                .unwrap_or(defaults.default_image_adapter),
            adapters: AdapterSettings {
                negative_prompt: get("GENRELAY_NEGATIVE_PROMPT")
                    .unwrap_or_else(|| DEFAULT_NEGATIVE_PROMPT.to_string()),
                music_banner_url: get("GENRELAY_MUSIC_BANNER_URL").unwrap_or_default(),
                openai_api_key: get("OPENAI_API_KEY"),
                openai_api_base: base("OPENAI_API_BASE")
                    .or_else(|| base("OPENAI_BASE_URL"))
                    .unwrap_or(adapter_defaults.openai_api_base),
                replicate_api_token: get("REPLICATE_API_TOKEN"),
                replicate_api_base: base("REPLICATE_API_BASE")
                    .unwrap_or(adapter_defaults.replicate_api_base),
            },
            job_retry: RetryPolicy::new(
                count("GENRELAY_JOB_RETRIES", defaults.job_retry.max_retries),
                millis("GENRELAY_JOB_RETRY_DELAY_MS", defaults.job_retry.delay),
            ),
            chat_retry: RetryPolicy::new(
                count("GENRELAY_CHAT_RETRIES", defaults.chat_retry.max_retries),
                millis("GENRELAY_CHAT_RETRY_DELAY_MS", defaults.chat_retry.delay),
            ),
            render_interval: millis("GENRELAY_RENDER_INTERVAL_MS", defaults.render_interval),
            page_timeout: millis("GENRELAY_PAGE_TIMEOUT_MS", defaults.page_timeout),
            access: AccessList::from_csv(
                &get("GENRELAY_BLACKLIST").unwrap_or_default(),
                &get("GENRELAY_WHITELIST").unwrap_or_default(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> RelayConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        assert_eq!(config(&[]), RelayConfig::default());
        let defaults = RelayConfig::default();
        assert_eq!(defaults.job_retry.max_attempts(), 4);
        assert_eq!(defaults.chat_retry.delay, Duration::from_millis(500));
        assert_eq!(defaults.page_timeout, Duration::from_secs(8));
    }

    #[test]
    fn reads_keys_bases_and_clamps_counts() {
        let config = config(&[
            ("GOOGLE_API_KEY", " g-key "),
            ("OPENAI_BASE_URL", "https://proxy.test/v1/"),
            ("GENRELAY_JOB_RETRIES", "50"),
            ("GENRELAY_JOB_RETRY_DELAY_MS", "250"),
            ("GENRELAY_CHAT_RETRIES", "nope"),
            ("GENRELAY_BLACKLIST", "troll, spammer"),
        ]);
        assert_eq!(config.gemini_api_key.as_deref(), Some("g-key"));
        assert_eq!(config.adapters.openai_api_base, "https://proxy.test/v1");
        assert_eq!(config.job_retry, RetryPolicy::new(10, Duration::from_millis(250)));
        assert_eq!(config.chat_retry.max_retries, 2);
        assert!(!config.access.is_allowed("spammer"));
        assert!(config.access.is_allowed("ana"));
    }

    #[test]
    fn gemini_key_takes_precedence_over_google_key() {
        let config = config(&[("GEMINI_API_KEY", "a"), ("GOOGLE_API_KEY", "b")]);
        assert_eq!(config.gemini_api_key.as_deref(), Some("a"));
    }
}
