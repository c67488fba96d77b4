use std::time::Duration;

/// Which delivery strategy an [`crate::inbox::Inbox`] should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Try SSE first, falling back to polling if it doesn't connect in time.
    #[default]
    Auto,
    Sse,
    Polling,
}

/// Configuration for the delivery core and the transport beneath it.
///
/// Only a config-struct constructor is offered — no functional-options
/// builder — so there is exactly one way to assemble a [`Config`].
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub retry_status_set: Vec<u16>,
    pub sse_connection_timeout: Duration,
    pub polling_initial_interval: Duration,
    pub polling_max_backoff: Duration,
    pub polling_backoff_multiplier: f64,
    pub polling_jitter_factor: f64,
    pub delivery_mode: DeliveryMode,
    pub callback_concurrency: Option<usize>,
}

impl Config {
    /// Construct a config with the given required fields and every other
    /// option at its default.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            ..Self::defaults()
        }
    }

    /// Read the API key from `VAULTSANDBOX_API_KEY` — the only input the
    /// library requires from the environment — and otherwise fall back to
    /// defaults. Building a richer multi-source configuration layer (files,
    /// CLI flags) is left to the application.
    pub fn from_env() -> Result<Self, std::env::VarError> {
        let api_key = std::env::var("VAULTSANDBOX_API_KEY")?;
        Ok(Self {
            api_key,
            ..Self::defaults()
        })
    }

    fn defaults() -> Self {
        Self {
            base_url: "https://api.vaultsandbox.com".to_owned(),
            api_key: String::new(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            retry_status_set: vec![408, 429, 500, 502, 503, 504],
            sse_connection_timeout: Duration::from_secs(5),
            polling_initial_interval: Duration::from_secs(2),
            polling_max_backoff: Duration::from_secs(30),
            polling_backoff_multiplier: 1.5,
            polling_jitter_factor: 0.3,
            delivery_mode: DeliveryMode::Auto,
            callback_concurrency: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::new("https://example.test", "key");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_status_set, vec![408, 429, 500, 502, 503, 504]);
        assert_eq!(config.polling_initial_interval, Duration::from_secs(2));
        assert_eq!(config.polling_max_backoff, Duration::from_secs(30));
        assert_eq!(config.delivery_mode, DeliveryMode::Auto);
    }
}
