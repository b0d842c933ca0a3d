//! Client configuration with builder pattern
//!
//! One struct carries everything the engine needs to know about timeouts,
//! retry budgets, batch sizing and logging, so that nothing is looked up from
//! global settings at call time.

use super::retry::RetryConfig;
use crate::api::constants::{self, MAX_BATCH_SIZE, PAGE_SIZE};
use std::time::Duration;

/// Shape of the request body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyFormat {
    /// Form-encoded with bracketed keys (legacy call shape)
    #[default]
    Form,
    /// JSON body (newer call shape)
    Json,
}

/// Global configuration for platform calls
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// URL scheme, `https` against real portals
    pub scheme: String,
    /// Per physical request deadline
    pub timeout: Duration,
    pub body_format: BodyFormat,
    pub user_agent: String,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
    pub fast_list: FastListConfig,
    pub oauth: Option<OAuthConfig>,
    pub monitoring: MonitoringConfig,
}

/// Batch sizing
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Upper bound accepted for `chunk_size`
    pub max_chunk_size: usize,
    /// Records per page of a list method
    pub page_size: usize,
    /// Sleep between chunks when the platform reports heavy operating time
    pub throttle_on_operating: bool,
}

/// Cursor-pipelined list settings
#[derive(Debug, Clone)]
pub struct FastListConfig {
    /// Duplicate records tolerated per fetch before it is cut short
    pub max_duplicates: usize,
}

/// Application keys for the OAuth refresh exchange
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
}

/// Monitoring and logging configuration
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub request_logging: bool,
    pub performance_logging: bool,
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            timeout: Duration::from_secs(constants::DEFAULT_TIMEOUT_SECS),
            body_format: BodyFormat::Form,
            user_agent: format!("b24-client/{}", env!("CARGO_PKG_VERSION")),
            retry: RetryConfig::default(),
            batch: BatchConfig::default(),
            fast_list: FastListConfig::default(),
            oauth: None,
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: MAX_BATCH_SIZE,
            page_size: PAGE_SIZE,
            throttle_on_operating: true,
        }
    }
}

impl Default for FastListConfig {
    fn default() -> Self {
        Self { max_duplicates: 2 }
    }
}

impl OAuthConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: constants::OAUTH_TOKEN_URL.to_string(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            request_logging: true,
            performance_logging: true,
            log_level: LogLevel::Info,
        }
    }
}

impl ClientConfig {
    /// Create a new builder for ClientConfig
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Conservative config for cron jobs against busy portals
    pub fn conservative() -> Self {
        Self {
            retry: RetryConfig::conservative(),
            monitoring: MonitoringConfig {
                request_logging: true,
                performance_logging: true,
                log_level: LogLevel::Warn,
            },
            ..Self::default()
        }
    }

    /// Disable retries, throttling and logging (for testing)
    pub fn disabled() -> Self {
        Self {
            retry: RetryConfig::none(),
            batch: BatchConfig {
                throttle_on_operating: false,
                ..BatchConfig::default()
            },
            monitoring: MonitoringConfig {
                request_logging: false,
                performance_logging: false,
                log_level: LogLevel::Error,
            },
            ..Self::default()
        }
    }
}

/// Builder for ClientConfig
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.config.scheme = scheme.into();
        self
    }

    /// Set the per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn body_format(mut self, format: BodyFormat) -> Self {
        self.config.body_format = format;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    /// Configure retry behavior
    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set how many times a 503 is retried
    pub fn retries_on_503(mut self, retries: u32) -> Self {
        self.config.retry.retries_on_503 = retries;
        self
    }

    /// Set the 503 backoff: first delay and per-retry increment
    pub fn backoff(mut self, initial: Duration, step: Duration) -> Self {
        self.config.retry.initial_delay = initial;
        self.config.retry.delay_step = step;
        self
    }

    pub fn max_redirects(mut self, redirects: u32) -> Self {
        self.config.retry.max_redirects = redirects;
        self
    }

    pub fn batch_config(mut self, batch: BatchConfig) -> Self {
        self.config.batch = batch;
        self
    }

    /// Enable/disable sleeping between chunks on heavy operating time
    pub fn throttle_on_operating(mut self, enabled: bool) -> Self {
        self.config.batch.throttle_on_operating = enabled;
        self
    }

    pub fn max_duplicates(mut self, duplicates: usize) -> Self {
        self.config.fast_list.max_duplicates = duplicates;
        self
    }

    pub fn oauth(mut self, oauth: OAuthConfig) -> Self {
        self.config.oauth = Some(oauth);
        self
    }

    /// Configure monitoring
    pub fn monitoring_config(mut self, monitoring: MonitoringConfig) -> Self {
        self.config.monitoring = monitoring;
        self
    }

    /// Enable/disable request logging
    pub fn request_logging(mut self, enabled: bool) -> Self {
        self.config.monitoring.request_logging = enabled;
        self
    }

    /// Set logging level
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.monitoring.log_level = level;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();

        assert_eq!(config.scheme, "https");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.retry.retries_on_503, 20);
        assert_eq!(config.batch.max_chunk_size, 50);
        assert_eq!(config.batch.page_size, 50);
        assert_eq!(config.fast_list.max_duplicates, 2);
        assert_eq!(config.body_format, BodyFormat::Form);
        assert!(config.oauth.is_none());
    }

    #[test]
    fn test_conservative_config() {
        let config = ClientConfig::conservative();

        assert_eq!(config.retry.retries_on_503, 5);
        assert_eq!(config.monitoring.log_level, LogLevel::Warn);
    }

    #[test]
    fn test_disabled_config() {
        let config = ClientConfig::disabled();

        assert_eq!(config.retry.retries_on_503, 0);
        assert!(!config.batch.throttle_on_operating);
        assert!(!config.monitoring.request_logging);
    }

    #[test]
    fn test_builder_pattern() {
        let config = ClientConfig::builder()
            .scheme("http")
            .timeout(Duration::from_secs(5))
            .retries_on_503(3)
            .backoff(Duration::from_millis(1), Duration::from_millis(2))
            .max_duplicates(10)
            .oauth(OAuthConfig::new("app.1", "secret"))
            .log_level(LogLevel::Debug)
            .build();

        assert_eq!(config.scheme, "http");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.retry.retries_on_503, 3);
        assert_eq!(config.retry.delay_step, Duration::from_millis(2));
        assert_eq!(config.fast_list.max_duplicates, 10);
        assert_eq!(
            config.oauth.map(|o| o.token_url),
            Some("https://oauth.bitrix.info/oauth/token/".to_string())
        );
        assert_eq!(config.monitoring.log_level, LogLevel::Debug);
    }
}
