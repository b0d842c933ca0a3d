//! Production resilience and hardening features
//!
//! Provides the retry budget, client configuration and structured
//! diagnostics used by every layer of the API client.

pub mod config;
pub mod logging;
pub mod retry;

pub use config::{BatchConfig, BodyFormat, ClientConfig, ClientConfigBuilder, FastListConfig, LogLevel, MonitoringConfig, OAuthConfig};
pub use logging::{ApiLogger, LogSink, MemorySink, Severity, TelemetryEvent, TelemetrySink};
pub use retry::{RetryConfig, RetryPolicy};
