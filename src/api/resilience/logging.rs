//! Structured logging for platform calls
//!
//! Diagnostics are written to an injected [`TelemetrySink`] as
//! `(severity, tag, text)` triples. [`LogSink`] forwards them to the `log`
//! facade; [`MemorySink`] keeps them for inspection.

use super::config::{LogLevel, MonitoringConfig};
use crate::api::constants::{OPERATING_THRESHOLD, OPERATING_WARN_THRESHOLD};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
    Debug,
}

impl Severity {
    fn level(self) -> LogLevel {
        match self {
            Severity::Error => LogLevel::Error,
            Severity::Warning => LogLevel::Warn,
            Severity::Info => LogLevel::Info,
            Severity::Debug => LogLevel::Debug,
        }
    }
}

/// Destination for diagnostics
pub trait TelemetrySink: Send + Sync {
    fn record(&self, severity: Severity, tag: &str, text: &str);
}

/// Sink that writes through the `log` crate
#[derive(Debug, Default, Clone)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn record(&self, severity: Severity, tag: &str, text: &str) {
        let level = match severity {
            Severity::Error => log::Level::Error,
            Severity::Warning => log::Level::Warn,
            Severity::Info => log::Level::Info,
            Severity::Debug => log::Level::Debug,
        };
        log::log!(target: "b24_client", level, "{}: {}", tag, text);
    }
}

/// One recorded diagnostic
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub severity: Severity,
    pub tag: String,
    pub text: String,
}

/// Sink that keeps every event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn tags(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.tag).collect()
    }

    pub fn count(&self, tag: &str) -> usize {
        self.events().iter().filter(|e| e.tag == tag).count()
    }
}

impl TelemetrySink for MemorySink {
    fn record(&self, severity: Severity, tag: &str, text: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(TelemetryEvent {
                severity,
                tag: tag.to_string(),
                text: text.to_string(),
            });
        }
    }
}

/// Keys whose values never reach the logs
const SECRET_KEYS: &[&str] = &["auth", "refresh_token", "client_secret", "access_token"];

const MASK: &str = "***";

fn mask_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, value) in map.iter_mut() {
                if SECRET_KEYS.contains(&key.as_str()) {
                    *value = Value::String(MASK.to_string());
                } else {
                    mask_json(value);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_json),
        _ => {}
    }
}

/// Hide the key segment of a webhook path (`/rest/{user_id}/{key}/{method}`)
fn mask_hook_path(url: &str) -> String {
    let Some(start) = url.find("/rest/").map(|i| i + "/rest/".len()) else {
        return url.to_string();
    };
    let (head, tail) = url.split_at(start);
    let mut segments: Vec<&str> = tail.split('/').collect();
    if segments.len() < 3 {
        return url.to_string();
    }
    let last = segments.len() - 1;
    for segment in &mut segments[1..last] {
        *segment = MASK;
    }
    format!("{}{}", head, segments.join("/"))
}

fn mask_pairs(query: &str) -> String {
    query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, _)) if SECRET_KEYS.contains(&key) => format!("{}={}", key, MASK),
            _ => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Mask secret values in a URL, a form body or a JSON body
pub fn mask_secrets(text: &str) -> String {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(mut value) = serde_json::from_str::<Value>(text) {
            mask_json(&mut value);
            return value.to_string();
        }
    }
    let is_url = text
        .split_once("://")
        .is_some_and(|(scheme, _)| !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric()));
    if !is_url {
        return mask_pairs(text);
    }
    match text.split_once('?') {
        Some((url, query)) => format!("{}?{}", mask_hook_path(url), mask_pairs(query)),
        None => mask_hook_path(text),
    }
}

/// Structured logger for API operations
#[derive(Clone)]
pub struct ApiLogger {
    config: MonitoringConfig,
    sink: Arc<dyn TelemetrySink>,
}

impl std::fmt::Debug for ApiLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiLogger").field("config", &self.config).finish()
    }
}

impl ApiLogger {
    pub fn new(config: MonitoringConfig, sink: Arc<dyn TelemetrySink>) -> Self {
        Self { config, sink }
    }

    /// Logger writing through the `log` crate
    pub fn with_log(config: MonitoringConfig) -> Self {
        Self::new(config, Arc::new(LogSink))
    }

    fn should_log(&self, severity: Severity) -> bool {
        severity.level() <= self.config.log_level
    }

    /// Record an event if the configured level allows it
    pub fn event(&self, severity: Severity, tag: &str, text: &str) {
        if self.should_log(severity) {
            self.sink.record(severity, tag, text);
        }
    }

    /// Log an outgoing physical request
    pub fn log_request(&self, url: &str, body: &str) {
        if !self.config.request_logging {
            return;
        }
        let data = json!({
            "event": "http_request",
            "url": mask_secrets(url),
            "body": mask_secrets(body),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.event(Severity::Debug, "bitrix_request", &data.to_string());
    }

    /// Log the answer to a physical request
    pub fn log_response(&self, url: &str, status: u16, duration: Duration, body: &str) {
        if !self.config.request_logging {
            return;
        }
        let data = json!({
            "event": "http_response",
            "url": mask_secrets(url),
            "status_code": status,
            "duration_ms": duration.as_millis(),
            "body": mask_secrets(body),
        });
        let severity = if status >= 400 { Severity::Warning } else { Severity::Debug };
        self.event(severity, "bitrix_response", &data.to_string());
    }

    pub fn retry_on_503(&self, url: &str, retries_left: u32, delay: Duration) {
        let data = json!({
            "url": mask_secrets(url),
            "retries_left": retries_left,
            "sleep_ms": delay.as_millis(),
        });
        self.event(Severity::Debug, "retry_on_503", &data.to_string());
    }

    pub fn retry_503_exceeded(&self, url: &str, attempts: u32) {
        let data = json!({ "url": mask_secrets(url), "attempts": attempts });
        self.event(Severity::Warning, "retry_503_exceeded", &data.to_string());
    }

    pub fn redirect_followed(&self, from: &str, to: &str) {
        let data = json!({ "url": mask_secrets(from), "location": mask_secrets(to) });
        self.event(Severity::Debug, "retry_on_301_302", &data.to_string());
    }

    pub fn redirect_refused(&self, url: &str, location: Option<&str>, status: u16) {
        let data = json!({
            "url": mask_secrets(url),
            "location": location.map(mask_secrets),
            "status_code": status,
        });
        self.event(Severity::Warning, "retry_on_301_302_failed", &data.to_string());
    }

    /// Report platform-side operating time once it crosses the threshold
    pub fn method_operating(&self, domain: &str, method: &str, operating: f64) {
        if !self.config.performance_logging || operating <= OPERATING_THRESHOLD {
            return;
        }
        let severity = if operating < OPERATING_WARN_THRESHOLD {
            Severity::Info
        } else {
            Severity::Warning
        };
        self.event(
            severity,
            "method_operating",
            &format!("{}, {}: {}", domain, method, operating),
        );
    }

    pub fn token_refreshed(&self, domain: &str) {
        self.event(Severity::Info, "token_refreshed", domain);
    }

    pub fn token_refresh_failed(&self, domain: &str, reason: &str) {
        self.event(
            Severity::Warning,
            "token_refresh_failed",
            &format!("{}: {}", domain, reason),
        );
    }

    pub fn batch_non_json(&self, status: u16, body: &str) {
        self.event(
            Severity::Warning,
            "bitrix_api_error",
            &format!("batch status {}: {}", status, body),
        );
    }

    pub fn list_length_error(&self, total: usize, fetched: usize, allowable: usize) {
        self.event(
            Severity::Warning,
            "call_list_method_length_error",
            &format!(
                "total: {}, result length: {}, allowable_error: {}",
                total, fetched, allowable
            ),
        );
    }

    pub fn list_slow(&self, method: &str, pages: usize, elapsed: Duration) {
        if !self.config.performance_logging {
            return;
        }
        let data = json!({
            "method": method,
            "batch_pages": pages,
            "elapsed_ms": elapsed.as_millis(),
        });
        self.event(Severity::Info, "call_list_method_time_log", &data.to_string());
    }
}
