//! Single physical HTTP call with transient-failure recovery
//!
//! [`Transport::execute`] posts one request and hands back the raw status and
//! body. It retries 503 answers on a linear schedule, follows redirects that
//! move a portal to another host and turns proxy pages that pretend to be
//! answers into [`ApiError::server`] errors. Every other status is returned
//! untouched for the caller to interpret.

use super::error::{ApiError, Error, Result};
use super::resilience::{ApiLogger, ClientConfig, RetryPolicy};
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{Url, redirect};
use serde_json::Value;
use std::time::{Duration, Instant};

/// Body of one physical request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// `application/x-www-form-urlencoded`, already encoded
    Form(String),
    Json(Value),
}

impl RequestBody {
    fn log_text(&self) -> String {
        match self {
            RequestBody::Form(text) => text.clone(),
            RequestBody::Json(value) => value.to_string(),
        }
    }
}

/// Status and body of a completed request
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    /// URL that produced this response, after redirects
    pub url: String,
}

impl RawResponse {
    /// Decoded body, if it is JSON
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// HTTP executor shared by every higher layer
#[derive(Debug, Clone)]
pub struct Transport {
    http_client: reqwest::Client,
    retry_policy: RetryPolicy,
    timeout: Duration,
    logger: ApiLogger,
}

impl Transport {
    pub fn new(config: &ClientConfig, logger: ApiLogger) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::ConnectionFailure {
                url: String::new(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            retry_policy: RetryPolicy::new(config.retry.clone()),
            timeout: config.timeout,
            logger,
        })
    }

    pub fn logger(&self) -> &ApiLogger {
        &self.logger
    }

    /// Post `body` to `url`, falling back to the configured timeout.
    pub async fn execute(
        &self,
        url: &str,
        body: &RequestBody,
        timeout: Option<Duration>,
    ) -> Result<RawResponse> {
        let timeout = timeout.unwrap_or(self.timeout);
        let mut url = url.to_string();
        let mut retries = 0u32;
        let mut redirects = 0u32;

        loop {
            let (response, location) = self.send(&url, body, timeout).await?;

            match response.status {
                503 => {
                    if !self.retry_policy.allows(retries) {
                        self.logger.retry_503_exceeded(&url, retries);
                        return Err(Error::Api(overloaded_error(&response)));
                    }
                    let delay = self.retry_policy.delay(retries);
                    self.logger.retry_on_503(
                        &url,
                        self.retry_policy.config().retries_on_503 - retries,
                        delay,
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    retries += 1;
                }
                301 | 302 => {
                    let target = location
                        .as_deref()
                        .and_then(|location| redirect_target(&url, location));
                    match target {
                        Some(target) if redirects < self.retry_policy.config().max_redirects => {
                            self.logger.redirect_followed(&url, &target);
                            url = target;
                            redirects += 1;
                        }
                        _ => {
                            self.logger
                                .redirect_refused(&url, location.as_deref(), response.status);
                            return Ok(response);
                        }
                    }
                }
                403 if response.body.contains("nginx") => {
                    return Err(Error::Api(ApiError::server(403, "Nginx 403 Forbidden")));
                }
                500 if response.body == "Internal Server Error" => {
                    return Err(Error::Api(ApiError::server(
                        500,
                        "Bitrix 500 Internal Server Error",
                    )));
                }
                _ => return Ok(response),
            }
        }
    }

    /// Plain GET without the 503 and redirect handling, for the OAuth exchange
    pub async fn get(&self, url: &str, timeout: Option<Duration>) -> Result<RawResponse> {
        let timeout = timeout.unwrap_or(self.timeout);
        self.logger.log_request(url, "");
        let started = Instant::now();

        let response = self
            .http_client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| network_error(url, timeout, e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| network_error(url, timeout, e))?;

        self.logger.log_response(url, status, started.elapsed(), &body);
        Ok(RawResponse {
            status,
            body,
            url: url.to_string(),
        })
    }

    async fn send(
        &self,
        url: &str,
        body: &RequestBody,
        timeout: Duration,
    ) -> Result<(RawResponse, Option<String>)> {
        self.logger.log_request(url, &body.log_text());
        let started = Instant::now();

        let request = self.http_client.post(url).timeout(timeout);
        let request = match body {
            RequestBody::Form(text) => request
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(text.clone()),
            RequestBody::Json(value) => request.json(value),
        };

        let response = request.send().await.map_err(|e| network_error(url, timeout, e))?;
        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| network_error(url, timeout, e))?;

        self.logger.log_response(url, status, started.elapsed(), &body);

        Ok((
            RawResponse {
                status,
                body,
                url: url.to_string(),
            },
            location,
        ))
    }
}

fn network_error(url: &str, timeout: Duration, error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::Timeout {
            url: url.to_string(),
            timeout,
        }
    } else {
        Error::ConnectionFailure {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

/// Error surfaced once the 503 budget is spent
fn overloaded_error(response: &RawResponse) -> ApiError {
    match response.json() {
        Some(envelope) if envelope.get("error").is_some() => {
            ApiError::from_envelope(response.status, &envelope)
        }
        _ => ApiError::server(response.status, "Service Unavailable"),
    }
}

/// Absolute redirect target, if it points at another host.
///
/// A redirect to the same host:port is not a portal move and is not followed.
fn redirect_target(url: &str, location: &str) -> Option<String> {
    let current = Url::parse(url).ok()?;
    let target = current.join(location).ok()?;
    let authority = |u: &Url| (u.host_str().map(str::to_lowercase), u.port_or_known_default());
    if authority(&current) == authority(&target) {
        return None;
    }
    Some(target.to_string())
}
