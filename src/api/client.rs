//! Platform client: one logical call per credential
//!
//! [`PlatformClient::call`] builds the wire request for a credential, runs it
//! through the [`Transport`], classifies the envelope and, for stored
//! credentials, refreshes an expired token and retries exactly once.

use super::auth::{
    Clock, Credential, CredentialStore, InMemoryCredentialStore, RefreshOutcome, SystemClock,
    TokenRefresher,
};
use super::constants::{self, envelope};
use super::error::{ApiError, Error, Result};
use super::params::{Params, encode_params};
use super::query::MethodRegistry;
use super::resilience::{ApiLogger, BodyFormat, ClientConfig, LogSink, TelemetrySink};
use super::transport::{RawResponse, RequestBody, Transport};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Decoded success envelope of one call
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub result: Value,
    pub next: Option<u64>,
    pub total: Option<u64>,
    pub time: Option<Value>,
}

impl ApiResponse {
    fn from_envelope(status: u16, envelope: &Value) -> Self {
        Self {
            status,
            result: envelope.get(envelope::RESULT).cloned().unwrap_or(Value::Null),
            next: envelope.get(envelope::NEXT).and_then(as_u64),
            total: envelope.get(envelope::TOTAL).and_then(as_u64),
            time: envelope.get(envelope::TIME).cloned(),
        }
    }

    /// Platform-side time spent on this method, if reported
    pub fn operating(&self) -> Option<f64> {
        self.time
            .as_ref()
            .and_then(|t| t.get(envelope::OPERATING))
            .and_then(Value::as_f64)
    }
}

/// Integer that may arrive as a JSON number or a numeric string
pub(crate) fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Classify a raw response into a success envelope or a typed error
pub(crate) fn decode_envelope(domain: &str, response: &RawResponse) -> Result<Value> {
    let envelope = match response.json() {
        Some(value @ Value::Object(_)) => value,
        Some(_) => {
            return Err(Error::MalformedResponse {
                status: response.status,
                message: "response is not a JSON object".to_string(),
            });
        }
        None => {
            return Err(Error::MalformedResponse {
                status: response.status,
                message: preview(&response.body),
            });
        }
    };

    let has_error = envelope
        .get(envelope::ERROR)
        .is_some_and(|e| !e.is_null() && e.as_str() != Some(""));

    if !has_error {
        if matches!(response.status, 200 | 201) {
            return Ok(envelope);
        }
        return Err(Error::MalformedResponse {
            status: response.status,
            message: format!("status {} without error field", response.status),
        });
    }

    let error = ApiError::from_envelope(response.status, &envelope);
    if response.status == 401 && error.is_expired_token() {
        return Err(Error::ExpiredToken {
            domain: domain.to_string(),
        });
    }
    Err(Error::Api(error))
}

pub(crate) fn preview(body: &str) -> String {
    let mut text: String = body.chars().take(200).collect();
    if text.len() < body.len() {
        text.push_str("...");
    }
    text
}

/// Client for one platform installation
#[derive(Debug, Clone)]
pub struct PlatformClient {
    config: ClientConfig,
    transport: Transport,
    refresher: TokenRefresher,
    registry: MethodRegistry,
    logger: ApiLogger,
}

/// Wires collaborators into a [`PlatformClient`]
pub struct PlatformClientBuilder {
    config: ClientConfig,
    sink: Arc<dyn TelemetrySink>,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    registry: MethodRegistry,
}

impl PlatformClientBuilder {
    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = store;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Methods that can be fast-listed
    pub fn registry(mut self, registry: MethodRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn build(self) -> Result<PlatformClient> {
        let logger = ApiLogger::new(self.config.monitoring.clone(), self.sink);
        let transport = Transport::new(&self.config, logger.clone())?;
        let refresher = TokenRefresher::new(self.config.oauth.clone(), self.store, self.clock);
        Ok(PlatformClient {
            config: self.config,
            transport,
            refresher,
            registry: self.registry,
            logger,
        })
    }
}

impl PlatformClient {
    /// Client logging through `log` with an in-memory credential store
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> PlatformClientBuilder {
        PlatformClientBuilder {
            config,
            sink: Arc::new(LogSink),
            store: Arc::new(InMemoryCredentialStore::new()),
            clock: Arc::new(SystemClock),
            registry: MethodRegistry::standard(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn logger(&self) -> &ApiLogger {
        &self.logger
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        self.refresher.store()
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    fn request(&self, credential: &Credential, method: &str, params: &Params) -> (String, RequestBody) {
        let url = constants::method_endpoint(
            &self.config.scheme,
            credential.domain(),
            credential.hook_key(),
            method,
        );
        let mut params = params.clone();
        if let Some((key, secret)) = credential.auth_param() {
            params.insert(key, secret);
        }
        let body = match self.config.body_format {
            BodyFormat::Form => RequestBody::Form(encode_params(&params)),
            BodyFormat::Json => RequestBody::Json(params.to_json()),
        };
        (url, body)
    }

    /// Run one physical request without interpreting the answer
    pub(crate) async fn execute_raw(
        &self,
        credential: &Credential,
        method: &str,
        params: &Params,
        timeout: Option<Duration>,
    ) -> Result<RawResponse> {
        let (url, body) = self.request(credential, method, params);
        self.transport.execute(&url, &body, timeout).await
    }

    /// Run one physical request and return the whole decoded envelope
    pub(crate) async fn call_envelope(
        &self,
        credential: &Credential,
        method: &str,
        params: &Params,
        timeout: Option<Duration>,
    ) -> Result<(u16, Value)> {
        let response = self.execute_raw(credential, method, params, timeout).await?;
        let envelope = decode_envelope(credential.domain(), &response)?;
        Ok((response.status, envelope))
    }

    /// One call without refresh handling
    pub async fn call_once(
        &self,
        credential: &Credential,
        method: &str,
        params: &Params,
        timeout: Option<Duration>,
    ) -> Result<ApiResponse> {
        let (status, envelope) = self.call_envelope(credential, method, params, timeout).await?;
        let response = ApiResponse::from_envelope(status, &envelope);
        if let Some(operating) = response.operating() {
            self.logger.method_operating(credential.domain(), method, operating);
        }
        Ok(response)
    }

    /// Call `method`, refreshing an expired stored token and retrying once
    pub async fn call(
        &self,
        credential: &mut Credential,
        method: &str,
        params: Params,
    ) -> Result<ApiResponse> {
        self.call_with_timeout(credential, method, params, None).await
    }

    pub async fn call_with_timeout(
        &self,
        credential: &mut Credential,
        method: &str,
        params: Params,
        timeout: Option<Duration>,
    ) -> Result<ApiResponse> {
        match self.call_once(credential, method, &params, timeout).await {
            Err(e) if e.is_expired_token() => {
                if self.try_refresh(credential, timeout).await {
                    self.call_once(credential, method, &params, timeout).await
                } else {
                    Err(e)
                }
            }
            other => other,
        }
    }

    /// Refresh a stored credential. Dynamic credentials cannot be refreshed.
    pub async fn refresh(
        &self,
        credential: &mut Credential,
        timeout: Option<Duration>,
    ) -> Result<RefreshOutcome> {
        match credential {
            Credential::Stored(stored) => {
                self.refresher
                    .refresh(&self.transport, stored, timeout)
                    .await
            }
            Credential::Dynamic(_) => Err(Error::usage("dynamic credentials cannot be refreshed")),
        }
    }

    /// Refresh after an expired token, if this credential can be refreshed at all.
    ///
    /// A failed refresh is only logged; the caller re-raises its expired token.
    pub(crate) async fn try_refresh(
        &self,
        credential: &mut Credential,
        timeout: Option<Duration>,
    ) -> bool {
        if matches!(credential, Credential::Dynamic(_)) {
            return false;
        }
        match self.refresh(credential, timeout).await {
            Ok(outcome) => outcome.is_refreshed(),
            Err(e) => {
                self.logger
                    .token_refresh_failed(credential.domain(), &e.to_string());
                false
            }
        }
    }

    /// Refresh every stored OAuth credential. Returns `(active_before, active_after)`.
    pub async fn refresh_all(&self, timeout: Option<Duration>) -> Result<(usize, usize)> {
        self.refresher.refresh_all(&self.transport, timeout).await
    }
}
