//! Error taxonomy for platform calls
//!
//! Errors are split two ways. [`Error`] is the closed set of failures the
//! client can raise. [`ApiError::classify`] tells infrastructure trouble on
//! the platform side (transient) apart from request errors (logical), which
//! callers use to decide whether to retry and how loudly to log.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Where an [`ApiError`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorOrigin {
    /// The platform answered with a JSON `error` field
    Platform,
    /// An infrastructure response without a JSON body (proxy page, HTML 500, exhausted 503)
    Server,
}

/// Structured error returned by the platform
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiError {
    pub status: u16,
    pub code: String,
    pub description: String,
    pub origin: ErrorOrigin,
}

impl ApiError {
    pub fn new(status: u16, code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            description: description.into(),
            origin: ErrorOrigin::Platform,
        }
    }

    /// Infrastructure error that carried no JSON envelope
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status,
            code: message.clone(),
            description: message,
            origin: ErrorOrigin::Server,
        }
    }

    /// Build from a decoded error envelope
    pub fn from_envelope(status: u16, envelope: &serde_json::Value) -> Self {
        let text = |key: &str| match envelope.get(key) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Self::new(status, text("error"), text("error_description"))
    }

    pub fn is_expired_token(&self) -> bool {
        self.code == super::constants::envelope::EXPIRED_TOKEN
    }

    /// Sort this error into infrastructure (transient) or request (logical) trouble.
    pub fn classify(&self) -> ErrorClass {
        let code = self.code.to_lowercase();
        let description = self.description.to_lowercase();

        let reason = if self.origin == ErrorOrigin::Server {
            Some(TransientReason::Infrastructure)
        } else if code == "internal_server_error" || description.contains("internal server error") {
            Some(TransientReason::InternalServerError)
        } else if description.contains("authorization server") || code == "error_connecting_to_auth_server" {
            Some(TransientReason::AuthServerUnreachable)
        } else if code == "license_check_failed" || description.contains("license check failed") {
            Some(TransientReason::LicenseCheckFailed)
        } else if code == "no_auth_found" {
            Some(TransientReason::NoAuthFound)
        } else if code == "portal_deleted" {
            Some(TransientReason::PortalDeleted)
        } else if code == "access_denied" && description.contains("commercial plan") {
            Some(TransientReason::FreePlanRestriction)
        } else if code == "wrong_encoding" || description.contains("wrong encoding") {
            Some(TransientReason::WrongEncoding)
        } else if code == "authorization_error" {
            Some(TransientReason::AuthorizationError)
        } else if code == "disk_quota_exceeded" || description.contains("disk quota") {
            Some(TransientReason::DiskQuotaExceeded)
        } else if code == "application_not_found" {
            Some(TransientReason::ApplicationNotFound)
        } else if self.status >= 500 {
            Some(TransientReason::ServerStatus(self.status))
        } else {
            None
        };

        match reason {
            Some(reason) => ErrorClass::Transient(reason),
            None => ErrorClass::Logical,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.classify(), ErrorClass::Transient(_))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() || self.description == self.code {
            write!(f, "{} {}", self.status, self.code)
        } else {
            write!(f, "{} {}: {}", self.status, self.code, self.description)
        }
    }
}

/// Why an error counts as infrastructure trouble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientReason {
    /// Proxy or upstream page instead of a platform answer
    Infrastructure,
    InternalServerError,
    AuthServerUnreachable,
    LicenseCheckFailed,
    NoAuthFound,
    PortalDeleted,
    FreePlanRestriction,
    WrongEncoding,
    AuthorizationError,
    DiskQuotaExceeded,
    ApplicationNotFound,
    ServerStatus(u16),
    Connection,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// "Their fault": the platform or the network is in trouble
    Transient(TransientReason),
    /// "My fault": the request itself was rejected
    Logical,
}

/// Failure of a whole batch chunk, as opposed to a per-item error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchFailure {
    #[error("batch response is not JSON (status {status})")]
    Undecodable { status: u16, body: String },
    #[error("batch rejected: {0}")]
    Rejected(ApiError),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection to {url} failed: {message}")]
    ConnectionFailure { url: String, message: String },

    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("malformed response (status {status}): {message}")]
    MalformedResponse { status: u16, message: String },

    #[error("API error: {0}")]
    Api(ApiError),

    #[error("access token for {domain} has expired")]
    ExpiredToken { domain: String },

    #[error(transparent)]
    BatchFailure(#[from] BatchFailure),

    #[error("list length changed during fetch by {difference} (allowed {allowable}, total {total}, fetched {fetched})")]
    ListLengthMismatch {
        total: usize,
        fetched: usize,
        difference: usize,
        allowable: usize,
    },

    #[error("usage error: {0}")]
    Usage(String),
}

impl Error {
    pub fn usage(message: impl Into<String>) -> Self {
        Error::Usage(message.into())
    }

    /// Classify for retry and alerting decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::ConnectionFailure { .. } => ErrorClass::Transient(TransientReason::Connection),
            Error::Timeout { .. } => ErrorClass::Transient(TransientReason::Timeout),
            Error::Api(api) => api.classify(),
            Error::BatchFailure(BatchFailure::Rejected(api)) => api.classify(),
            Error::BatchFailure(BatchFailure::Undecodable { status, .. }) if *status >= 500 => {
                ErrorClass::Transient(TransientReason::ServerStatus(*status))
            }
            Error::MalformedResponse { status, .. } if *status >= 500 => {
                ErrorClass::Transient(TransientReason::ServerStatus(*status))
            }
            _ => ErrorClass::Logical,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient(_))
    }

    pub fn is_expired_token(&self) -> bool {
        matches!(self, Error::ExpiredToken { .. })
    }

    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Error::Api(api) | Error::BatchFailure(BatchFailure::Rejected(api)) => Some(api),
            _ => None,
        }
    }

    /// Error code as reported to callers of an HTTP facade
    pub fn code(&self) -> String {
        match self {
            Error::ConnectionFailure { .. } => "connection_failure".to_string(),
            Error::Timeout { .. } => "timeout".to_string(),
            Error::MalformedResponse { .. } => "malformed_response".to_string(),
            Error::Api(api) => api.code.clone(),
            Error::ExpiredToken { .. } => "expired_token".to_string(),
            Error::BatchFailure(BatchFailure::Rejected(api)) => api.code.clone(),
            Error::BatchFailure(BatchFailure::Undecodable { .. }) => "batch_failure".to_string(),
            Error::ListLengthMismatch { .. } => "list_length_mismatch".to_string(),
            Error::Usage(_) => "usage_error".to_string(),
        }
    }

    /// Convert into a payload for an HTTP error response. Infrastructure
    /// errors map to 5xx so they can be kept out of alerting, request
    /// errors to 4xx.
    pub fn to_payload(&self) -> ErrorPayload {
        let transient = self.is_transient();
        let status = match self {
            Error::Timeout { .. } => 504,
            Error::ConnectionFailure { .. } => 502,
            Error::ExpiredToken { .. } => 401,
            Error::Usage(_) => 400,
            _ if transient => match self.api_error() {
                Some(api) if api.status >= 500 => api.status,
                _ => 503,
            },
            _ => match self.api_error() {
                Some(api) if (400..500).contains(&api.status) => api.status,
                _ => 400,
            },
        };
        let message = match self.api_error() {
            Some(api) if !api.description.is_empty() => api.description.clone(),
            _ => self.to_string(),
        };
        ErrorPayload {
            status,
            code: self.code(),
            message,
            transient,
        }
    }
}

/// Serializable error summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub status: u16,
    pub code: String,
    pub message: String,
    pub transient: bool,
}
