//! Bitrix24 REST API client
//!
//! A [`PlatformClient`] turns method calls into wire requests for one
//! credential at a time. On top of single calls it runs batches of named
//! sub-calls and two list strategies, and it refreshes expired OAuth tokens
//! through a [`CredentialStore`].

pub mod auth;
pub mod client;
pub mod constants;
pub mod error;
pub mod operations;
pub mod params;
pub mod query;
pub mod resilience;
pub mod transport;

pub use auth::{
    Credential, CredentialStore, DynamicCredential, InMemoryCredentialStore, RefreshError,
    RefreshOutcome, StoredCredential,
};
pub use client::{ApiResponse, PlatformClient, PlatformClientBuilder};
pub use error::{ApiError, BatchFailure, Error, ErrorClass, ErrorOrigin, ErrorPayload, Result};
pub use operations::{BatchItem, BatchOptions, BatchResultSet, SubCall, SubCalls};
pub use params::{Param, Params};
pub use query::{FastListOptions, ListOptions, MethodRegistry};
pub use resilience::{
    ApiLogger, BodyFormat, ClientConfig, ClientConfigBuilder, LogLevel, MemorySink,
    MonitoringConfig, OAuthConfig, RetryConfig, TelemetrySink,
};
