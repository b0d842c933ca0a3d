//! Credentials and the OAuth refresh exchange
//!
//! A [`Credential`] is either a [`StoredCredential`] owned by a durable store
//! and able to refresh itself, or a [`DynamicCredential`] built in memory from
//! a bearer value handed over by a caller. Only the stored kind exposes a
//! refresh path.

use super::constants::params as param_keys;
use super::error::{Error, Result};
use super::resilience::{ApiLogger, OAuthConfig};
use super::transport::Transport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Why a stored credential was deactivated. The numeric codes are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RefreshError {
    #[default]
    None,
    WrongClient,
    ExpiredToken,
    InvalidGrant,
    NotInstalled,
    PaymentRequired,
    DomainGone,
    Unknown,
}

impl RefreshError {
    pub fn code(self) -> u8 {
        match self {
            RefreshError::None => 0,
            RefreshError::WrongClient => 1,
            RefreshError::ExpiredToken => 2,
            RefreshError::InvalidGrant => 3,
            RefreshError::NotInstalled => 4,
            RefreshError::PaymentRequired => 5,
            RefreshError::DomainGone => 6,
            RefreshError::Unknown => 9,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => RefreshError::None,
            1 => RefreshError::WrongClient,
            2 => RefreshError::ExpiredToken,
            3 => RefreshError::InvalidGrant,
            4 => RefreshError::NotInstalled,
            5 => RefreshError::PaymentRequired,
            6 => RefreshError::DomainGone,
            9 => RefreshError::Unknown,
            _ => return None,
        })
    }

    /// Map the `error` field of a refresh reply
    pub fn from_oauth_error(error: &str) -> Self {
        match error {
            "wrong_client" => RefreshError::WrongClient,
            "expired_token" => RefreshError::ExpiredToken,
            "invalid_grant" => RefreshError::InvalidGrant,
            "NOT_INSTALLED" => RefreshError::NotInstalled,
            "PAYMENT_REQUIRED" => RefreshError::PaymentRequired,
            _ => RefreshError::Unknown,
        }
    }
}

impl From<RefreshError> for u8 {
    fn from(reason: RefreshError) -> Self {
        reason.code()
    }
}

impl TryFrom<u8> for RefreshError {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        RefreshError::from_code(code).ok_or_else(|| format!("unknown refresh error code {}", code))
    }
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RefreshError::None => "no error",
            RefreshError::WrongClient => "wrong client",
            RefreshError::ExpiredToken => "expired token",
            RefreshError::InvalidGrant => "invalid grant",
            RefreshError::NotInstalled => "application not installed",
            RefreshError::PaymentRequired => "payment required",
            RefreshError::DomainGone => "domain disabled or gone",
            RefreshError::Unknown => "unknown error",
        };
        f.write_str(text)
    }
}

/// Durable, refreshable credential of a tenant-user pairing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub id: u64,
    pub domain: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    pub auth_token_date: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub refresh_error: RefreshError,
    /// Secret is a webhook path (`{user_id}/{key}`) rather than an OAuth token
    #[serde(default)]
    pub webhook: bool,
}

fn default_active() -> bool {
    true
}

impl StoredCredential {
    pub fn new(
        id: u64,
        domain: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            id,
            domain: domain.into(),
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            auth_token_date: Utc::now(),
            is_active: true,
            refresh_error: RefreshError::None,
            webhook: false,
        }
    }

    pub fn webhook(id: u64, domain: impl Into<String>, hook: impl Into<String>) -> Self {
        Self {
            webhook: true,
            ..Self::new(id, domain, hook, "")
        }
    }

    /// Mark unusable and record the reason
    pub fn deactivate(&mut self, reason: RefreshError) {
        self.is_active = false;
        self.refresh_error = reason;
    }

    fn can_refresh(&self) -> bool {
        !self.webhook && !self.refresh_token.is_empty()
    }
}

/// Ephemeral bearer-only credential
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicCredential {
    pub domain: String,
    pub access_token: String,
    pub webhook: bool,
}

impl DynamicCredential {
    pub fn new(domain: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            access_token: access_token.into(),
            webhook: false,
        }
    }

    pub fn webhook(domain: impl Into<String>, hook: impl Into<String>) -> Self {
        Self {
            webhook: true,
            ..Self::new(domain, hook)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Credential {
    Stored(StoredCredential),
    Dynamic(DynamicCredential),
}

impl Credential {
    pub fn domain(&self) -> &str {
        match self {
            Credential::Stored(c) => &c.domain,
            Credential::Dynamic(c) => &c.domain,
        }
    }

    pub fn secret(&self) -> &str {
        match self {
            Credential::Stored(c) => &c.access_token,
            Credential::Dynamic(c) => &c.access_token,
        }
    }

    pub fn is_webhook(&self) -> bool {
        match self {
            Credential::Stored(c) => c.webhook,
            Credential::Dynamic(c) => c.webhook,
        }
    }

    /// Path segment carrying a webhook secret
    pub fn hook_key(&self) -> Option<&str> {
        self.is_webhook().then(|| self.secret())
    }

    /// Body parameters carrying an OAuth secret
    pub fn auth_param(&self) -> Option<(&'static str, &str)> {
        (!self.is_webhook()).then(|| (param_keys::AUTH, self.secret()))
    }
}

impl From<StoredCredential> for Credential {
    fn from(credential: StoredCredential) -> Self {
        Credential::Stored(credential)
    }
}

impl From<DynamicCredential> for Credential {
    fn from(credential: DynamicCredential) -> Self {
        Credential::Dynamic(credential)
    }
}

/// Durable storage of stored credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, id: u64) -> Result<Option<StoredCredential>>;
    async fn update(&self, credential: &StoredCredential) -> Result<()>;
    /// Every stored credential, in id order
    async fn all(&self) -> Result<Vec<StoredCredential>>;
}

/// In-memory [`CredentialStore`] for tests and short-lived tools
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    data: Mutex<BTreeMap<u64, StoredCredential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(credentials: impl IntoIterator<Item = StoredCredential>) -> Self {
        Self {
            data: Mutex::new(credentials.into_iter().map(|c| (c.id, c)).collect()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<u64, StoredCredential>>> {
        self.data
            .lock()
            .map_err(|_| Error::usage("credential store lock poisoned"))
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get(&self, id: u64) -> Result<Option<StoredCredential>> {
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn update(&self, credential: &StoredCredential) -> Result<()> {
        self.lock()?.insert(credential.id, credential.clone());
        Ok(())
    }

    async fn all(&self) -> Result<Vec<StoredCredential>> {
        Ok(self.lock()?.values().cloned().collect())
    }
}

/// Source of refresh timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Result of one refresh exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New token pair stored
    Refreshed,
    /// The exchange named an error; the credential was deactivated
    Rejected(RefreshError),
    /// No usable answer; the credential is untouched
    Unavailable,
}

impl RefreshOutcome {
    pub fn is_refreshed(self) -> bool {
        self == RefreshOutcome::Refreshed
    }
}

#[derive(Debug, Deserialize)]
struct TokenReply {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Performs the refresh exchange and persists its outcome
#[derive(Clone)]
pub struct TokenRefresher {
    oauth: Option<OAuthConfig>,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TokenRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRefresher")
            .field("client_id", &self.oauth.as_ref().map(|o| &o.client_id))
            .finish()
    }
}

impl TokenRefresher {
    pub fn new(
        oauth: Option<OAuthConfig>,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { oauth, store, clock }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    fn token_url(&self, oauth: &OAuthConfig, credential: &StoredCredential) -> String {
        let query = [
            ("grant_type", "refresh_token"),
            ("client_id", oauth.client_id.as_str()),
            ("client_secret", oauth.client_secret.as_str()),
            (param_keys::REFRESH_TOKEN, credential.refresh_token.as_str()),
        ]
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
        format!("{}?{}", oauth.token_url, query)
    }

    /// Exchange the refresh token for a new pair.
    ///
    /// Network trouble and 5xx answers leave the credential as it was.
    pub async fn refresh(
        &self,
        transport: &Transport,
        credential: &mut StoredCredential,
        timeout: Option<Duration>,
    ) -> Result<RefreshOutcome> {
        let logger = transport.logger();
        if !credential.can_refresh() {
            logger.token_refresh_failed(&credential.domain, "credential has no refresh token");
            return Ok(RefreshOutcome::Unavailable);
        }
        let Some(oauth) = self.oauth.as_ref() else {
            return Err(Error::usage("OAuth application keys are not configured"));
        };

        let url = self.token_url(oauth, credential);
        let response = match transport.get(&url, timeout).await {
            Ok(response) => response,
            Err(e) => {
                logger.token_refresh_failed(&credential.domain, &e.to_string());
                return Ok(RefreshOutcome::Unavailable);
            }
        };

        if response.status >= 500 {
            logger.token_refresh_failed(
                &credential.domain,
                &format!("status {}", response.status),
            );
            return Ok(RefreshOutcome::Unavailable);
        }

        let reply: TokenReply = match serde_json::from_str(&response.body) {
            Ok(reply) => reply,
            Err(_) => {
                if response.status >= 403 && response.body.contains("portal404") {
                    return self
                        .reject(logger, credential, RefreshError::DomainGone)
                        .await;
                }
                logger.token_refresh_failed(&credential.domain, "reply is not JSON");
                return Ok(RefreshOutcome::Unavailable);
            }
        };

        if let Some(error) = reply.error.as_deref().filter(|e| !e.is_empty()) {
            return self
                .reject(logger, credential, RefreshError::from_oauth_error(error))
                .await;
        }

        let (Some(access_token), Some(refresh_token)) = (reply.access_token, reply.refresh_token)
        else {
            logger.token_refresh_failed(&credential.domain, "reply carries no token pair");
            return Ok(RefreshOutcome::Unavailable);
        };

        credential.access_token = access_token;
        credential.refresh_token = refresh_token;
        credential.auth_token_date = self.clock.now();
        credential.is_active = true;
        credential.refresh_error = RefreshError::None;
        self.store.update(credential).await?;

        logger.token_refreshed(&credential.domain);
        Ok(RefreshOutcome::Refreshed)
    }

    async fn reject(
        &self,
        logger: &ApiLogger,
        credential: &mut StoredCredential,
        reason: RefreshError,
    ) -> Result<RefreshOutcome> {
        credential.deactivate(reason);
        self.store.update(credential).await?;
        logger.token_refresh_failed(&credential.domain, &reason.to_string());
        Ok(RefreshOutcome::Rejected(reason))
    }

    /// Refresh every stored OAuth credential, ignoring individual failures.
    ///
    /// Returns how many credentials were active before and after.
    pub async fn refresh_all(
        &self,
        transport: &Transport,
        timeout: Option<Duration>,
    ) -> Result<(usize, usize)> {
        let credentials: Vec<_> = self
            .store
            .all()
            .await?
            .into_iter()
            .filter(|c| !c.webhook)
            .collect();
        let active_before = credentials.iter().filter(|c| c.is_active).count();

        let mut active_after = 0;
        for mut credential in credentials {
            if self.refresh(transport, &mut credential, timeout).await?.is_refreshed() {
                active_after += 1;
            }
        }
        Ok((active_before, active_after))
    }
}
