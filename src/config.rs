use anyhow::{Context, Result};
use b24_client::api::{
    BodyFormat, ClientConfig, Credential, DynamicCredential, OAuthConfig, RetryConfig,
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Portal host, e.g. `acme.bitrix24.ru`
    pub domain: Option<String>,
    /// Access token, or `{user_id}/{key}` for a webhook
    pub token: Option<String>,
    #[serde(default)]
    pub webhook: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries_on_503")]
    pub retries_on_503: u32,
    #[serde(default)]
    pub json_body: bool,
    #[serde(default = "default_true")]
    pub throttle_on_operating: bool,
    #[serde(default = "default_max_duplicates")]
    pub max_duplicates: usize,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_retries_on_503() -> u32 {
    RetryConfig::default().retries_on_503
}

fn default_true() -> bool {
    true
}

fn default_max_duplicates() -> usize {
    2
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retries_on_503: default_retries_on_503(),
            json_body: false,
            throttle_on_operating: true,
            max_duplicates: default_max_duplicates(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub portal: PortalConfig,
    pub oauth: Option<OAuthSettings>,
    #[serde(default)]
    pub client: ClientSettings,
}

impl Config {
    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("b24-client");
        Ok(config_dir.join("config.toml"))
    }

    /// Load the config file, if any, then apply `.env` and environment overrides
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        debug!("Loading config from: {:?}", config_path);

        let mut config = if config_path.exists() {
            let config_content = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
            Self::parse(&config_content)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?
        } else {
            info!("Config file doesn't exist, using defaults");
            Self::default()
        };

        if let Ok(path) = dotenvy::dotenv() {
            debug!("Loaded environment from: {:?}", path);
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Override settings from `B24_*` variables
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(domain) = lookup("B24_DOMAIN") {
            self.portal.domain = Some(domain);
        }
        if let Some(hook) = lookup("B24_WEBHOOK") {
            self.portal.token = Some(hook);
            self.portal.webhook = true;
        } else if let Some(token) = lookup("B24_TOKEN") {
            self.portal.token = Some(token);
            self.portal.webhook = false;
        }
        if let (Some(client_id), Some(client_secret)) =
            (lookup("B24_CLIENT_ID"), lookup("B24_CLIENT_SECRET"))
        {
            let token_url = self.oauth.as_ref().and_then(|o| o.token_url.clone());
            self.oauth = Some(OAuthSettings {
                client_id,
                client_secret,
                token_url,
            });
        }
        if let Some(timeout) = lookup("B24_TIMEOUT") {
            self.client.timeout_secs = timeout
                .trim()
                .parse()
                .with_context(|| format!("B24_TIMEOUT is not a number of seconds: {}", timeout))?;
        }
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        let mut builder = ClientConfig::builder()
            .timeout(Duration::from_secs(self.client.timeout_secs))
            .retries_on_503(self.client.retries_on_503)
            .throttle_on_operating(self.client.throttle_on_operating)
            .max_duplicates(self.client.max_duplicates)
            .body_format(if self.client.json_body {
                BodyFormat::Json
            } else {
                BodyFormat::Form
            });
        if let Some(oauth) = &self.oauth {
            let mut config = OAuthConfig::new(&oauth.client_id, &oauth.client_secret);
            if let Some(url) = &oauth.token_url {
                config.token_url = url.clone();
            }
            builder = builder.oauth(config);
        }
        builder.build()
    }

    /// Credential for the configured portal
    pub fn credential(&self) -> Result<Credential> {
        let domain = self
            .portal
            .domain
            .clone()
            .context("No portal domain configured. Set B24_DOMAIN or [portal] domain.")?;
        let token = self
            .portal
            .token
            .clone()
            .context("No token configured. Set B24_TOKEN or B24_WEBHOOK.")?;
        let credential = if self.portal.webhook {
            DynamicCredential::webhook(domain, token)
        } else {
            DynamicCredential::new(domain, token)
        };
        Ok(credential.into())
    }
}
