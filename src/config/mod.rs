//! Configuration management for Tollgate
//!
//! Configuration is loaded once and handed to each component at
//! construction. Components never look settings up by string path.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, Error, Result};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Cache directory override (defaults to the XDG cache dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Accept plain bodies found in compressed tables, e.g. rows written
    /// before a client switched compression on
    #[serde(default)]
    pub legacy_plain_reads: bool,

    /// Configured API clients, keyed by client name
    #[serde(default)]
    pub clients: BTreeMap<String, ClientConfig>,
}

/// Settings for one upstream API client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL, without the version segment
    pub base_url: String,

    /// Protocol version, inserted between base URL and endpoint
    #[serde(default)]
    pub version: String,

    /// Which provider capability set to use
    #[serde(default)]
    pub provider: ProviderKind,

    /// How credentials are attached to requests
    #[serde(default)]
    pub auth: AuthStyle,

    /// API key / token used by header, bearer and query auth
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Whether successful responses are persisted at all
    #[serde(default = "default_true")]
    pub cacheable: bool,

    /// Whether response bodies are stored gzip-compressed
    #[serde(default)]
    pub compress: bool,

    /// Outbound request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,
}

/// Provider capability set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Plain JSON API; any 2xx JSON response is cacheable
    #[default]
    Generic,
    /// Batched task API (status_code / tasks_count / tasks_error envelope)
    TaskBatch,
}

/// Credential placement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthStyle {
    #[default]
    None,
    /// `Authorization: Bearer <api_key>`
    Bearer,
    /// `<name>: <api_key>`
    Header { name: String },
    /// `?<param>=<api_key>`
    Query { param: String },
    /// HTTP basic auth
    Basic { login: String, password: String },
}

/// Attempts allowed per decay window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_decay_minutes")]
    pub decay_minutes: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.decay_minutes.saturating_mul(60))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            decay_minutes: default_decay_minutes(),
        }
    }
}

/// Webhook receiver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Allowed source addresses; empty accepts any source
    #[serde(default)]
    pub ip_whitelist: Vec<IpAddr>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub postback_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pingback_url: Option<String>,

    /// Provider's top-level success code
    #[serde(default = "default_success_code")]
    pub success_code: i64,

    /// HTTP method used when deriving keys for task results
    #[serde(default = "default_result_method")]
    pub result_method: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            ip_whitelist: Vec::new(),
            postback_url: None,
            pingback_url: None,
            success_code: default_success_code(),
            result_method: default_result_method(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_attempts() -> u32 {
    1000
}

fn default_decay_minutes() -> u64 {
    1
}

/// Longest accepted decay window (366 days)
const MAX_DECAY_MINUTES: u64 = 366 * 24 * 60;

fn default_success_code() -> i64 {
    20000
}

fn default_result_method() -> String {
    "POST".to_string()
}

impl ClientConfig {
    /// Minimal client config pointing at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            version: String::new(),
            provider: ProviderKind::default(),
            auth: AuthStyle::default(),
            api_key: None,
            cacheable: true,
            compress: false,
            timeout_secs: default_timeout_secs(),
            rate_limit: RateLimitConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::Invalid(
            "Could not determine home directory".to_string(),
        ))?;

        Ok(home.join(".tollgate").join("config.yaml"))
    }

    /// Load configuration from an explicit path, or the default one
    pub fn load_at(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from(PathBuf::from(p)),
            None => Self::load_from(Self::default_path()?),
        }
    }

    /// Like [`Config::load_at`], but a missing file yields an empty config
    pub fn load_or_default(path: Option<&str>) -> Result<Self> {
        match Self::load_at(path) {
            Err(Error::Config(ConfigError::NotFound)) => Ok(Self::default()),
            other => other,
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound.into());
        }

        let contents = std::fs::read_to_string(&path)?;
        let config: Config = serde_yaml::from_str(&contents).map_err(ConfigError::from)?;
        config.validate()?;

        Ok(config)
    }

    /// Look up a client by name
    pub fn client(&self, name: &str) -> Result<&ClientConfig> {
        self.clients
            .get(name)
            .ok_or_else(|| ConfigError::UnknownClient(name.to_string()).into())
    }

    /// Reject settings no component can work with
    pub fn validate(&self) -> Result<()> {
        for (name, client) in &self.clients {
            if client.base_url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("client '{name}' has no base_url")).into());
            }
            if client.rate_limit.attempts == 0 {
                return Err(ConfigError::Invalid(format!(
                    "client '{name}' allows zero attempts per window"
                ))
                .into());
            }
            if client.rate_limit.decay_minutes == 0 {
                return Err(ConfigError::Invalid(format!(
                    "client '{name}' has a zero-length rate limit window"
                ))
                .into());
            }
            if client.rate_limit.decay_minutes > MAX_DECAY_MINUTES {
                return Err(ConfigError::Invalid(format!(
                    "client '{name}' has a rate limit window over {MAX_DECAY_MINUTES} minutes"
                ))
                .into());
            }
        }
        Ok(())
    }
}
