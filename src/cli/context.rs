//! Command execution context
//!
//! Loads configuration once and opens the shared cache and quota state that
//! request and webhook commands work against.

use std::sync::Arc;

use crate::cache::CacheManager;
use crate::cli::{GlobalOptions, OutputFormat};
use crate::client::{ProviderThrottle, RateLimitService, RequestClient};
use crate::config::Config;
use crate::error::Result;
use crate::webhook::WebhookBridge;

/// Shared state for one command invocation.
pub struct CommandContext {
    pub config: Config,
    pub format: OutputFormat,
    pub cache: Arc<CacheManager>,
    /// Quota counters, stored next to the cache so processes share them
    pub limiter: Arc<RateLimitService>,
    pub throttle: Arc<ProviderThrottle>,
}

impl CommandContext {
    /// Load config (an absent file means no clients) and open the cache.
    pub fn new(opts: &GlobalOptions) -> Result<Self> {
        let config = Config::load_or_default(opts.config_ref())?;
        let cache = Arc::new(CacheManager::open(&config)?);
        let limiter = Arc::new(RateLimitService::shared(cache.db_path(), &config)?);
        let throttle = Arc::new(ProviderThrottle::new(&config));

        Ok(Self {
            config,
            format: opts.format,
            cache,
            limiter,
            throttle,
        })
    }

    /// Request client for a configured client
    pub fn client(&self, name: &str) -> Result<RequestClient> {
        RequestClient::from_config(
            name,
            &self.config,
            self.cache.clone(),
            self.limiter.clone(),
            self.throttle.clone(),
        )
    }

    /// Webhook bridge for a configured client
    pub fn bridge(&self, name: &str) -> Result<WebhookBridge> {
        let client = self.config.client(name)?;
        Ok(WebhookBridge::new(name, client, self.cache.clone()))
    }
}
