use crate::config::AppConfig;
use crate::services::{
    rate_limiter::RateLimiter,
    upstream_service::{UpstreamCache, UpstreamClient},
};
use std::sync::Arc;

/// Shared per-process state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub upstream: UpstreamClient,
    pub limiter: Arc<RateLimiter>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Wire the upstream client, its in-memory cache and the rate limiter.
    pub fn from_config(config: AppConfig) -> reqwest::Result<Self> {
        let cache = UpstreamCache::in_memory(config.cache_ttl, config.cache_max_entries);
        let upstream = UpstreamClient::new(config.upstream_settings(), Some(cache))?;
        Ok(Self {
            upstream,
            limiter: Arc::new(RateLimiter::new(config.rate_limits())),
            config: Arc::new(config),
        })
    }
}
