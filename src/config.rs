use crate::services::{
    filter::FilterMode,
    rate_limiter::RateLimitConfig,
    retry::RetryPolicy,
    upstream_service::{DEFAULT_API_BASE_URL, UpstreamSettings},
};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub api_base_url: String,
    pub filter_mode: FilterMode,
    pub page_size: usize,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub rate_window: Duration,
    pub rate_per_ip: u32,
    pub rate_per_key: u32,
    pub rate_max_keys_per_ip: usize,
    pub rate_max_entries: usize,
    /// Hard maximum for the `limit` query parameter.
    pub max_results: usize,
    /// Take the client address from `X-Forwarded-For` (behind a proxy only).
    pub trust_forwarded_for: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            api_base_url: DEFAULT_API_BASE_URL.into(),
            filter_mode: FilterMode::Terms,
            page_size: 1000,
            request_timeout: Duration::from_secs(15),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(250),
            retry_max_delay: Duration::from_millis(4000),
            cache_ttl: Duration::from_secs(30),
            cache_max_entries: 1024,
            rate_window: Duration::from_secs(60),
            rate_per_ip: 120,
            rate_per_key: 60,
            rate_max_keys_per_ip: 3,
            rate_max_entries: 10_000,
            max_results: 2000,
            trust_forwarded_for: false,
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Apache-style directory listing for a cloud download account")]
pub struct Args {
    /// Host to bind to (overrides BOXDIR_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BOXDIR_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Upstream API root (overrides BOXDIR_API_BASE_URL)
    #[arg(long)]
    pub api_base_url: Option<String>,

    /// Filter strategy (overrides BOXDIR_FILTER_MODE)
    #[arg(long, value_enum)]
    pub filter_mode: Option<FilterMode>,

    /// Seconds to cache upstream listings, 0 disables (overrides BOXDIR_CACHE_TTL_SECS)
    #[arg(long)]
    pub cache_ttl_secs: Option<u64>,

    /// Hard maximum for the `limit` query parameter (overrides BOXDIR_MAX_RESULTS)
    #[arg(long)]
    pub max_results: Option<usize>,

    /// Trust X-Forwarded-For for client addresses (overrides BOXDIR_TRUST_FORWARDED_FOR)
    #[arg(long)]
    pub trust_forwarded_for: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_sources(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge `args` over the variables `lookup` resolves over the defaults.
    pub fn from_sources(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        // --- Environment fallback ---
        let env_mode = match lookup("BOXDIR_FILTER_MODE") {
            Some(value) => parse_filter_mode(&value)?,
            None => defaults.filter_mode,
        };
        let env_ttl = env_or(&lookup, "BOXDIR_CACHE_TTL_SECS", defaults.cache_ttl.as_secs())?;
        let env_trust = env_or(&lookup, "BOXDIR_TRUST_FORWARDED_FOR", false)?;

        // --- Merge ---
        let cfg = Self {
            host: args
                .host
                .or_else(|| lookup("BOXDIR_HOST"))
                .unwrap_or(defaults.host),
            port: match args.port {
                Some(port) => port,
                None => env_or(&lookup, "BOXDIR_PORT", defaults.port)?,
            },
            api_base_url: args
                .api_base_url
                .or_else(|| lookup("BOXDIR_API_BASE_URL"))
                .unwrap_or(defaults.api_base_url),
            filter_mode: args.filter_mode.unwrap_or(env_mode),
            page_size: env_or(&lookup, "BOXDIR_PAGE_SIZE", defaults.page_size)?.max(1),
            request_timeout: Duration::from_secs(env_or(
                &lookup,
                "BOXDIR_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            max_retries: env_or(&lookup, "BOXDIR_MAX_RETRIES", defaults.max_retries)?,
            retry_base_delay: Duration::from_millis(env_or(
                &lookup,
                "BOXDIR_RETRY_BASE_DELAY_MS",
                millis(defaults.retry_base_delay),
            )?),
            retry_max_delay: Duration::from_millis(env_or(
                &lookup,
                "BOXDIR_RETRY_MAX_DELAY_MS",
                millis(defaults.retry_max_delay),
            )?),
            cache_ttl: Duration::from_secs(args.cache_ttl_secs.unwrap_or(env_ttl)),
            cache_max_entries: env_or(
                &lookup,
                "BOXDIR_CACHE_MAX_ENTRIES",
                defaults.cache_max_entries,
            )?
            .max(1),
            rate_window: Duration::from_secs(
                env_or(
                    &lookup,
                    "BOXDIR_RATE_WINDOW_SECS",
                    defaults.rate_window.as_secs(),
                )?
                .max(1),
            ),
            rate_per_ip: env_or(&lookup, "BOXDIR_RATE_PER_IP", defaults.rate_per_ip)?,
            rate_per_key: env_or(&lookup, "BOXDIR_RATE_PER_KEY", defaults.rate_per_key)?,
            rate_max_keys_per_ip: env_or(
                &lookup,
                "BOXDIR_RATE_MAX_KEYS_PER_IP",
                defaults.rate_max_keys_per_ip,
            )?,
            rate_max_entries: env_or(
                &lookup,
                "BOXDIR_RATE_MAX_ENTRIES",
                defaults.rate_max_entries,
            )?
            .max(1),
            max_results: match args.max_results {
                Some(max) => max,
                None => env_or(&lookup, "BOXDIR_MAX_RESULTS", defaults.max_results)?,
            }
            .max(1),
            trust_forwarded_for: args.trust_forwarded_for || env_trust,
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn upstream_settings(&self) -> UpstreamSettings {
        UpstreamSettings {
            base_url: self.api_base_url.clone(),
            page_size: self.page_size,
            attempt_timeout: self.request_timeout,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: self.retry_base_delay,
                max_delay: self.retry_max_delay,
                ..RetryPolicy::default()
            },
            ..UpstreamSettings::default()
        }
    }

    pub fn rate_limits(&self) -> RateLimitConfig {
        RateLimitConfig {
            window: self.rate_window,
            per_ip: self.rate_per_ip,
            per_key: self.rate_per_key,
            max_keys_per_ip: self.rate_max_keys_per_ip,
            max_entries: self.rate_max_entries,
        }
    }
}

fn env_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(default),
    }
}

fn parse_filter_mode(value: &str) -> Result<FilterMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "pattern" | "regex" => Ok(FilterMode::Pattern),
        "terms" | "extensions" => Ok(FilterMode::Terms),
        other => anyhow::bail!("parsing BOXDIR_FILTER_MODE value `{}`", other),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
