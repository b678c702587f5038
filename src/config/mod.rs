//! Configuration module for the resilience core.
//!
//! `NexusConfig` gathers the breaker, cache, cascade and consensus settings
//! and can be built in code or read from `NEXUS_*` environment variables.
//! `ProviderConfig` holds the endpoint and credentials of one AI provider.

use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::cache::CacheConfig;
use crate::cascade::CascadeConfig;
use crate::consensus::ConsensusConfig;
use crate::errors::{NexusError, NexusResult};
use crate::providers::DEFAULT_PROVIDER_TIMEOUT;
use crate::resilience::CircuitBreakerConfig;

/// Configuration for every component of the core.
#[derive(Debug, Clone, Default)]
pub struct NexusConfig {
    /// Settings of the `"durable-store"` breaker.
    pub store_breaker: CircuitBreakerConfig,
    /// Settings of each `"provider:<name>"` breaker. Provider deadlines come
    /// from the descriptors, not from this config.
    pub provider_breaker: CircuitBreakerConfig,
    /// Tiered cache settings.
    pub cache: CacheConfig,
    /// Provider cascade settings.
    pub cascade: CascadeConfig,
    /// Consensus settings.
    pub consensus: ConsensusConfig,
}

impl NexusConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> NexusConfigBuilder {
        NexusConfigBuilder::new()
    }

    /// Creates a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `NEXUS_BREAKER_FAILURE_THRESHOLD` (default 5)
    /// - `NEXUS_BREAKER_COOLDOWN_SECS` (default 30)
    /// - `NEXUS_L1_MAX_ENTRIES` (default 500)
    /// - `NEXUS_L1_REFRESH_SECS` (default 600)
    /// - `NEXUS_DEFAULT_TTL_SECS` (default 3600)
    /// - `NEXUS_CACHE_DIR` (default `<tmp>/nexus_cache`)
    /// - `NEXUS_MIN_INTERVAL_MS` (default 1500)
    /// - `NEXUS_MAX_RETRIES` (default 2)
    /// - `NEXUS_CONSENSUS_THRESHOLD` (default 80)
    ///
    /// Unset variables keep their default; unparsable values are an error.
    pub fn from_env() -> NexusResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> NexusResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = NexusConfigBuilder::new();

        if let Some(v) = parse_var::<u32, _>(&lookup, "NEXUS_BREAKER_FAILURE_THRESHOLD")? {
            builder = builder.failure_threshold(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "NEXUS_BREAKER_COOLDOWN_SECS")? {
            builder = builder.cooldown(Duration::from_secs(v));
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "NEXUS_L1_MAX_ENTRIES")? {
            builder = builder.max_l1_entries(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "NEXUS_L1_REFRESH_SECS")? {
            builder = builder.l1_refresh(Duration::from_secs(v));
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "NEXUS_DEFAULT_TTL_SECS")? {
            builder = builder.default_ttl(Duration::from_secs(v));
        }
        if let Some(dir) = lookup("NEXUS_CACHE_DIR").filter(|d| !d.trim().is_empty()) {
            builder = builder.cache_dir(dir);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "NEXUS_MIN_INTERVAL_MS")? {
            builder = builder.min_interval(Duration::from_millis(v));
        }
        if let Some(v) = parse_var::<u32, _>(&lookup, "NEXUS_MAX_RETRIES")? {
            builder = builder.max_retries(v);
        }
        if let Some(v) = parse_var::<u8, _>(&lookup, "NEXUS_CONSENSUS_THRESHOLD")? {
            builder = builder.consensus_threshold(v);
        }

        builder.build()
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> NexusResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            NexusError::configuration(format!("{} has invalid value '{}': {}", name, raw, e))
        }),
    }
}

/// Builder for `NexusConfig`.
#[derive(Debug, Default)]
pub struct NexusConfigBuilder {
    config: NexusConfig,
}

impl NexusConfigBuilder {
    /// Creates a builder holding the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the consecutive failures that open a breaker.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.store_breaker.failure_threshold = threshold;
        self.config.provider_breaker.failure_threshold = threshold;
        self
    }

    /// Sets how long a breaker stays open before probing.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.store_breaker.cooldown = cooldown;
        self.config.provider_breaker.cooldown = cooldown;
        self
    }

    /// Sets the durable-store call deadline. Provider breakers are not affected.
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store_breaker.call_timeout = Some(timeout);
        self
    }

    /// Sets the L1 capacity.
    pub fn max_l1_entries(mut self, max: usize) -> Self {
        self.config.cache.max_l1_entries = max;
        self
    }

    /// Sets the L1 refresh window.
    pub fn l1_refresh(mut self, window: Duration) -> Self {
        self.config.cache.l1_refresh = window;
        self
    }

    /// Sets the default cache TTL.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache.default_ttl = ttl;
        self
    }

    /// Sets the local-tier directory.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache.local_dir = dir.into();
        self
    }

    /// Sets the minimum spacing between provider calls.
    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.config.cascade.min_interval = interval;
        self
    }

    /// Sets invocations per (provider, model) pair.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.cascade.retry.max_retries = max_retries;
        self
    }

    /// Sets the score below which the judge is called.
    pub fn consensus_threshold(mut self, threshold: u8) -> Self {
        self.config.consensus.threshold = threshold;
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> NexusResult<NexusConfig> {
        let config = self.config;

        if config.store_breaker.failure_threshold == 0 || config.provider_breaker.failure_threshold == 0 {
            return Err(NexusError::configuration("failure threshold must be at least 1"));
        }
        if config.cache.max_l1_entries == 0 {
            return Err(NexusError::configuration("L1 capacity must be at least 1"));
        }
        if config.cache.default_ttl.is_zero() {
            return Err(NexusError::configuration("default TTL must be non-zero"));
        }
        if config.cascade.retry.max_retries == 0 {
            return Err(NexusError::configuration("max retries must be at least 1"));
        }
        if config.consensus.threshold > 100 {
            return Err(NexusError::configuration(format!(
                "consensus threshold {} exceeds 100",
                config.consensus.threshold
            )));
        }

        Ok(config)
    }
}

/// Endpoint and credentials of one AI provider.
#[derive(Clone)]
pub struct ProviderConfig {
    /// API key, if the endpoint needs one.
    pub(crate) api_key: Option<SecretString>,
    /// Base URL; handler paths are joined onto it.
    pub base_url: Url,
    /// Transport-level request timeout.
    pub timeout: Duration,
}

impl ProviderConfig {
    /// Creates a configuration for `base_url` (must be http or https).
    pub fn new(base_url: &str) -> NexusResult<Self> {
        let base_url = Url::parse(base_url)?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(NexusError::configuration(format!(
                "unsupported URL scheme '{}'",
                base_url.scheme()
            )));
        }
        Ok(Self {
            api_key: None,
            base_url,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        })
    }

    /// Reads `<PREFIX>_BASE_URL` (required) and `<PREFIX>_API_KEY` (optional).
    pub fn from_env(prefix: &str) -> NexusResult<Self> {
        Self::from_lookup(prefix, |name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(prefix: &str, lookup: F) -> NexusResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url_var = format!("{}_BASE_URL", prefix);
        let base_url = lookup(&url_var).ok_or_else(|| {
            NexusError::configuration(format!("{} environment variable not set", url_var))
        })?;

        let mut config = Self::new(&base_url)?;
        if let Some(key) = lookup(&format!("{}_API_KEY", prefix)).filter(|k| !k.is_empty()) {
            config = config.api_key(key);
        }
        Ok(config)
    }

    /// Sets the API key.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::new(api_key.into()));
        self
    }

    /// Sets the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the API key hint (last 4 characters) for debugging.
    pub fn api_key_hint(&self) -> Option<String> {
        self.api_key.as_ref().map(|key| {
            let key = key.expose_secret();
            if key.len() > 4 {
                format!("...{}", &key[key.len() - 4..])
            } else {
                "****".to_string()
            }
        })
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = NexusConfig::builder().build().unwrap();

        assert_eq!(config.store_breaker.failure_threshold, 5);
        assert_eq!(config.store_breaker.cooldown, Duration::from_secs(30));
        assert_eq!(config.provider_breaker.failure_threshold, 5);
        assert!(config.provider_breaker.call_timeout.is_none());
        assert_eq!(config.cache.max_l1_entries, 500);
        assert_eq!(config.cache.l1_refresh, Duration::from_secs(600));
        assert_eq!(config.cache.default_ttl, Duration::from_secs(3600));
        assert_eq!(config.cascade.min_interval, Duration::from_millis(1500));
        assert_eq!(config.cascade.retry.max_retries, 2);
        assert_eq!(config.consensus.threshold, 80);
    }

    #[test]
    fn test_store_timeout_only_applies_to_the_store_breaker() {
        let config = NexusConfig::builder()
            .store_timeout(Duration::from_secs(2))
            .build()
            .unwrap();

        assert_eq!(config.store_breaker.call_timeout, Some(Duration::from_secs(2)));
        assert!(config.provider_breaker.call_timeout.is_none());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = NexusConfig::from_lookup(lookup(&[
            ("NEXUS_BREAKER_FAILURE_THRESHOLD", "3"),
            ("NEXUS_L1_MAX_ENTRIES", "10"),
            ("NEXUS_CACHE_DIR", "/var/cache/nexus"),
            ("NEXUS_MIN_INTERVAL_MS", "0"),
            ("NEXUS_CONSENSUS_THRESHOLD", "90"),
        ]))
        .unwrap();

        assert_eq!(config.store_breaker.failure_threshold, 3);
        assert_eq!(config.provider_breaker.failure_threshold, 3);
        assert_eq!(config.cache.max_l1_entries, 10);
        assert_eq!(config.cache.local_dir, PathBuf::from("/var/cache/nexus"));
        assert_eq!(config.cascade.min_interval, Duration::ZERO);
        assert_eq!(config.consensus.threshold, 90);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = NexusConfig::from_lookup(lookup(&[("NEXUS_MAX_RETRIES", "lots")])).unwrap_err();
        assert!(err.to_string().contains("NEXUS_MAX_RETRIES"));
    }

    #[test]
    fn test_build_validation() {
        assert!(NexusConfig::builder().failure_threshold(0).build().is_err());
        assert!(NexusConfig::builder().max_l1_entries(0).build().is_err());
        assert!(NexusConfig::builder().max_retries(0).build().is_err());
        assert!(NexusConfig::builder().consensus_threshold(101).build().is_err());
        assert!(NexusConfig::builder().consensus_threshold(100).build().is_ok());
    }

    #[test]
    fn test_provider_from_lookup() {
        let config = ProviderConfig::from_lookup(
            "POLLINATIONS",
            lookup(&[
                ("POLLINATIONS_BASE_URL", "https://text.example.ai/"),
                ("POLLINATIONS_API_KEY", "sk-secret-12345"),
            ]),
        )
        .unwrap();

        assert_eq!(config.base_url.as_str(), "https://text.example.ai/");
        assert_eq!(config.api_key_hint().as_deref(), Some("...2345"));
    }

    #[test]
    fn test_provider_requires_base_url() {
        assert!(ProviderConfig::from_lookup("MISSING", lookup(&[])).is_err());
    }

    #[test]
    fn test_provider_rejects_bad_urls() {
        assert!(ProviderConfig::new("not a url").is_err());
        assert!(ProviderConfig::new("ftp://files.example.com").is_err());
    }

    #[test]
    fn test_provider_debug_redacts_api_key() {
        let config = ProviderConfig::new("https://api.example.com")
            .unwrap()
            .api_key("sk-very-secret");

        let debug_str = format!("{:?}", config);
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("sk-very-secret"));
    }
}
