//! The `Nexus` facade.
//!
//! Wires the tiered cache, the provider cascade and the consensus validator
//! from one [`NexusConfig`], sharing a single metrics collector.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{DurableStore, TieredCache};
use crate::cascade::{FilterRules, ProviderCascade};
use crate::config::NexusConfig;
use crate::consensus::ConsensusValidator;
use crate::errors::{NexusError, NexusResult};
use crate::observability::{DefaultMetricsCollector, MetricsCollector, MetricsSnapshot};
use crate::providers::ProviderDescriptor;

/// Entry point owning every resilience component.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use resilience_nexus::{Nexus, NexusConfig, ProviderConfig};
/// use resilience_nexus::cache::RestDurableStore;
/// use resilience_nexus::providers::PlainTextProvider;
/// use resilience_nexus::transport::HttpTransportImpl;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let text = PlainTextProvider::from_config("pollinations", &ProviderConfig::from_env("POLLINATIONS")?)?;
///     let store = RestDurableStore::new(Arc::new(HttpTransportImpl::new(
///         "https://store.example.com/cache",
///         Duration::from_secs(5),
///     )?));
///
///     let nexus = Nexus::builder()
///         .config(NexusConfig::from_env()?)
///         .provider(
///             text.into_descriptor()
///                 .models(["deepseek-r1", "llama-3.3-70b"])
///                 .permissive(true),
///         )
///         .durable_store(Arc::new(store))
///         .build()?;
///
///     let result = nexus.validator().validate("Assess the promise ...").await;
///     println!("score = {}", result.consensus_score());
///     Ok(())
/// }
/// ```
pub struct Nexus {
    config: NexusConfig,
    cache: Arc<TieredCache>,
    cascade: Arc<ProviderCascade>,
    validator: ConsensusValidator,
    metrics: Arc<dyn MetricsCollector>,
}

impl Nexus {
    /// Creates a new builder.
    pub fn builder() -> NexusBuilder {
        NexusBuilder::new()
    }

    /// Returns the tiered cache.
    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    /// Returns the provider cascade.
    pub fn cascade(&self) -> &Arc<ProviderCascade> {
        &self.cascade
    }

    /// Returns the consensus validator.
    pub fn validator(&self) -> &ConsensusValidator {
        &self.validator
    }

    /// Returns the configuration.
    pub fn config(&self) -> &NexusConfig {
        &self.config
    }

    /// Returns current metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Answers `prompt` as JSON through the cache: a cached value under
    /// `key` is returned as is; otherwise the cascade is asked and the parsed
    /// answer stored for `ttl` (the configured default when `None`).
    pub async fn cached_chat_json<T>(&self, key: &str, ttl: Option<Duration>, prompt: &str) -> NexusResult<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let ttl = ttl.unwrap_or(self.config.cache.default_ttl);
        let cascade = &self.cascade;
        self.cache
            .get_or_set(key, ttl, || async move { cascade.chat_json::<T>(prompt).await })
            .await
    }
}

impl std::fmt::Debug for Nexus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nexus")
            .field("config", &self.config)
            .field("cascade", &self.cascade)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Nexus`].
#[derive(Default)]
pub struct NexusBuilder {
    config: NexusConfig,
    providers: Vec<ProviderDescriptor>,
    durable: Option<Arc<dyn DurableStore>>,
    metrics: Option<Arc<dyn MetricsCollector>>,
    rules: Option<FilterRules>,
}

impl NexusBuilder {
    /// Creates a builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    pub fn config(mut self, config: NexusConfig) -> Self {
        self.config = config;
        self
    }

    /// Appends a provider; providers are tried in the order added.
    pub fn provider(mut self, provider: ProviderDescriptor) -> Self {
        self.providers.push(provider);
        self
    }

    /// Appends several providers.
    pub fn providers(mut self, providers: impl IntoIterator<Item = ProviderDescriptor>) -> Self {
        self.providers.extend(providers);
        self
    }

    /// Sets the durable (L2) store.
    pub fn durable_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(store);
        self
    }

    /// Sets a shared metrics collector.
    pub fn metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replaces the refusal/softening rules.
    pub fn filter_rules(mut self, rules: FilterRules) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Builds the facade.
    pub fn build(self) -> NexusResult<Nexus> {
        let durable = self
            .durable
            .ok_or_else(|| NexusError::configuration("a durable store is required"))?;
        if self.providers.is_empty() {
            return Err(NexusError::configuration("at least one provider is required"));
        }
        if let Some(empty) = self.providers.iter().find(|p| p.model_list().is_empty()) {
            return Err(NexusError::configuration(format!(
                "provider '{}' has no models",
                empty.name()
            )));
        }

        let metrics: Arc<dyn MetricsCollector> = self
            .metrics
            .unwrap_or_else(|| Arc::new(DefaultMetricsCollector::new()));
        let config = self.config;

        let cache = TieredCache::new(config.cache.clone(), config.store_breaker.clone(), durable)
            .with_metrics(metrics.clone());

        let mut cascade = ProviderCascade::new(self.providers, config.cascade.clone(), config.provider_breaker.clone())
            .with_metrics(metrics.clone());
        if let Some(rules) = self.rules {
            cascade = cascade.with_rules(rules);
        }
        let cascade = Arc::new(cascade);

        let validator = ConsensusValidator::new(cascade.clone(), config.consensus).with_metrics(metrics.clone());

        tracing::info!(
            providers = cascade.providers().len(),
            cache_dir = %config.cache.local_dir.display(),
            "Resilience core initialised"
        );

        Ok(Nexus {
            config,
            cache: Arc::new(cache),
            cascade,
            validator,
            metrics,
        })
    }
}
