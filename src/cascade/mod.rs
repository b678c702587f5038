//! Ordered provider/model cascade.
//!
//! Each call walks the providers in order and, for each provider, its models
//! in order, invoking each pair up to `max_retries` times. Every invocation
//! first takes a slot from the shared [`Throttle`] and runs under the
//! provider's deadline inside the provider's circuit breaker. The first
//! acceptable answer wins; when nothing is left the call returns a degraded
//! [`ChatResponse`] instead of an error.

mod filter;
mod json;

pub use filter::{FilterAction, FilterRule, FilterRules, REFUSAL_SCAN_CHARS};
pub use json::{extract_object, extract_value, parse_answer};

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::instrument;
use uuid::Uuid;

use crate::errors::{NexusError, NexusResult};
use crate::observability::{default_metrics, preview, MetricsCollector};
use crate::providers::ProviderDescriptor;
use crate::resilience::{BackoffPolicy, CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig, Throttle};

/// Provider name reported when every provider failed.
pub const DEGRADED_PROVIDER: &str = "none";

/// Instruction appended to prompts sent through `chat_json`.
pub const JSON_INSTRUCTION: &str =
    "Respond with the JSON object only, without explanations or markdown code fences.";

/// Cascade configuration.
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    /// Invocations per pair and backoff timings.
    pub retry: RetryConfig,
    /// Minimum spacing between any two provider calls.
    pub min_interval: Duration,
    /// Answers shorter than this (in characters, trimmed) are failures.
    pub min_content_chars: usize,
    /// Characters of the prompt included in log events.
    pub prompt_preview_chars: usize,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            min_interval: Duration::from_millis(1500),
            min_content_chars: 10,
            prompt_preview_chars: 120,
        }
    }
}

impl CascadeConfig {
    /// Creates a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry settings.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the throttle interval.
    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Sets the minimum accepted answer length.
    pub fn min_content_chars(mut self, chars: usize) -> Self {
        self.min_content_chars = chars;
        self
    }
}

/// How one invocation was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptOutcome {
    /// Acceptable answer.
    Success,
    /// The provider refused to answer.
    Filtered,
    /// HTTP 429.
    RateLimited,
    /// Credentials rejected.
    AuthError,
    /// Timeout, network, server error or an empty answer.
    TransientError,
}

/// Record of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeAttempt {
    /// Provider name.
    pub provider: String,
    /// Model name.
    pub model: String,
    /// 1-based invocation number on this pair.
    pub attempt_number: u32,
    /// Classification.
    pub outcome: AttemptOutcome,
    /// Time spent in the invocation (excluding throttle and backoff).
    pub elapsed: Duration,
    /// Whether the softened prompt was sent.
    pub reformulated: bool,
    /// Failure description.
    pub error: Option<String>,
}

/// Result of a cascade call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatResponse {
    /// Answer text; empty when degraded.
    pub content: String,
    /// Provider that answered, or [`DEGRADED_PROVIDER`].
    pub provider: String,
    /// Model that answered; empty when degraded.
    pub model: String,
    /// Every invocation made, in order.
    pub attempts: Vec<CascadeAttempt>,
    /// Last failure seen, if any.
    pub last_error: Option<String>,
}

impl ChatResponse {
    /// True when no provider produced an answer.
    pub fn is_degraded(&self) -> bool {
        self.provider == DEGRADED_PROVIDER
    }

    /// `"provider/model"` label.
    pub fn label(&self) -> String {
        if self.is_degraded() {
            DEGRADED_PROVIDER.to_string()
        } else {
            format!("{}/{}", self.provider, self.model)
        }
    }
}

enum Next {
    Retry(Duration),
    NextModel,
    NextProvider,
}

/// The provider cascade.
pub struct ProviderCascade {
    providers: Vec<ProviderDescriptor>,
    breakers: Vec<CircuitBreaker>,
    throttle: Arc<Throttle>,
    backoff: BackoffPolicy,
    rules: FilterRules,
    config: CascadeConfig,
    metrics: Arc<dyn MetricsCollector>,
}

impl ProviderCascade {
    /// Creates a cascade over `providers`, in order. Each provider gets its
    /// own `"provider:<name>"` breaker built from `breaker_config`.
    pub fn new(
        providers: Vec<ProviderDescriptor>,
        config: CascadeConfig,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        let breakers = providers
            .iter()
            .map(|p| CircuitBreaker::new(format!("provider:{}", p.name()), breaker_config.clone()))
            .collect();

        Self {
            breakers,
            throttle: Arc::new(Throttle::new(config.min_interval)),
            backoff: BackoffPolicy::new(config.retry.clone()),
            rules: FilterRules::default(),
            providers,
            config,
            metrics: default_metrics(),
        }
    }

    /// Replaces the refusal/softening rules.
    pub fn with_rules(mut self, rules: FilterRules) -> Self {
        self.rules = rules;
        self
    }

    /// Shares a throttle with other components issuing provider calls.
    pub fn with_throttle(mut self, throttle: Arc<Throttle>) -> Self {
        self.throttle = throttle;
        self
    }

    /// Records attempts and breaker transitions in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.breakers = self
            .breakers
            .into_iter()
            .map(|b| b.with_metrics(metrics.clone()))
            .collect();
        self.metrics = metrics;
        self
    }

    /// Providers in cascade order.
    pub fn providers(&self) -> &[ProviderDescriptor] {
        &self.providers
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    /// Status of the named provider's breaker.
    pub async fn provider_state(&self, name: &str) -> Option<CircuitState> {
        let idx = self.providers.iter().position(|p| p.name() == name)?;
        Some(self.breakers[idx].state().await)
    }

    /// Sends `prompt` through the cascade. Never fails; check
    /// [`ChatResponse::is_degraded`].
    #[instrument(skip(self, prompt), fields(invocation = %Uuid::new_v4()))]
    pub async fn chat(&self, prompt: &str) -> ChatResponse {
        tracing::info!(
            prompt = %preview(prompt, self.config.prompt_preview_chars),
            providers = self.providers.len(),
            "Starting provider cascade"
        );

        let softened = self.rules.soften(prompt);
        let max_retries = self.config.retry.max_retries.max(1);
        let mut attempts = Vec::new();
        let mut last_error: Option<String> = None;
        let mut reformulate = false;

        'providers: for (provider, breaker) in self.providers.iter().zip(&self.breakers) {
            if breaker.state().await == CircuitState::Open {
                tracing::warn!(provider = provider.name(), "Circuit open, skipping provider");
                last_error = Some(NexusError::CircuitOpen { resource: breaker.name().to_string() }.to_string());
                continue;
            }

            let mut rate_limited = 0u32;

            for model in provider.model_list() {
                for attempt in 1..=max_retries {
                    let reformulated = reformulate && provider.is_permissive();
                    let text = if reformulated { softened.as_str() } else { prompt };

                    self.throttle.acquire().await;
                    tracing::debug!(provider = provider.name(), model = %model, attempt, reformulated, "Invoking provider");

                    let started = Instant::now();
                    let result = self.invoke(provider, breaker, text, model).await;
                    let elapsed = started.elapsed();

                    let (outcome, error, next) = match result {
                        Ok(content) => {
                            if content.trim().chars().count() < self.config.min_content_chars {
                                let error = format!("response too short ({} chars)", content.trim().chars().count());
                                let next = self.retry_or_next_model(attempt, &NexusError::Network { message: error.clone() });
                                (AttemptOutcome::TransientError, Some(error), next)
                            } else if let Some(signature) = self.rules.refusal(&content) {
                                tracing::warn!(provider = provider.name(), model = %model, signature, "Response refused by content filter");
                                reformulate = true;
                                let error = NexusError::ContentFiltered {
                                    provider: provider.name().to_string(),
                                    message: preview(&content, 80),
                                };
                                (AttemptOutcome::Filtered, Some(error.to_string()), Next::NextProvider)
                            } else {
                                self.metrics.record_attempt(provider.name(), AttemptOutcome::Success, elapsed);
                                attempts.push(CascadeAttempt {
                                    provider: provider.name().to_string(),
                                    model: model.clone(),
                                    attempt_number: attempt,
                                    outcome: AttemptOutcome::Success,
                                    elapsed,
                                    reformulated,
                                    error: None,
                                });
                                tracing::info!(provider = provider.name(), model = %model, attempts = attempts.len(), "Provider answered");
                                return ChatResponse {
                                    content,
                                    provider: provider.name().to_string(),
                                    model: model.clone(),
                                    attempts,
                                    last_error,
                                };
                            }
                        }
                        Err(e @ NexusError::ContentFiltered { .. }) => {
                            tracing::warn!(provider = provider.name(), model = %model, "Request blocked by content filter");
                            reformulate = true;
                            (AttemptOutcome::Filtered, Some(e.to_string()), Next::NextProvider)
                        }
                        Err(e) if e.is_auth() => {
                            tracing::warn!(provider = provider.name(), error = %e, "Credentials rejected, abandoning provider");
                            (AttemptOutcome::AuthError, Some(e.to_string()), Next::NextProvider)
                        }
                        Err(e @ NexusError::CircuitOpen { .. }) => {
                            tracing::warn!(provider = provider.name(), "Circuit opened, abandoning provider");
                            (AttemptOutcome::TransientError, Some(e.to_string()), Next::NextProvider)
                        }
                        Err(e @ NexusError::RateLimited { .. }) => {
                            rate_limited += 1;
                            let next = if rate_limited >= max_retries {
                                tracing::warn!(provider = provider.name(), rate_limited, "Rate limited, abandoning provider");
                                Next::NextProvider
                            } else if self.backoff.is_exhausted(attempt) {
                                Next::NextModel
                            } else {
                                let wait = self.backoff.delay_for(rate_limited, &e);
                                tracing::warn!(provider = provider.name(), wait_ms = wait.as_millis() as u64, "Rate limited, backing off");
                                Next::Retry(wait)
                            };
                            (AttemptOutcome::RateLimited, Some(e.to_string()), next)
                        }
                        Err(e) => {
                            tracing::debug!(provider = provider.name(), model = %model, error = %e, "Transient failure");
                            let next = self.retry_or_next_model(attempt, &e);
                            (AttemptOutcome::TransientError, Some(e.to_string()), next)
                        }
                    };

                    self.metrics.record_attempt(provider.name(), outcome, elapsed);
                    attempts.push(CascadeAttempt {
                        provider: provider.name().to_string(),
                        model: model.clone(),
                        attempt_number: attempt,
                        outcome,
                        elapsed,
                        reformulated,
                        error: error.clone(),
                    });
                    last_error = error;

                    match next {
                        Next::Retry(wait) => tokio::time::sleep(wait).await,
                        Next::NextModel => break,
                        Next::NextProvider => continue 'providers,
                    }
                }
            }
        }

        tracing::warn!(
            attempts = attempts.len(),
            last_error = last_error.as_deref().unwrap_or(""),
            "All providers exhausted"
        );
        self.metrics.record_exhausted();

        ChatResponse {
            content: String::new(),
            provider: DEGRADED_PROVIDER.to_string(),
            model: String::new(),
            attempts,
            last_error,
        }
    }

    /// Sends `prompt` with a JSON-only instruction and deserializes the
    /// first JSON object in the answer.
    #[instrument(skip(self, prompt))]
    pub async fn chat_json<T: DeserializeOwned>(&self, prompt: &str) -> NexusResult<T> {
        let (_, value) = self.chat_json_value(prompt).await;
        let value = value?;
        serde_json::from_value(value.clone()).map_err(|e| NexusError::InvalidJson {
            message: e.to_string(),
            raw: value.to_string(),
        })
    }

    /// Like [`chat_json`](Self::chat_json) but also returns the raw response.
    pub async fn chat_json_value(&self, prompt: &str) -> (ChatResponse, NexusResult<Value>) {
        let response = self.chat(&format!("{}\n\n{}", prompt, JSON_INSTRUCTION)).await;

        if response.is_degraded() {
            let err = NexusError::AllProvidersExhausted {
                last_error: response.last_error.clone().unwrap_or_default(),
            };
            return (response, Err(err));
        }

        let value = extract_value(&response.content).ok_or_else(|| {
            tracing::warn!(provider = %response.provider, "Response contains no JSON");
            NexusError::InvalidJson {
                message: "no JSON found in response".to_string(),
                raw: response.content.clone(),
            }
        });
        (response, value)
    }

    fn retry_or_next_model(&self, attempt: u32, error: &NexusError) -> Next {
        if self.backoff.is_exhausted(attempt) {
            Next::NextModel
        } else {
            Next::Retry(self.backoff.delay_for(attempt, error))
        }
    }

    async fn invoke(
        &self,
        provider: &ProviderDescriptor,
        breaker: &CircuitBreaker,
        prompt: &str,
        model: &str,
    ) -> NexusResult<String> {
        let deadline = provider.invoke_timeout();
        // The breaker answers a failed primary with the fallback; keep the
        // primary's own error so it can be classified.
        let failure: Mutex<Option<NexusError>> = Mutex::new(None);
        let admitted = AtomicBool::new(false);

        let result = breaker
            .execute(
                || async {
                    admitted.store(true, Ordering::Release);
                    let outcome = match tokio::time::timeout(deadline, provider.handler().invoke(prompt, model)).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(NexusError::Timeout {
                            message: format!("{} did not answer", provider.name()),
                            timeout: deadline,
                        }),
                    };
                    outcome.map_err(|e| {
                        let message = e.to_string();
                        if let Ok(mut slot) = failure.lock() {
                            *slot = Some(e);
                        }
                        message
                    })
                },
                || async { Err(String::new()) },
            )
            .await;

        result.map_err(|_| {
            if let Some(error) = failure.lock().ok().and_then(|mut slot| slot.take()) {
                return error;
            }
            match (admitted.load(Ordering::Acquire), breaker.config().call_timeout) {
                // The breaker's own deadline cut the call short.
                (true, Some(limit)) => NexusError::Timeout {
                    message: format!("{} exceeded the breaker deadline", provider.name()),
                    timeout: limit,
                },
                _ => NexusError::CircuitOpen {
                    resource: breaker.name().to_string(),
                },
            }
        })
    }
}

impl std::fmt::Debug for ProviderCascade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCascade")
            .field("providers", &self.providers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
