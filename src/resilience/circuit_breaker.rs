//! Circuit breaker implementation.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::observability::MetricsCollector;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Circuit is closed, calls reach the primary operation.
    Closed,
    /// Circuit is open, calls are answered by the fallback.
    Open,
    /// Circuit is testing, one trial call reaches the primary.
    HalfOpen,
}

impl CircuitState {
    /// Returns the upper-case label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening.
    pub failure_threshold: u32,
    /// Duration to wait in the open state before probing.
    pub cooldown: Duration,
    /// Deadline applied to the primary operation; exceeding it counts as a failure.
    pub call_timeout: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            call_timeout: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the cooldown.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Sets the primary-call deadline.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerState {
    /// Current status.
    pub status: CircuitState,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// When the most recent failure happened.
    pub last_failure_at: Option<Instant>,
    /// When the breaker last opened.
    pub opened_at: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            status: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            opened_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Primary,
    Trial,
    Fallback,
}

/// Releases the half-open trial slot, including when the trial is cancelled.
struct TrialSlot<'a> {
    flag: &'a AtomicBool,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Circuit breaker guarding a single unreliable resource.
///
/// One instance exists per resource identity (for example `"durable-store"`
/// or `"provider:groq"`) and is shared by every caller of that resource.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    trial_in_flight: AtomicBool,
    metrics: Option<Arc<dyn MetricsCollector>>,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker for the named resource.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::closed()),
            trial_in_flight: AtomicBool::new(false),
            metrics: None,
        }
    }

    /// Records state transitions in the given collector.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns the guarded resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the current status without mutating it.
    ///
    /// An open breaker whose cooldown has elapsed reports `HalfOpen`: the next
    /// call will be the trial.
    pub async fn state(&self) -> CircuitState {
        let state = self.state.lock().await;
        if state.status == CircuitState::Open && self.cooldown_elapsed(&state) {
            CircuitState::HalfOpen
        } else {
            state.status
        }
    }

    /// Returns a copy of the full breaker state.
    pub async fn snapshot(&self) -> BreakerState {
        *self.state.lock().await
    }

    /// Runs `primary` if the breaker admits it, otherwise `fallback`.
    ///
    /// A failed (or timed-out) primary counts against the breaker and the
    /// call is then answered by `fallback`. Fallback errors are returned
    /// unchanged and the fallback is never retried.
    pub async fn execute<T, E, P, PFut, F, FFut>(&self, primary: P, fallback: F) -> Result<T, E>
    where
        P: FnOnce() -> PFut,
        PFut: Future<Output = Result<T, E>>,
        F: FnOnce() -> FFut,
        FFut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let admission = self.admit().await;
        if admission == Admission::Fallback {
            tracing::debug!(resource = %self.name, "Circuit open, using fallback");
            return fallback().await;
        }

        let trial = admission == Admission::Trial;
        let _slot = trial.then(|| TrialSlot {
            flag: &self.trial_in_flight,
        });

        let outcome = match self.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, primary()).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("timed out after {:?}", limit)),
            },
            None => primary().await.map_err(|e| e.to_string()),
        };

        match outcome {
            Ok(value) => {
                self.record_success(trial).await;
                Ok(value)
            }
            Err(reason) => {
                self.record_failure(trial, &reason).await;
                fallback().await
            }
        }
    }

    /// Resets the circuit breaker to the closed state.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        let previous = state.status;
        *state = BreakerState::closed();
        if previous != CircuitState::Closed {
            self.notify(previous, CircuitState::Closed);
        }
    }

    async fn admit(&self) -> Admission {
        let mut state = self.state.lock().await;
        match state.status {
            CircuitState::Closed => Admission::Primary,
            CircuitState::Open => {
                if self.cooldown_elapsed(&state) {
                    tracing::info!(resource = %self.name, "Circuit breaker transitioning to half-open");
                    self.transition(&mut state, CircuitState::HalfOpen);
                    self.claim_trial()
                } else {
                    Admission::Fallback
                }
            }
            CircuitState::HalfOpen => self.claim_trial(),
        }
    }

    fn claim_trial(&self) -> Admission {
        if self
            .trial_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Admission::Trial
        } else {
            Admission::Fallback
        }
    }

    async fn record_success(&self, trial: bool) {
        let mut state = self.state.lock().await;
        state.consecutive_failures = 0;
        if trial && state.status == CircuitState::HalfOpen {
            tracing::info!(resource = %self.name, "Circuit breaker closing after successful trial");
            self.transition(&mut state, CircuitState::Closed);
            state.last_failure_at = None;
            state.opened_at = None;
        }
    }

    async fn record_failure(&self, trial: bool, reason: &str) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure_at = Some(now);

        match state.status {
            CircuitState::Closed => {
                tracing::warn!(
                    resource = %self.name,
                    failures = state.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    error = %reason,
                    "Guarded call failed"
                );
                if state.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(resource = %self.name, "Circuit breaker opening");
                    self.transition(&mut state, CircuitState::Open);
                    state.opened_at = Some(now);
                }
            }
            CircuitState::HalfOpen if trial => {
                tracing::info!(resource = %self.name, error = %reason, "Circuit breaker re-opening after failed trial");
                self.transition(&mut state, CircuitState::Open);
                state.opened_at = Some(now);
            }
            // Late failures from calls admitted before the breaker opened.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn cooldown_elapsed(&self, state: &BreakerState) -> bool {
        state
            .opened_at
            .map_or(true, |opened| opened.elapsed() >= self.config.cooldown)
    }

    fn transition(&self, state: &mut BreakerState, next: CircuitState) {
        let previous = state.status;
        state.status = next;
        self.notify(previous, next);
    }

    fn notify(&self, from: CircuitState, to: CircuitState) {
        if let Some(metrics) = &self.metrics {
            metrics.record_breaker_transition(&self.name, from, to);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
