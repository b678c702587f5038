//! Metrics collection for the resilience core.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use crate::cache::CacheTier;
use crate::cascade::AttemptOutcome;
use crate::resilience::CircuitState;

/// Metrics collector interface.
pub trait MetricsCollector: Send + Sync {
    /// Records a cache lookup answered by `tier`.
    fn record_cache_hit(&self, tier: CacheTier, stale: bool);

    /// Records a cache lookup that found nothing.
    fn record_cache_miss(&self);

    /// Records one provider invocation and how it was classified.
    fn record_attempt(&self, provider: &str, outcome: AttemptOutcome, duration: Duration);

    /// Records a cascade call that exhausted every provider.
    fn record_exhausted(&self);

    /// Records a circuit breaker state change.
    fn record_breaker_transition(&self, resource: &str, from: CircuitState, to: CircuitState);

    /// Records a consensus validation.
    fn record_consensus(&self, score: u8, judged: bool);

    /// Gets current metrics.
    fn snapshot(&self) -> MetricsSnapshot;

    /// Resets all metrics.
    fn reset(&self);
}

/// Metrics snapshot.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Fresh hits per tier.
    pub cache_hits: HashMap<CacheTier, u64>,
    /// Hits served past their TTL.
    pub stale_hits: u64,
    /// Lookups that found nothing.
    pub cache_misses: u64,
    /// Provider invocations per outcome.
    pub attempts: HashMap<AttemptOutcome, u64>,
    /// Successful invocations per provider.
    pub provider_successes: HashMap<String, u64>,
    /// Total time spent inside provider invocations.
    pub provider_latency_ms: u64,
    /// Cascade calls that returned the degraded result.
    pub exhausted: u64,
    /// Breaker transitions keyed by `"resource:FROM->TO"`.
    pub breaker_transitions: HashMap<String, u64>,
    /// Consensus validations run.
    pub consensus_runs: u64,
    /// Validations that needed a judge call.
    pub judge_calls: u64,
    /// Sum of consensus scores.
    pub consensus_score_total: u64,
}

impl MetricsSnapshot {
    /// Fraction of lookups answered by any tier.
    pub fn hit_rate(&self) -> f64 {
        let hits: u64 = self.cache_hits.values().sum::<u64>() + self.stale_hits;
        let total = hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Total provider invocations.
    pub fn total_attempts(&self) -> u64 {
        self.attempts.values().sum()
    }

    /// Average consensus score.
    pub fn average_consensus(&self) -> f64 {
        if self.consensus_runs == 0 {
            0.0
        } else {
            self.consensus_score_total as f64 / self.consensus_runs as f64
        }
    }
}

/// Default metrics collector implementation.
pub struct DefaultMetricsCollector {
    stale_hits: AtomicU64,
    cache_misses: AtomicU64,
    provider_latency_ms: AtomicU64,
    exhausted: AtomicU64,
    consensus_runs: AtomicU64,
    judge_calls: AtomicU64,
    consensus_score_total: AtomicU64,
    cache_hits: RwLock<HashMap<CacheTier, u64>>,
    attempts: RwLock<HashMap<AttemptOutcome, u64>>,
    provider_successes: RwLock<HashMap<String, u64>>,
    breaker_transitions: RwLock<HashMap<String, u64>>,
}

impl DefaultMetricsCollector {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self {
            stale_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            provider_latency_ms: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
            consensus_runs: AtomicU64::new(0),
            judge_calls: AtomicU64::new(0),
            consensus_score_total: AtomicU64::new(0),
            cache_hits: RwLock::new(HashMap::new()),
            attempts: RwLock::new(HashMap::new()),
            provider_successes: RwLock::new(HashMap::new()),
            breaker_transitions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for DefaultMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector for DefaultMetricsCollector {
    fn record_cache_hit(&self, tier: CacheTier, stale: bool) {
        if stale {
            self.stale_hits.fetch_add(1, Ordering::Relaxed);
        } else if let Ok(mut hits) = self.cache_hits.write() {
            *hits.entry(tier).or_insert(0) += 1;
        }
    }

    fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_attempt(&self, provider: &str, outcome: AttemptOutcome, duration: Duration) {
        self.provider_latency_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);

        if let Ok(mut attempts) = self.attempts.write() {
            *attempts.entry(outcome).or_insert(0) += 1;
        }

        if outcome == AttemptOutcome::Success {
            if let Ok(mut successes) = self.provider_successes.write() {
                *successes.entry(provider.to_string()).or_insert(0) += 1;
            }
        }
    }

    fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_breaker_transition(&self, resource: &str, from: CircuitState, to: CircuitState) {
        if let Ok(mut transitions) = self.breaker_transitions.write() {
            *transitions
                .entry(format!("{}:{}->{}", resource, from, to))
                .or_insert(0) += 1;
        }
    }

    fn record_consensus(&self, score: u8, judged: bool) {
        self.consensus_runs.fetch_add(1, Ordering::Relaxed);
        self.consensus_score_total
            .fetch_add(u64::from(score), Ordering::Relaxed);
        if judged {
            self.judge_calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.read().map(|h| h.clone()).unwrap_or_default(),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            attempts: self.attempts.read().map(|a| a.clone()).unwrap_or_default(),
            provider_successes: self
                .provider_successes
                .read()
                .map(|p| p.clone())
                .unwrap_or_default(),
            provider_latency_ms: self.provider_latency_ms.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            breaker_transitions: self
                .breaker_transitions
                .read()
                .map(|t| t.clone())
                .unwrap_or_default(),
            consensus_runs: self.consensus_runs.load(Ordering::Relaxed),
            judge_calls: self.judge_calls.load(Ordering::Relaxed),
            consensus_score_total: self.consensus_score_total.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.stale_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.provider_latency_ms.store(0, Ordering::Relaxed);
        self.exhausted.store(0, Ordering::Relaxed);
        self.consensus_runs.store(0, Ordering::Relaxed);
        self.judge_calls.store(0, Ordering::Relaxed);
        self.consensus_score_total.store(0, Ordering::Relaxed);

        if let Ok(mut hits) = self.cache_hits.write() {
            hits.clear();
        }
        if let Ok(mut attempts) = self.attempts.write() {
            attempts.clear();
        }
        if let Ok(mut successes) = self.provider_successes.write() {
            successes.clear();
        }
        if let Ok(mut transitions) = self.breaker_transitions.write() {
            transitions.clear();
        }
    }
}

impl std::fmt::Debug for DefaultMetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultMetricsCollector")
            .field("cache_misses", &self.cache_misses.load(Ordering::Relaxed))
            .field("exhausted", &self.exhausted.load(Ordering::Relaxed))
            .field("consensus_runs", &self.consensus_runs.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let collector = DefaultMetricsCollector::new();

        collector.record_cache_hit(CacheTier::L1, false);
        collector.record_cache_hit(CacheTier::L2, false);
        collector.record_cache_hit(CacheTier::Local, true);
        collector.record_cache_miss();

        let metrics = collector.snapshot();
        assert_eq!(metrics.cache_hits.get(&CacheTier::L1), Some(&1));
        assert_eq!(metrics.stale_hits, 1);
        assert!((metrics.hit_rate() - 0.75).abs() < 0.001);
    }

    #[test]
    fn test_attempts_by_outcome() {
        let collector = DefaultMetricsCollector::new();

        collector.record_attempt("a", AttemptOutcome::RateLimited, Duration::from_millis(10));
        collector.record_attempt("a", AttemptOutcome::RateLimited, Duration::from_millis(10));
        collector.record_attempt("b", AttemptOutcome::Success, Duration::from_millis(30));

        let metrics = collector.snapshot();
        assert_eq!(metrics.total_attempts(), 3);
        assert_eq!(metrics.attempts.get(&AttemptOutcome::RateLimited), Some(&2));
        assert_eq!(metrics.provider_successes.get("b"), Some(&1));
        assert_eq!(metrics.provider_latency_ms, 50);
    }

    #[test]
    fn test_breaker_transitions() {
        let collector = DefaultMetricsCollector::new();
        collector.record_breaker_transition("durable-store", CircuitState::Closed, CircuitState::Open);

        let metrics = collector.snapshot();
        assert_eq!(
            metrics.breaker_transitions.get("durable-store:CLOSED->OPEN"),
            Some(&1)
        );
    }

    #[test]
    fn test_consensus_average() {
        let collector = DefaultMetricsCollector::new();
        collector.record_consensus(100, false);
        collector.record_consensus(50, true);

        let metrics = collector.snapshot();
        assert_eq!(metrics.judge_calls, 1);
        assert!((metrics.average_consensus() - 75.0).abs() < 0.001);
    }

    #[test]
    fn test_reset() {
        let collector = DefaultMetricsCollector::new();
        collector.record_cache_miss();
        collector.record_attempt("a", AttemptOutcome::Success, Duration::from_millis(1));

        collector.reset();

        let metrics = collector.snapshot();
        assert_eq!(metrics.cache_misses, 0);
        assert!(metrics.attempts.is_empty());
    }
}
