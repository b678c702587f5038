//! Observability module for the resilience core.
//!
//! Structured logging goes through `tracing`; this module installs the
//! subscriber, redacts credentials from logged text, and collects counters
//! for cache tiers, provider attempts, breaker transitions and consensus.

mod logging;
mod metrics;

pub use logging::{init_tracing, preview, redact, LogConfig, LogFormat};
pub use metrics::{DefaultMetricsCollector, MetricsCollector, MetricsSnapshot};

use std::sync::Arc;

/// Returns a fresh shared collector.
pub fn default_metrics() -> Arc<dyn MetricsCollector> {
    Arc::new(DefaultMetricsCollector::new())
}
