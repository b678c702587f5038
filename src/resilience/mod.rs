//! Resilience primitives shared by the cache and the provider cascade.
//!
//! Provides the circuit breaker, the backoff policy used between attempts on
//! a (provider, model) pair, and the process-wide call throttle.

mod circuit_breaker;
mod retry;
mod throttle;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{BackoffPolicy, RetryConfig};
pub use throttle::Throttle;
