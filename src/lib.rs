//! Resilience Nexus
//!
//! The shared resilience layer of a political-accountability analysis
//! service. It keeps scraping and analysis agents working while every
//! external dependency (AI providers, the durable store) is flaky,
//! rate-limited or down.
//!
//! # Components
//!
//! - **Circuit breaker**: guards one unreliable resource, answering with a
//!   fallback while the resource is failing
//! - **Tiered cache**: in-memory L1, durable L2 behind a breaker, and a
//!   local-disk tier that takes over when L2 is unavailable
//! - **Provider cascade**: ordered providers and models with throttling,
//!   backoff and content-filter detection
//! - **Consensus validator**: runs a prompt twice, scores agreement and
//!   calls a judge when the verdicts disagree
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use resilience_nexus::cache::{CacheConfig, RestDurableStore, TieredCache};
//! use resilience_nexus::transport::HttpTransportImpl;
//! use resilience_nexus::CircuitBreakerConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = HttpTransportImpl::new("https://store.example.com/cache", Duration::from_secs(5))?;
//!     let cache = TieredCache::new(
//!         CacheConfig::default(),
//!         CircuitBreakerConfig::default().call_timeout(Duration::from_secs(5)),
//!         Arc::new(RestDurableStore::new(Arc::new(transport))),
//!     );
//!
//!     let profile: Vec<String> = cache
//!         .get_or_set("search:senator", Duration::from_secs(3600), || async {
//!             Ok::<_, std::io::Error>(vec!["first result".to_string()])
//!         })
//!         .await?;
//!     println!("{profile:?}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod cache;
pub mod cascade;
pub mod client;
pub mod config;
pub mod consensus;
pub mod errors;
pub mod mocks;
pub mod observability;
pub mod providers;
pub mod resilience;
pub mod transport;

// Re-exports for convenience
pub use cache::{CacheConfig, CacheHit, CacheTier, TieredCache};
pub use cascade::{AttemptOutcome, CascadeAttempt, CascadeConfig, ChatResponse, ProviderCascade};
pub use client::{Nexus, NexusBuilder};
pub use config::{NexusConfig, NexusConfigBuilder, ProviderConfig};
pub use consensus::{ConsensusConfig, ConsensusResult, ConsensusStatus, ConsensusValidator};
pub use errors::{NexusError, NexusResult};
pub use observability::{init_tracing, LogConfig, LogFormat};
pub use providers::{ProviderDescriptor, ProviderHandler};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
