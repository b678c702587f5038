//! Tiered cache integration tests
//!
//! Runs the cache against `MockDurableStore` (failure injection) and a
//! temporary local-disk tier.

use bytes::Bytes;
use pretty_assertions::assert_eq;
use resilience_nexus::mocks::MockDurableStore;
use resilience_nexus::{CacheConfig, CacheTier, CircuitBreakerConfig, CircuitState, TieredCache};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const HOUR: Duration = Duration::from_secs(3600);

fn cache(store: &Arc<MockDurableStore>, dir: &TempDir) -> TieredCache {
    TieredCache::new(
        CacheConfig::new().local_dir(dir.path()),
        CircuitBreakerConfig::new()
            .failure_threshold(5)
            .cooldown(Duration::from_secs(30)),
        store.clone(),
    )
}

async fn search(calls: &AtomicU32, answer: &str) -> Result<Vec<String>, String> {
    calls.fetch_add(1, Ordering::SeqCst);
    Ok(vec![answer.to_string()])
}

#[tokio::test]
async fn test_get_or_set_computes_once_within_ttl() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MockDurableStore::new());
    let cache = cache(&store, &dir);
    let calls = AtomicU32::new(0);

    // Act
    let first = cache
        .get_or_set("search:senator", HOUR, || search(&calls, "first"))
        .await
        .unwrap();
    let second = cache
        .get_or_set("search:senator", HOUR, || search(&calls, "second"))
        .await
        .unwrap();

    // Assert
    assert_eq!(first, vec!["first".to_string()]);
    assert_eq!(second, first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(store.entry("search:senator").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_compute_runs_again_after_every_tier_expires() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MockDurableStore::new());
    let cache = cache(&store, &dir);
    let calls = AtomicU32::new(0);

    cache
        .get_or_set("profile:1", HOUR, || search(&calls, "old"))
        .await
        .unwrap();

    tokio::time::advance(HOUR + Duration::from_secs(1)).await;
    store.backdate("profile:1", HOUR + Duration::from_secs(1));

    let value = cache
        .get_or_set("profile:1", HOUR, || search(&calls, "new"))
        .await
        .unwrap();

    assert_eq!(value, vec!["new".to_string()]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_durable_hit_populates_l1() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MockDurableStore::new());
    let cache = cache(&store, &dir);

    cache.set("k", Bytes::from_static(b"\"v\""), HOUR).await;
    cache.clear_l1().await;

    let hit = cache.get("k").await.unwrap();
    assert_eq!(hit.tier, CacheTier::L2);
    assert!(!hit.stale);
    assert_eq!(cache.stats().await.l1_entries, 1);

    let hit = cache.get("k").await.unwrap();
    assert_eq!(hit.tier, CacheTier::L1);
    assert_eq!(store.reads(), 1);
}

#[tokio::test]
async fn test_outage_writes_and_reads_the_local_tier() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MockDurableStore::new());
    let cache = cache(&store, &dir);
    store.set_failing(true);

    // Act
    cache.set("analysis:42", Bytes::from_static(b"{\"score\":7}"), HOUR).await;
    cache.clear_l1().await;
    let hit = cache.get("analysis:42").await.unwrap();

    // Assert
    assert_eq!(hit.tier, CacheTier::Local);
    assert!(!hit.stale);
    assert_eq!(hit.value, Bytes::from_static(b"{\"score\":7}"));
    assert!(cache.local_store().path_for("analysis:42").exists());
    assert!(store.entry("analysis:42").is_none());
}

#[tokio::test]
async fn test_local_entry_found_after_store_recovers() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MockDurableStore::new());
    let cache = cache(&store, &dir);

    store.set_failing(true);
    cache.set("k", Bytes::from_static(b"1"), HOUR).await;
    cache.clear_l1().await;
    store.set_failing(false);

    let hit = cache.get("k").await.unwrap();
    assert_eq!(hit.tier, CacheTier::Local);
}

#[tokio::test]
async fn test_breaker_opens_and_stops_durable_reads() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MockDurableStore::new());
    let cache = cache(&store, &dir);
    store.set_failing(true);

    for _ in 0..5 {
        assert!(cache.get("missing").await.is_none());
    }
    assert_eq!(store.reads(), 5);
    assert_eq!(cache.stats().await.durable_breaker, CircuitState::Open);

    assert!(cache.get("missing").await.is_none());
    assert_eq!(store.reads(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_compute_failure_serves_stale_value() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MockDurableStore::new());
    let cache = cache(&store, &dir);
    let calls = AtomicU32::new(0);
    let ttl = Duration::from_secs(60);

    cache
        .get_or_set("politician:9", ttl, || search(&calls, "cached"))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(90)).await;
    store.backdate("politician:9", Duration::from_secs(90));

    let value: Vec<String> = cache
        .get_or_set("politician:9", ttl, || async {
            Err::<Vec<String>, String>("scraper down".to_string())
        })
        .await
        .unwrap();
    assert_eq!(value, vec!["cached".to_string()]);

    let stale = cache.get_stale("politician:9").await.unwrap();
    assert!(stale.stale);
    assert_eq!(stale.tier, CacheTier::L1);
}

#[tokio::test(start_paused = true)]
async fn test_compute_failure_past_stale_window_is_returned() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MockDurableStore::new());
    let cache = cache(&store, &dir);
    let calls = AtomicU32::new(0);
    let ttl = Duration::from_secs(60);

    cache
        .get_or_set("politician:9", ttl, || search(&calls, "cached"))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(121)).await;
    store.backdate("politician:9", Duration::from_secs(121));

    let result: Result<Vec<String>, String> = cache
        .get_or_set("politician:9", ttl, || async { Err("scraper down".to_string()) })
        .await;
    assert_eq!(result.unwrap_err(), "scraper down");
    assert!(cache.get_stale("politician:9").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stale_window_spans_twice_a_ttl_longer_than_l1_refresh() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MockDurableStore::new());
    let cache = cache(&store, &dir);
    assert!(HOUR > cache.config().l1_refresh);

    cache.set("k", Bytes::from_static(b"\"v\""), HOUR).await;
    store.set_failing(true);

    // Act
    tokio::time::advance(Duration::from_secs(4000)).await;
    let stale = cache.get_stale("k").await;

    // Assert
    let stale = stale.unwrap();
    assert_eq!(stale.tier, CacheTier::L1);
    assert!(stale.stale);

    tokio::time::advance(Duration::from_secs(3300)).await;
    assert!(cache.get_stale("k").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_l1_past_refresh_serves_during_outage_within_ttl() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MockDurableStore::new());
    let cache = cache(&store, &dir);

    cache.set("k", Bytes::from_static(b"1"), HOUR).await;
    tokio::time::advance(Duration::from_secs(700)).await;
    store.set_failing(true);

    let hit = cache.get("k").await.unwrap();
    assert_eq!(hit.tier, CacheTier::L1);
    assert!(!hit.stale);
    assert_eq!(store.reads(), 1);
}

#[tokio::test]
async fn test_invalidate_clears_every_tier() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MockDurableStore::new());
    let cache = cache(&store, &dir);

    cache.set("k", Bytes::from_static(b"1"), HOUR).await;
    store.set_failing(true);
    cache.set("k", Bytes::from_static(b"2"), HOUR).await;
    store.set_failing(false);

    cache.invalidate("k").await;

    assert!(store.entry("k").is_none());
    assert!(!cache.local_store().path_for("k").exists());
    assert!(cache.get("k").await.is_none());
    assert!(cache.get_stale("k").await.is_none());
}

#[tokio::test]
async fn test_l1_evicts_oldest_entry() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MockDurableStore::new());
    let cache = TieredCache::new(
        CacheConfig::new().local_dir(dir.path()).max_l1_entries(2),
        CircuitBreakerConfig::default(),
        store.clone(),
    );

    for key in ["a", "b", "c"] {
        cache.set(key, Bytes::from_static(b"1"), HOUR).await;
    }

    assert_eq!(cache.stats().await.l1_entries, 2);
    let reads = store.reads();
    assert_eq!(cache.get("a").await.unwrap().tier, CacheTier::L2);
    assert_eq!(store.reads(), reads + 1);
}

#[tokio::test]
async fn test_undecodable_entry_is_recomputed() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MockDurableStore::new());
    let cache = cache(&store, &dir);
    let calls = AtomicU32::new(0);

    cache.set("k", Bytes::from_static(b"not json"), HOUR).await;

    let value = cache
        .get_or_set("k", HOUR, || search(&calls, "fresh"))
        .await
        .unwrap();
    assert_eq!(value, vec!["fresh".to_string()]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
