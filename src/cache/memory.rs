//! Bounded in-memory tier.

use bytes::Bytes;
use indexmap::IndexMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// How long an L1 entry is served.
///
/// `ttl` and `age` describe the value itself (an entry read back from the
/// durable tier arrives already aged). `refresh` only bounds how long L1
/// answers without consulting the durable tier again; the stale window is
/// always twice `ttl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Lifetime {
    pub(crate) ttl: Duration,
    pub(crate) refresh: Duration,
    pub(crate) age: Duration,
}

impl Lifetime {
    pub(crate) fn new(ttl: Duration, refresh: Duration) -> Self {
        Self {
            ttl,
            refresh,
            age: Duration::ZERO,
        }
    }

    pub(crate) fn aged(mut self, age: Duration) -> Self {
        self.age = age;
        self
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Bytes,
    written_at: Instant,
    lifetime: Lifetime,
}

impl MemoryEntry {
    fn held_for(&self) -> Duration {
        self.written_at.elapsed()
    }

    fn age(&self) -> Duration {
        self.lifetime.age.saturating_add(self.held_for())
    }

    fn is_fresh(&self) -> bool {
        self.age() < self.lifetime.ttl && self.held_for() < self.lifetime.refresh
    }

    fn is_expired(&self) -> bool {
        self.age() >= self.lifetime.ttl
    }

    fn within_stale_window(&self) -> bool {
        self.age() < self.lifetime.ttl.saturating_mul(2)
    }
}

/// Insertion-ordered map with a maximum entry count.
///
/// At capacity the oldest *inserted* key is evicted. Overwriting a key keeps
/// its original position, so a hot key that is rewritten often still ages
/// out in insertion order.
#[derive(Debug)]
pub(crate) struct MemoryTier {
    entries: Mutex<IndexMap<String, MemoryEntry>>,
    max_entries: usize,
}

impl MemoryTier {
    pub(crate) fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Returns the value if it is within its TTL and its refresh window.
    pub(crate) async fn get(&self, key: &str) -> Option<Bytes> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|entry| entry.is_fresh())
            .map(|entry| entry.value.clone())
    }

    /// Returns the value if it is younger than twice its TTL, flagged `true`
    /// when it is past its TTL. The refresh window does not apply.
    pub(crate) async fn get_stale(&self, key: &str) -> Option<(Bytes, bool)> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get(key)?;

        if entry.within_stale_window() {
            return Some((entry.value.clone(), entry.is_expired()));
        }
        entries.shift_remove(key);
        None
    }

    pub(crate) async fn insert(&self, key: &str, value: Bytes, lifetime: Lifetime) {
        let mut entries = self.entries.lock().await;
        let entry = MemoryEntry {
            value,
            written_at: Instant::now(),
            lifetime,
        };

        if let Some(existing) = entries.get_mut(key) {
            *existing = entry;
            return;
        }

        while entries.len() >= self.max_entries {
            if let Some((evicted, _)) = entries.shift_remove_index(0) {
                tracing::debug!(key = %evicted, "Evicting oldest L1 entry");
            }
        }
        entries.insert(key.to_string(), entry);
    }

    pub(crate) async fn remove(&self, key: &str) -> bool {
        self.entries.lock().await.shift_remove(key).is_some()
    }

    pub(crate) async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub(crate) async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    fn minute() -> Lifetime {
        Lifetime::new(Duration::from_secs(60), Duration::from_secs(600))
    }

    #[tokio::test]
    async fn test_evicts_oldest_inserted() {
        let tier = MemoryTier::new(2);

        tier.insert("a", bytes("1"), minute()).await;
        tier.insert("b", bytes("2"), minute()).await;
        tier.get("a").await.unwrap();
        tier.insert("c", bytes("3"), minute()).await;

        assert!(tier.get("a").await.is_none());
        assert_eq!(tier.get("b").await, Some(bytes("2")));
        assert_eq!(tier.get("c").await, Some(bytes("3")));
        assert_eq!(tier.len().await, 2);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_position() {
        let tier = MemoryTier::new(2);

        tier.insert("a", bytes("1"), minute()).await;
        tier.insert("b", bytes("2"), minute()).await;
        tier.insert("a", bytes("1b"), minute()).await;
        tier.insert("c", bytes("3"), minute()).await;

        assert!(tier.get("a").await.is_none());
        assert!(tier.get("b").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_and_stale_window() {
        let tier = MemoryTier::new(10);
        tier.insert("k", bytes("v"), Lifetime::new(Duration::from_secs(10), Duration::from_secs(600)))
            .await;

        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(tier.get("k").await.is_none());
        assert_eq!(tier.get_stale("k").await, Some((bytes("v"), true)));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(tier.get_stale("k").await.is_none());
        assert_eq!(tier.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_window_does_not_shrink_stale_window() {
        let tier = MemoryTier::new(10);
        tier.insert("k", bytes("v"), Lifetime::new(Duration::from_secs(3600), Duration::from_secs(600)))
            .await;

        tokio::time::advance(Duration::from_secs(700)).await;
        assert!(tier.get("k").await.is_none());
        assert_eq!(tier.get_stale("k").await, Some((bytes("v"), false)));

        tokio::time::advance(Duration::from_secs(3300)).await;
        assert_eq!(tier.get_stale("k").await, Some((bytes("v"), true)));

        tokio::time::advance(Duration::from_secs(3300)).await;
        assert!(tier.get_stale("k").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_aged_entry_keeps_its_original_deadlines() {
        let tier = MemoryTier::new(10);
        let lifetime = Lifetime::new(Duration::from_secs(100), Duration::from_secs(600))
            .aged(Duration::from_secs(80));
        tier.insert("k", bytes("v"), lifetime).await;

        assert!(tier.get("k").await.is_some());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(tier.get("k").await.is_none());
        assert_eq!(tier.get_stale("k").await, Some((bytes("v"), true)));

        tokio::time::advance(Duration::from_secs(100)).await;
        assert!(tier.get_stale("k").await.is_none());
    }
}
