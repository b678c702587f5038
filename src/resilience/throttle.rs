//! Process-wide minimum interval between outbound provider calls.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces outbound calls by at least `min_interval`, across all providers.
///
/// Free-tier providers rate-limit per source IP, so one slot is shared by
/// every provider and every concurrent cascade invocation. Callers reserve
/// the next free slot under the lock and sleep outside it.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    /// Creates a throttle with the given minimum interval.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Returns the configured interval.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until this caller may issue a call.
    ///
    /// Returns how long the caller waited.
    pub async fn acquire(&self) -> Duration {
        let wait = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next_slot {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next_slot = Some(slot + self.min_interval);
            slot - now
        };

        if !wait.is_zero() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "Throttling provider call");
            tokio::time::sleep(wait).await;
        }
        wait
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(Duration::from_millis(1500))
    }
}
