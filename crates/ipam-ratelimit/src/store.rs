//! Counter stores
//!
//! A counter store must make `increment` a single atomic read-and-add per
//! key, so that concurrent callers on any number of instances never lose an
//! update. A networked store (Redis `INCR` + `EXPIRE` in one pipeline, or a
//! database upsert) plugs in behind [`CounterStore`]; [`LocalCounterStore`]
//! is the in-process fallback.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Counter store errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CounterError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    #[error("counter store timed out after {0:?}")]
    Timeout(Duration),
}

/// Atomic, expiring counters
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add one to `key` and return the new value; the key lives for `ttl`
    /// from its first increment
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, CounterError>;

    /// Undo one increment (used to roll back rejected requests)
    async fn decrement(&self, key: &str) -> Result<(), CounterError>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

struct Slot {
    count: u64,
    expires_at: Instant,
}

/// In-process counters behind a mutex
///
/// Accurate for one instance only; several instances each enforce the
/// full limit.
pub struct LocalCounterStore {
    slots: Mutex<HashMap<String, Slot>>,
    sweep_threshold: usize,
}

impl LocalCounterStore {
    pub fn new() -> Self {
        Self::with_sweep_threshold(4096)
    }

    /// Expired keys are swept once the map grows past `threshold`
    pub fn with_sweep_threshold(threshold: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            sweep_threshold: threshold.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl Default for LocalCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for LocalCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, CounterError> {
        let now = Instant::now();
        let mut slots = self.slots.lock();

        if slots.len() >= self.sweep_threshold {
            slots.retain(|_, slot| slot.expires_at > now);
        }

        let slot = slots.entry(key.to_string()).or_insert(Slot {
            count: 0,
            expires_at: now + ttl,
        });
        if slot.expires_at <= now {
            slot.count = 0;
            slot.expires_at = now + ttl;
        }
        slot.count += 1;
        Ok(slot.count)
    }

    async fn decrement(&self, key: &str) -> Result<(), CounterError> {
        if let Some(slot) = self.slots.lock().get_mut(key) {
            slot.count = slot.count.saturating_sub(1);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_increment_and_rollback() {
        let store = LocalCounterStore::new();
        let ttl = Duration::from_secs(60);

        assert_eq!(store.increment("k", ttl).await.unwrap(), 1);
        assert_eq!(store.increment("k", ttl).await.unwrap(), 2);
        store.decrement("k").await.unwrap();
        assert_eq!(store.increment("k", ttl).await.unwrap(), 2);

        // Unknown keys are ignored
        store.decrement("missing").await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_keys_restart_and_get_swept() {
        let store = LocalCounterStore::with_sweep_threshold(2);
        assert_eq!(store.increment("a", Duration::ZERO).await.unwrap(), 1);
        assert_eq!(store.increment("a", Duration::ZERO).await.unwrap(), 1);
        store.increment("b", Duration::ZERO).await.unwrap();
        assert_eq!(store.len(), 2);

        // Reaching the threshold sweeps both expired keys
        store.increment("c", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(LocalCounterStore::new());
        let handles: Vec<_> = (0..64)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.increment("hot", Duration::from_secs(60)).await })
            })
            .collect();

        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap().unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=64).collect::<Vec<u64>>());
    }
}
