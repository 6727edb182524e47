use core::time::Duration;
use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Expiring single-slot storage, one slot per key.
///
/// Expired entries are purged on every `set`, `delete` and `take`. `get`
/// additionally refuses to return an entry older than the TTL even if no
/// purge has run since it expired.
#[derive(Debug)]
pub struct TemporaryState<T> {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry<T>>>,
}

#[derive(Debug)]
struct Entry<T> {
    created_at: Instant,
    value: T,
}

impl<T> Entry<T> {
    fn is_live(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) < ttl
    }
}

impl<T: Clone> TemporaryState<T> {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stores `value` under `key`, replacing whatever was there.
    pub async fn set(&self, key: impl Into<String>, value: T) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        purge(&mut entries, now, self.ttl);
        entries.insert(
            key.into(),
            Entry {
                created_at: now,
                value,
            },
        );
    }

    /// Reads the value for `key` and leaves it stored. Expiry is checked here
    /// too, so an entry past its TTL is never returned even before a
    /// `set`/`delete` has purged it.
    pub async fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|entry| entry.is_live(now, self.ttl))
            .map(|entry| entry.value.clone())
    }

    pub async fn delete(&self, key: &str) {
        let mut entries = self.entries.lock().await;
        purge(&mut entries, Instant::now(), self.ttl);
        entries.remove(key);
    }

    /// Removes and returns the live entry for `key`.
    pub async fn take(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().await;
        purge(&mut entries, Instant::now(), self.ttl);
        entries.remove(key).map(|entry| entry.value)
    }

    /// Number of stored entries, expired ones not yet purged included.
    #[cfg(test)]
    pub async fn stored(&self) -> usize {
        self.entries.lock().await.len()
    }
}

fn purge<T>(entries: &mut HashMap<String, Entry<T>>, now: Instant, ttl: Duration) {
    entries.retain(|_, entry| entry.is_live(now, ttl));
}
