//! In-memory idempotency store for tests/dev.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{IdempotencyStore, StoreError};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Mutex<HashMap<String, Entry>>,
    failing: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

/// HashMap-backed store with TTLs measured on the tokio clock.
///
/// Can be switched into a failing or slow mode to exercise degraded paths.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdempotencyStore {
    inner: Arc<Inner>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation fails with a connection error while set.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut l) = self.inner.latency.lock() {
            *l = Some(latency);
        }
    }

    /// Live (non-expired) value of `key`, bypassing failure injection.
    pub fn peek(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.inner
            .entries
            .lock()
            .ok()?
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        match self.inner.entries.lock() {
            Ok(map) => {
                let mut keys: Vec<String> = map
                    .iter()
                    .filter(|(_, e)| e.expires_at > now)
                    .map(|(k, _)| k.clone())
                    .collect();
                keys.sort();
                keys
            }
            Err(_) => Vec::new(),
        }
    }

    async fn enter(&self) -> Result<(), StoreError> {
        let latency = self.inner.latency.lock().ok().and_then(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("in-memory store unavailable".into()));
        }
        Ok(())
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Entry>, Instant) -> T,
    ) -> Result<T, StoreError> {
        let now = Instant::now();
        let mut map = self
            .inner
            .entries
            .lock()
            .map_err(|_| StoreError::Command("lock poisoned".into()))?;
        map.retain(|_, e| e.expires_at > now);
        Ok(f(&mut map, now))
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.enter().await?;
        self.with_entries(|map, now| {
            if map.contains_key(key) {
                return false;
            }
            map.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: now + ttl,
                },
            );
            true
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.enter().await?;
        self.with_entries(|map, now| {
            map.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: now + ttl,
                },
            );
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.enter().await?;
        self.with_entries(|map, _| map.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.enter().await?;
        self.with_entries(|map, _| map.get(key).map(|e| e.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.enter().await?;
        self.with_entries(|map, _| {
            map.remove(key);
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.enter().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let store = InMemoryIdempotencyStore::new();
        store.set("k", "v", Duration::from_secs(10)).await.unwrap();
        assert!(store.exists("k").await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.peek("k"), None);
    }

    #[tokio::test]
    async fn set_if_absent_does_not_overwrite() {
        let store = InMemoryIdempotencyStore::new();
        let ttl = Duration::from_secs(60);
        assert!(store.set_if_absent("k", "first", ttl).await.unwrap());
        assert!(!store.set_if_absent("k", "second", ttl).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("first"));
    }
}
