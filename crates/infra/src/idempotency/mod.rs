//! Idempotency store: completion markers and processing locks.
//!
//! ## Key families
//!
//! Both keyed by correlation id, under a configurable prefix:
//! - `{prefix}processed:{id}` holds a result tag once the task has completed;
//!   its presence is the single source of truth for "already handled".
//! - `{prefix}processed:lock:{id}` holds `"processing"` while an attempt is in
//!   flight. It is taken with an atomic set-if-absent and carries a short TTL so
//!   a crashed holder cannot block the task forever.
//!
//! ## Degraded mode
//!
//! The store is an external service that may be down. [`IdempotencyService`]
//! bounds every call with a timeout and, when the store cannot answer, favors
//! availability: a task is assumed not yet processed and the lock is assumed
//! acquired. Duplicates become possible in that window; lost tasks do not.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use parley_core::CorrelationId;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use in_memory::InMemoryIdempotencyStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisIdempotencyStore;

pub const DEFAULT_KEY_PREFIX: &str = "parley:";
pub const LOCK_VALUE: &str = "processing";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store command error: {0}")]
    Command(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Minimal key-value primitives the pipeline needs.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically set `key` if it does not exist. Returns whether it was set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> IdempotencyStore for Arc<S>
where
    S: IdempotencyStore + ?Sized,
{
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        (**self).set_if_absent(key, value, ttl).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        (**self).set(key, value, ttl).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        (**self).exists(key).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        (**self).ping().await
    }
}

/// Outcome of trying to take the processing lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAcquisition {
    Acquired,
    AlreadyHeld,
    /// The store could not answer; proceed as if acquired.
    Unverified,
}

impl LockAcquisition {
    pub fn may_proceed(&self) -> bool {
        !matches!(self, LockAcquisition::AlreadyHeld)
    }
}

#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    pub key_prefix: String,
    pub dedup_ttl: Duration,
    pub lock_ttl: Duration,
    pub timeout: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            dedup_ttl: Duration::from_secs(3600),
            lock_ttl: Duration::from_secs(300),
            timeout: Duration::from_secs(2),
        }
    }
}

impl From<&crate::config::StoreSettings> for IdempotencyConfig {
    fn from(s: &crate::config::StoreSettings) -> Self {
        Self {
            key_prefix: s.key_prefix.clone(),
            dedup_ttl: s.dedup_ttl,
            lock_ttl: s.lock_ttl,
            timeout: s.timeout,
        }
    }
}

/// Idempotency operations with timeouts and degraded-mode semantics.
#[derive(Clone)]
pub struct IdempotencyService {
    store: Arc<dyn IdempotencyStore>,
    config: IdempotencyConfig,
}

impl std::fmt::Debug for IdempotencyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IdempotencyService {
    pub fn new(store: Arc<dyn IdempotencyStore>, config: IdempotencyConfig) -> Self {
        Self { store, config }
    }

    pub fn processed_key(&self, id: &CorrelationId) -> String {
        format!("{}processed:{}", self.config.key_prefix, id)
    }

    pub fn lock_key(&self, id: &CorrelationId) -> String {
        format!("{}processed:lock:{}", self.config.key_prefix, id)
    }

    /// Whether a completion marker exists. Store failures read as `false`.
    pub async fn is_processed(&self, id: &CorrelationId) -> bool {
        let key = self.processed_key(id);
        match self.bounded(self.store.exists(&key)).await {
            Ok(found) => found,
            Err(e) => {
                warn!(correlation_id = %id, error = %e, "idempotency check failed; assuming not processed");
                false
            }
        }
    }

    /// Write the completion marker with the dedup TTL.
    pub async fn mark_processed(&self, id: &CorrelationId, result: &str) -> Result<(), StoreError> {
        let key = self.processed_key(id);
        self.bounded(self.store.set(&key, result, self.config.dedup_ttl))
            .await
    }

    /// Result tag of a completed task, if any.
    pub async fn processing_status(&self, id: &CorrelationId) -> Result<Option<String>, StoreError> {
        let key = self.processed_key(id);
        self.bounded(self.store.get(&key)).await
    }

    pub async fn try_lock(&self, id: &CorrelationId) -> LockAcquisition {
        let key = self.lock_key(id);
        match self
            .bounded(self.store.set_if_absent(&key, LOCK_VALUE, self.config.lock_ttl))
            .await
        {
            Ok(true) => LockAcquisition::Acquired,
            Ok(false) => LockAcquisition::AlreadyHeld,
            Err(e) => {
                warn!(correlation_id = %id, error = %e, "lock acquisition failed; proceeding without lock");
                LockAcquisition::Unverified
            }
        }
    }

    pub async fn release_lock(&self, id: &CorrelationId) -> Result<(), StoreError> {
        let key = self.lock_key(id);
        self.bounded(self.store.delete(&key)).await
    }

    pub async fn is_healthy(&self) -> bool {
        self.bounded(self.store.ping()).await.is_ok()
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.config.timeout, op)
            .await
            .map_err(|_| StoreError::Timeout(self.config.timeout))?
    }
}
