//! Keyed lock registry
//!
//! One async mutex per key (plan symbol or session id). Locks are created on
//! first use and kept for the life of the process; the key space is bounded
//! by the number of symbols and sessions.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::errors::{Result, TradeError};

/// Guard for a single key; the lock is released when dropped
pub type KeyGuard = OwnedMutexGuard<()>;

/// Registry of per-key mutexes
#[derive(Debug)]
pub struct KeyedLocks {
    /// Label used in logs and errors ("plan", "session")
    scope: &'static str,
    locks: DashMap<String, Arc<Mutex<()>>>,
    acquire_timeout: Duration,
}

impl KeyedLocks {
    pub fn new(scope: &'static str, acquire_timeout: Duration) -> Self {
        Self {
            scope,
            locks: DashMap::new(),
            acquire_timeout,
        }
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the lock for `key`, failing if it is not free within the timeout
    pub async fn acquire(&self, key: &str) -> Result<KeyGuard> {
        let lock = self.lock_for(key);
        match tokio::time::timeout(self.acquire_timeout, lock.lock_owned()).await {
            Ok(guard) => {
                debug!(scope = self.scope, key, "Lock acquired");
                Ok(guard)
            }
            Err(_) => {
                warn!(scope = self.scope, key, "Lock acquisition timed out");
                Err(TradeError::LockTimeout {
                    key: format!("{}:{}", self.scope, key),
                    waited_ms: self.acquire_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Acquire several locks in sorted key order.
    ///
    /// Every multi-key caller goes through here so two batches can never
    /// wait on each other. On failure all locks taken so far are released.
    pub async fn acquire_many(&self, keys: &[String]) -> Result<Vec<KeyGuard>> {
        let mut sorted: Vec<&String> = keys.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for key in sorted {
            guards.push(self.acquire(key).await?);
        }
        Ok(guards)
    }

    /// Number of keys seen so far
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_lock_is_exclusive_per_key() {
        let locks = KeyedLocks::new("plan", Duration::from_millis(50));
        let guard = locks.acquire("BTCUSDT").await.unwrap();

        // Other keys are independent
        assert_ok!(locks.acquire("ETHUSDT").await);

        let err = assert_err!(locks.acquire("BTCUSDT").await);
        assert!(matches!(err, TradeError::LockTimeout { .. }));

        drop(guard);
        assert_ok!(locks.acquire("BTCUSDT").await);
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_acquire_many_dedups_and_releases() {
        let locks = KeyedLocks::new("plan", Duration::from_millis(50));
        let keys = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        let guards = locks.acquire_many(&keys).await.unwrap();
        assert_eq!(guards.len(), 2);
        drop(guards);
        assert_ok!(locks.acquire("a").await);
    }

    #[tokio::test]
    async fn test_acquire_many_releases_on_failure() {
        let locks = KeyedLocks::new("plan", Duration::from_millis(50));
        let held = locks.acquire("b").await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string()];
        assert_err!(locks.acquire_many(&keys).await);
        // "a" was taken then released when the batch failed
        assert_ok!(locks.acquire("a").await);
        drop(held);
    }
}
