use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// In-process locks keyed by logical document name. Writers to the same key
/// run one at a time in arrival order; different keys do not contend.
///
/// This does not coordinate separate processes sharing a data directory.
#[derive(Debug, Clone, Default)]
pub struct LockRegistry {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

/// Held for the duration of a document operation; dropping it releases the key.
pub struct KeyGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub async fn acquire(&self, key: &str) -> KeyGuard {
        let mutex = self.entry(key);
        let guard = mutex.lock_owned().await;
        log::trace!("Acquired store lock for {}", key);
        KeyGuard {
            key: key.to_string(),
            _guard: guard,
        }
    }

    pub fn is_locked(&self, key: &str) -> bool {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .get(key)
            .map(|m| m.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Drops entries nobody is holding or waiting on.
    pub fn reset(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, m| Arc::strong_count(m) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let registry = LockRegistry::new();
        let guard = registry.acquire("history.json").await;
        assert!(registry.is_locked("history.json"));
        assert_eq!(guard.key(), "history.json");

        let other = registry.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.acquire("history.json").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(!registry.is_locked("history.json"));
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let registry = LockRegistry::new();
        let _a = registry.acquire("history.json").await;
        let _b = tokio::time::timeout(Duration::from_millis(100), registry.acquire("presets.json"))
            .await
            .expect("different key should not block");
    }

    #[tokio::test]
    async fn test_reset_drops_idle_entries() {
        let registry = LockRegistry::new();
        {
            let _g = registry.acquire("settings.json").await;
        }
        let held = registry.acquire("history.json").await;
        registry.reset();
        assert_eq!(registry.len(), 1);
        drop(held);
        registry.reset();
        assert!(registry.is_empty());
    }
}
