use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-key async mutual exclusion within one process.
///
/// Same-key sections run one at a time in arrival order; different keys
/// never contend. A key's lock is dropped from the map once nobody holds or
/// waits on it.
pub struct KeyedMutex<K: Eq + Hash + Clone> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> KeyedMutex<K> {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Run `fut` while holding the lock for `key`.
    pub async fn run_exclusive<F, T>(&self, key: &K, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let mut held = Held {
            locks: &self.locks,
            key,
            lock: lock.clone(),
            guard: None,
        };
        held.guard = Some(lock.lock_owned().await);

        fut.await
    }

    /// Number of keys with a holder or waiter.
    pub fn active_keys(&self) -> usize {
        self.locks.len()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedMutex<K> {
    fn default() -> Self {
        Self::new()
    }
}

struct Held<'a, K: Eq + Hash + Clone> {
    locks: &'a DashMap<K, Arc<Mutex<()>>>,
    key: &'a K,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> Drop for Held<'_, K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // One reference in the map plus ours: nobody else is queued.
        self.locks
            .remove_if(self.key, |_, lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2);
    }
}
