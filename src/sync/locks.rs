//! Trip-scoped async locks

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Hands out one lock per key; entries die with their last guard
#[derive(Default)]
pub struct TripLocks {
    locks: Mutex<HashMap<Uuid, Weak<Mutex<()>>>>,
}

impl TripLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other holder of `key` is left
    pub async fn acquire(&self, key: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, weak| weak.strong_count() > 0);

            match locks.get(&key).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(Mutex::new(()));
                    locks.insert(key, Arc::downgrade(&lock));
                    lock
                }
            }
        };

        lock.lock_owned().await
    }

    /// Keys with a live holder or waiter
    pub async fn held(&self) -> usize {
        let locks = self.locks.lock().await;
        locks.values().filter(|weak| weak.strong_count() > 0).count()
    }
}
