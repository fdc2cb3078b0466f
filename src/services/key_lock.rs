//! Per-key mutual exclusion for file lifecycle operations.
//!
//! Operations on the same `file_id` run one at a time; different keys never
//! contend. Entries are dropped from the table once nobody holds or awaits them.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One key's mutex and the number of tasks holding or awaiting it.
#[derive(Default)]
struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    users: usize,
}

type LockTable = Arc<Mutex<HashMap<String, Slot>>>;

#[derive(Clone, Default)]
pub struct KeyLocks {
    table: LockTable,
}

/// Held for the duration of a critical section on one key.
pub struct KeyGuard {
    // Fields drop in order: the mutex is released before the slot is counted down.
    _guard: OwnedMutexGuard<()>,
    _user: SlotUser,
}

/// One registered holder or waiter. Dropping it, including when a waiting
/// `lock()` future is cancelled, counts the slot down and removes it at zero.
struct SlotUser {
    key: String,
    table: LockTable,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` is free and take it.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let (mutex, user) = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = table.entry(key.to_string()).or_default();
            slot.users += 1;
            let user = SlotUser {
                key: key.to_string(),
                table: self.table.clone(),
            };
            (slot.mutex.clone(), user)
        };
        let guard = mutex.lock_owned().await;
        KeyGuard {
            _guard: guard,
            _user: user,
        }
    }

    /// Number of keys currently held or awaited.
    pub fn active(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for SlotUser {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = table.get_mut(&self.key) {
            slot.users -= 1;
            if slot.users == 0 {
                table.remove(&self.key);
            }
        }
    }
}
