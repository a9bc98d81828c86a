//! Per-Key Lock Coordinator
//!
//! Every metadata mutation for an original key runs while holding that key's
//! guard, so a disarm (read pointer, delete pair) can never interleave with
//! an arm (write pair) or a sweep of the same key.
//!
//! ## Design
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Mutex<HashMap<Bytes, Arc<tokio::Mutex<()>>>> │
//! └──────────────────────┬──────────────────────┘
//!                        │ lazily created per key
//!                        ▼
//!                 ┌─────────────┐
//!                 │  KeyGuard   │  released on drop, entry removed
//!                 └─────────────┘  when nobody else is waiting
//! ```
//!
//! tokio's mutex queues waiters in FIFO order, so operations on one key take
//! effect in the order they acquired the lock. Guards for several keys are
//! always taken in sorted order, which rules out lock-order deadlocks between
//! overlapping batches.

use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

type LockTable = Mutex<HashMap<Bytes, Arc<AsyncMutex<()>>>>;

/// The table holds no invariant a panic could break, so a poisoned lock is
/// used as is.
fn lock_table(table: &LockTable) -> MutexGuard<'_, HashMap<Bytes, Arc<AsyncMutex<()>>>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Hands out per-key guards. Cloning shares the same table.
#[derive(Debug, Clone, Default)]
pub struct KeyLocks {
    table: Arc<LockTable>,
}

/// Exclusive access to one key's metadata until dropped.
#[derive(Debug)]
pub struct KeyGuard {
    key: Bytes,
    table: Arc<LockTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyGuard {
    pub fn key(&self) -> &Bytes {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };

        // Under the table lock nobody can clone the entry, so a count of two
        // (table + our guard) means no one is queued behind us.
        let mut table = lock_table(&self.table);
        if let Some(entry) = table.get(&self.key) {
            if Arc::strong_count(entry) <= 2 {
                table.remove(&self.key);
            }
        }
        drop(table);
        drop(guard);
    }
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &Bytes) -> Arc<AsyncMutex<()>> {
        let mut table = lock_table(&self.table);
        table
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Waits for exclusive access to `key`.
    pub async fn lock(&self, key: Bytes) -> KeyGuard {
        let mutex = self.entry(&key);
        let guard = mutex.lock_owned().await;
        trace!(key = ?key, "Key lock acquired");

        KeyGuard {
            key,
            table: Arc::clone(&self.table),
            guard: Some(guard),
        }
    }

    /// Locks every distinct key in ascending order.
    ///
    /// Duplicates are collapsed, so the same key listed twice does not
    /// deadlock against itself.
    pub async fn lock_many<I>(&self, keys: I) -> Vec<KeyGuard>
    where
        I: IntoIterator<Item = Bytes>,
    {
        let ordered: BTreeSet<Bytes> = keys.into_iter().collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for key in ordered {
            guards.push(self.lock(key).await);
        }
        guards
    }

    /// Number of keys with a live lock entry.
    pub fn active(&self) -> usize {
        lock_table(&self.table).len()
    }
}
