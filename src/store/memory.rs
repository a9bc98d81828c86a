//! In-Memory Ordered Store
//!
//! A thread-safe ordered map implementing [`OrderedStore`]. It backs the
//! tests and benchmarks and is a reasonable store for embedders that only
//! need process-local data.
//!
//! ## Design Decisions
//!
//! 1. **BTreeMap**: Keys stay sorted, so range scans are a plain `range()` call.
//! 2. **Single RwLock**: A batch must be atomic, which a sharded layout cannot
//!    give without taking every shard lock anyway.
//! 3. **Snapshot Iterators**: An iterator copies its range when opened, so a
//!    concurrent write never invalidates a scan in progress.

use crate::store::{BatchOp, OrderedStore, ScanRange, StoreError, StoreIterator, StoreResult};
use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// An ordered in-memory key-value store.
///
/// # Example
///
/// ```
/// use kvttl::store::{MemoryStore, OrderedStore};
/// use bytes::Bytes;
///
/// # tokio_test::block_on(async {
/// let store = MemoryStore::new();
/// store.put(Bytes::from("name"), Bytes::from("Ariz")).await.unwrap();
/// assert_eq!(store.get(b"name").await.unwrap(), Bytes::from("Ariz"));
/// # });
/// ```
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<Bytes, Bytes>>,

    closed: AtomicBool,

    /// Statistics: total point reads
    get_count: AtomicU64,

    /// Statistics: total point writes
    put_count: AtomicU64,

    /// Statistics: total point deletes
    del_count: AtomicU64,

    /// Statistics: total batches applied
    batch_count: AtomicU64,

    /// Statistics: total iterators opened
    iter_count: AtomicU64,
}

/// Operation counters for a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub keys: u64,
    pub gets: u64,
    pub puts: u64,
    pub dels: u64,
    pub batches: u64,
    pub iters: u64,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys", &self.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, BTreeMap<Bytes, Bytes>>> {
        self.ensure_open()?;
        self.data
            .read()
            .map_err(|_| StoreError::Backend(anyhow!("memory store lock poisoned")))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, BTreeMap<Bytes, Bytes>>> {
        self.ensure_open()?;
        self.data
            .write()
            .map_err(|_| StoreError::Backend(anyhow!("memory store lock poisoned")))
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Number of keys currently stored (0 once closed or poisoned).
    pub fn len(&self) -> u64 {
        self.data.read().map(|d| d.len() as u64).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a sorted copy of every entry.
    pub fn entries(&self) -> Vec<(Bytes, Bytes)> {
        self.data
            .read()
            .map(|d| d.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            keys: self.len(),
            gets: self.get_count.load(Ordering::Relaxed),
            puts: self.put_count.load(Ordering::Relaxed),
            dels: self.del_count.load(Ordering::Relaxed),
            batches: self.batch_count.load(Ordering::Relaxed),
            iters: self.iter_count.load(Ordering::Relaxed),
        }
    }
}

/// Iterator over a snapshot of a key range.
struct SnapshotIter {
    entries: std::vec::IntoIter<(Bytes, Bytes)>,
}

#[async_trait]
impl StoreIterator for SnapshotIter {
    async fn next(&mut self) -> StoreResult<Option<(Bytes, Bytes)>> {
        Ok(self.entries.next())
    }
}

#[async_trait]
impl OrderedStore for MemoryStore {
    async fn get(&self, key: &[u8]) -> StoreResult<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        self.read()?.get(key).cloned().ok_or(StoreError::NotFound)
    }

    async fn put(&self, key: Bytes, value: Bytes) -> StoreResult<()> {
        self.put_count.fetch_add(1, Ordering::Relaxed);
        self.write()?.insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.del_count.fetch_add(1, Ordering::Relaxed);
        self.write()?.remove(key);
        Ok(())
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> StoreResult<()> {
        self.batch_count.fetch_add(1, Ordering::Relaxed);

        // One write guard for the whole batch: readers see all or nothing.
        let mut data = self.write()?;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOp::Del { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn iter(&self, range: ScanRange) -> StoreResult<Box<dyn StoreIterator>> {
        self.iter_count.fetch_add(1, Ordering::Relaxed);

        let data = self.read()?;
        if range.is_empty() {
            return Ok(Box::new(SnapshotIter {
                entries: Vec::new().into_iter(),
            }));
        }
        let entries: Vec<(Bytes, Bytes)> = data
            .range::<Bytes, _>((range.start.clone(), range.end.clone()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Box::new(SnapshotIter {
            entries: entries.into_iter(),
        }))
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Bound;

    async fn collect(store: &MemoryStore, range: ScanRange) -> Vec<(Bytes, Bytes)> {
        let mut iter = store.iter(range).await.unwrap();
        let mut out = Vec::new();
        while let Some(entry) = iter.next().await.unwrap() {
            out.push(entry);
        }
        out
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();

        store.put(Bytes::from("key"), Bytes::from("value")).await.unwrap();
        assert_eq!(store.get(b"key").await.unwrap(), Bytes::from("value"));

        store.delete(b"key").await.unwrap();
        assert!(store.get(b"key").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let store = MemoryStore::new();
        store.delete(b"nonexistent").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_batch_applies_every_op() {
        let store = MemoryStore::new();
        store.put(Bytes::from("old"), Bytes::from("1")).await.unwrap();

        store
            .batch(vec![
                BatchOp::put("a", "1"),
                BatchOp::put("b", "2"),
                BatchOp::del("old"),
            ])
            .await
            .unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.get(b"old").await.unwrap_err().is_not_found());
        assert_eq!(store.stats().batches, 1);
    }

    #[tokio::test]
    async fn test_iter_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        for key in ["d", "a", "c", "b", "e"] {
            store.put(Bytes::from(key), Bytes::from(key)).await.unwrap();
        }

        let keys: Vec<Bytes> = collect(&store, ScanRange::half_open("b", "e"))
            .await
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["b", "c", "d"]);

        let inclusive = ScanRange {
            start: Bound::Excluded(Bytes::from("a")),
            end: Bound::Included(Bytes::from("e")),
        };
        assert_eq!(collect(&store, inclusive).await.len(), 4);
        assert_eq!(collect(&store, ScanRange::all()).await.len(), 5);
    }

    #[tokio::test]
    async fn test_iter_is_a_snapshot() {
        let store = MemoryStore::new();
        store.put(Bytes::from("a"), Bytes::from("1")).await.unwrap();

        let mut iter = store.iter(ScanRange::all()).await.unwrap();
        store.put(Bytes::from("b"), Bytes::from("2")).await.unwrap();

        assert!(iter.next().await.unwrap().is_some());
        assert!(iter.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let store = MemoryStore::new();
        store.close().await.unwrap();

        assert!(store.is_closed());
        assert!(matches!(store.get(b"k").await, Err(StoreError::Closed)));
        assert!(matches!(
            store.put(Bytes::from("k"), Bytes::from("v")).await,
            Err(StoreError::Closed)
        ));
        assert!(store.iter(ScanRange::all()).await.is_err());
    }
}
