//! Sub-Namespace View
//!
//! A [`Sublevel`] exposes a slice of another store as if it were a store of
//! its own. Every key is stored under `!name!` in the parent, and scans never
//! leave that prefix, so data kept in a sublevel cannot collide with keys
//! written directly to the parent.

use crate::store::{BatchOp, OrderedStore, ScanRange, StoreIterator, StoreResult};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::ops::Bound;
use std::sync::Arc;

const DELIMITER: u8 = b'!';

/// A prefixed view over a parent [`OrderedStore`].
///
/// # Example
///
/// ```
/// use kvttl::store::{MemoryStore, OrderedStore, Sublevel};
/// use bytes::Bytes;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let parent = Arc::new(MemoryStore::new());
/// let meta = Sublevel::new(parent.clone(), "meta");
///
/// meta.put(Bytes::from("k"), Bytes::from("v")).await.unwrap();
/// assert_eq!(parent.get(b"!meta!k").await.unwrap(), Bytes::from("v"));
/// # });
/// ```
#[derive(Clone)]
pub struct Sublevel {
    parent: Arc<dyn OrderedStore>,
    prefix: Bytes,
}

impl std::fmt::Debug for Sublevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sublevel")
            .field("prefix", &String::from_utf8_lossy(&self.prefix))
            .finish()
    }
}

impl Sublevel {
    /// Creates a view over `parent` for the namespace `name`.
    pub fn new(parent: Arc<dyn OrderedStore>, name: &str) -> Self {
        let mut prefix = BytesMut::with_capacity(name.len() + 2);
        prefix.put_u8(DELIMITER);
        prefix.put_slice(name.as_bytes());
        prefix.put_u8(DELIMITER);

        Self {
            parent,
            prefix: prefix.freeze(),
        }
    }

    /// The raw prefix applied to every key.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    fn outer(&self, key: &[u8]) -> Bytes {
        let mut full = BytesMut::with_capacity(self.prefix.len() + key.len());
        full.put_slice(&self.prefix);
        full.put_slice(key);
        full.freeze()
    }

    /// First key past the namespace: the prefix with its closing delimiter bumped.
    fn upper_limit(&self) -> Bytes {
        let mut limit = BytesMut::from(&self.prefix[..]);
        let last = limit.len() - 1;
        limit[last] = DELIMITER + 1;
        limit.freeze()
    }

    fn outer_range(&self, range: ScanRange) -> ScanRange {
        let start = match range.start {
            Bound::Included(k) => Bound::Included(self.outer(&k)),
            Bound::Excluded(k) => Bound::Excluded(self.outer(&k)),
            Bound::Unbounded => Bound::Included(self.prefix.clone()),
        };
        let end = match range.end {
            Bound::Included(k) => Bound::Included(self.outer(&k)),
            Bound::Excluded(k) => Bound::Excluded(self.outer(&k)),
            Bound::Unbounded => Bound::Excluded(self.upper_limit()),
        };
        ScanRange { start, end }
    }
}

/// Strips the namespace prefix from every key the parent yields.
struct SublevelIter {
    inner: Box<dyn StoreIterator>,
    prefix_len: usize,
}

#[async_trait]
impl StoreIterator for SublevelIter {
    async fn next(&mut self) -> StoreResult<Option<(Bytes, Bytes)>> {
        Ok(self
            .inner
            .next()
            .await?
            .map(|(key, value)| (key.slice(self.prefix_len..), value)))
    }
}

#[async_trait]
impl OrderedStore for Sublevel {
    async fn get(&self, key: &[u8]) -> StoreResult<Bytes> {
        self.parent.get(&self.outer(key)).await
    }

    async fn put(&self, key: Bytes, value: Bytes) -> StoreResult<()> {
        self.parent.put(self.outer(&key), value).await
    }

    async fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.parent.delete(&self.outer(key)).await
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> StoreResult<()> {
        let ops = ops
            .into_iter()
            .map(|op| match op {
                BatchOp::Put { key, value } => BatchOp::Put {
                    key: self.outer(&key),
                    value,
                },
                BatchOp::Del { key } => BatchOp::Del {
                    key: self.outer(&key),
                },
            })
            .collect();
        self.parent.batch(ops).await
    }

    async fn iter(&self, range: ScanRange) -> StoreResult<Box<dyn StoreIterator>> {
        let inner = self.parent.iter(self.outer_range(range)).await?;
        Ok(Box::new(SublevelIter {
            inner,
            prefix_len: self.prefix.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn keys(store: &dyn OrderedStore, range: ScanRange) -> Vec<Bytes> {
        let mut iter = store.iter(range).await.unwrap();
        let mut out = Vec::new();
        while let Some((key, _)) = iter.next().await.unwrap() {
            out.push(key);
        }
        out
    }

    #[tokio::test]
    async fn test_keys_are_prefixed_in_parent() {
        let parent = Arc::new(MemoryStore::new());
        let sub = Sublevel::new(parent.clone(), "ttl");

        sub.put(Bytes::from("a"), Bytes::from("1")).await.unwrap();
        sub.batch(vec![BatchOp::put("b", "2"), BatchOp::del("a")])
            .await
            .unwrap();

        let entries = parent.entries();
        assert_eq!(entries, vec![(Bytes::from("!ttl!b"), Bytes::from("2"))]);
        assert_eq!(sub.get(b"b").await.unwrap(), Bytes::from("2"));
        assert!(sub.get(b"a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_scan_stays_inside_namespace() {
        let parent = Arc::new(MemoryStore::new());
        let sub = Sublevel::new(parent.clone(), "ttl");

        parent.put(Bytes::from("!ttk!z"), Bytes::new()).await.unwrap();
        parent.put(Bytes::from("!ttm!a"), Bytes::new()).await.unwrap();
        parent.put(Bytes::from("plain"), Bytes::new()).await.unwrap();
        sub.put(Bytes::from("x"), Bytes::new()).await.unwrap();
        sub.put(Bytes::from("y"), Bytes::new()).await.unwrap();

        assert_eq!(keys(&sub, ScanRange::all()).await, vec!["x", "y"]);
        assert_eq!(keys(&sub, ScanRange::half_open("a", "y")).await, vec!["x"]);
    }

    #[tokio::test]
    async fn test_missing_key_reports_not_found() {
        let sub = Sublevel::new(Arc::new(MemoryStore::new()), "meta");
        assert!(sub.get(b"nope").await.unwrap_err().is_not_found());
        sub.delete(b"nope").await.unwrap();
    }
}
