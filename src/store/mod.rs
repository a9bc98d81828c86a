//! Ordered Store Contract
//!
//! This module defines what the TTL layer needs from the key-value store
//! underneath it, plus two implementations of that contract.
//!
//! ## What a Store Must Provide
//!
//! - Point reads, writes and deletes, with a distinguishable not-found error
//! - An atomic batch of puts and deletes, applied all-or-nothing
//! - An ascending range iterator bounded by inclusive or exclusive keys
//!
//! ## Implementations
//!
//! ```text
//! ┌──────────────────────────────┐
//! │        OrderedStore          │  (trait)
//! └──────┬───────────────┬───────┘
//!        │               │
//!        ▼               ▼
//! ┌─────────────┐  ┌─────────────┐
//! │ MemoryStore │  │  Sublevel   │──> wraps any other OrderedStore
//! │  (BTreeMap) │  │  (prefix)   │
//! └─────────────┘  └─────────────┘
//! ```

pub mod memory;
pub mod sublevel;

use async_trait::async_trait;
use bytes::Bytes;
use std::ops::Bound;
use thiserror::Error;

pub use memory::{MemoryStore, StoreStats};
pub use sublevel::Sublevel;

/// Errors reported by an [`OrderedStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested key does not exist
    #[error("key not found")]
    NotFound,

    /// The store has been closed
    #[error("store is closed")]
    Closed,

    /// Any other failure of the backing store
    #[error("store failure: {0}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    /// Returns `true` for the expected "no such key" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// One entry of an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Bytes, value: Bytes },
    Del { key: Bytes },
}

impl BatchOp {
    pub fn put(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        BatchOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn del(key: impl Into<Bytes>) -> Self {
        BatchOp::Del { key: key.into() }
    }

    /// The key this entry touches.
    pub fn key(&self) -> &Bytes {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Del { key } => key,
        }
    }
}

/// Key bounds for a range scan, in the store's native byte ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRange {
    pub start: Bound<Bytes>,
    pub end: Bound<Bytes>,
}

impl ScanRange {
    /// Every key in the store.
    pub fn all() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// `[start, end)`
    pub fn half_open(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self {
            start: Bound::Included(start.into()),
            end: Bound::Excluded(end.into()),
        }
    }

    /// Returns `true` if no key can satisfy both bounds.
    pub fn is_empty(&self) -> bool {
        match (&self.start, &self.end) {
            (Bound::Included(s), Bound::Included(e)) => s > e,
            (Bound::Included(s), Bound::Excluded(e))
            | (Bound::Excluded(s), Bound::Included(e))
            | (Bound::Excluded(s), Bound::Excluded(e)) => s >= e,
            _ => false,
        }
    }

    /// Returns `true` if `key` falls inside the bounds.
    pub fn contains(&self, key: &[u8]) -> bool {
        let above = match &self.start {
            Bound::Included(s) => key >= s.as_ref(),
            Bound::Excluded(s) => key > s.as_ref(),
            Bound::Unbounded => true,
        };
        let below = match &self.end {
            Bound::Included(e) => key <= e.as_ref(),
            Bound::Excluded(e) => key < e.as_ref(),
            Bound::Unbounded => true,
        };
        above && below
    }
}

/// An ascending cursor over a key range.
///
/// `next` returns `Ok(None)` once the end of the range is reached.
/// Dropping the iterator closes it.
#[async_trait]
pub trait StoreIterator: Send {
    async fn next(&mut self) -> StoreResult<Option<(Bytes, Bytes)>>;
}

/// An ordered key-value store.
///
/// Implementations must be safe to share across tasks; every method may
/// suspend and calls may interleave arbitrarily.
#[async_trait]
pub trait OrderedStore: Send + Sync {
    /// Reads a key. Missing keys yield [`StoreError::NotFound`].
    async fn get(&self, key: &[u8]) -> StoreResult<Bytes>;

    async fn put(&self, key: Bytes, value: Bytes) -> StoreResult<()>;

    /// Deletes a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &[u8]) -> StoreResult<()>;

    /// Applies every entry or none of them.
    async fn batch(&self, ops: Vec<BatchOp>) -> StoreResult<()>;

    /// Opens an ascending iterator over `range`.
    async fn iter(&self, range: ScanRange) -> StoreResult<Box<dyn StoreIterator>>;

    /// Releases the store. Later calls may fail with [`StoreError::Closed`].
    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_range_contains() {
        let range = ScanRange::half_open("b", "d");
        assert!(!range.contains(b"a"));
        assert!(range.contains(b"b"));
        assert!(range.contains(b"c"));
        assert!(range.contains(b"cz"));
        assert!(!range.contains(b"d"));

        assert!(!range.is_empty());
        assert!(ScanRange::half_open("d", "b").is_empty());
        assert!(ScanRange::half_open("b", "b").is_empty());

        assert!(ScanRange::all().contains(b""));
        assert!(ScanRange::all().contains(b"\xff\xff"));
    }

    #[test]
    fn test_not_found_is_distinguishable() {
        assert!(StoreError::NotFound.is_not_found());
        assert!(!StoreError::Closed.is_not_found());
        assert!(!StoreError::Backend(anyhow::anyhow!("disk full")).is_not_found());
    }

    #[test]
    fn test_batch_op_key() {
        assert_eq!(BatchOp::put("k", "v").key(), &Bytes::from("k"));
        assert_eq!(BatchOp::del("k").key(), &Bytes::from("k"));
    }
}
