//! # kvttl - Expiring Keys for Ordered Key-Value Stores
//!
//! kvttl adds time-to-live semantics to an ordered key-value store that has
//! none of its own. Any store offering point reads and writes, atomic batches
//! and ascending range scans can be wrapped; keys written with a TTL are
//! removed by a background sweeper once their deadline passes.
//!
//! ## Features
//!
//! - **Store-Agnostic**: Works over anything implementing [`OrderedStore`]
//! - **Index-Driven Expiry**: Expired keys are found with one range scan, not a full walk
//! - **Race-Free Metadata**: Per-key locks keep exactly one expiry per key
//! - **Pluggable Key Encoding**: Readable separator paths or a binary tuple codec
//! - **Async**: Built on Tokio; the sweeper is a background task
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                 TtlDb                                   │
//! │        put / del / batch / set_ttl / persist / stop / close             │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │  KeyLocks   │───>│  Metadata   │───>│  KeyLayout  │──> KeyCodec      │
//! │  │ (per key)   │    │ arm/disarm  │    │  (keys)     │                  │
//! │  └─────────────┘    └──────┬──────┘    └─────────────┘                  │
//! │                            │                                            │
//! │                            ▼                                            │
//! │  ┌──────────────────────────────────────────────────────────────────┐   │
//! │  │                OrderedStore (primary / sub-namespace)            │   │
//! │  └──────────────────────────────────────────────────────────────────┘   │
//! │                            ▲                                            │
//! │                            │                                            │
//! │  ┌─────────────────────────┴───────────────────────────────────────┐    │
//! │  │                           Sweeper                               │    │
//! │  │                    (Background Tokio Task)                      │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use kvttl::store::MemoryStore;
//! use kvttl::{TtlDb, TtlOptions, WriteOptions};
//! use bytes::Bytes;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     let db = TtlDb::new(store, TtlOptions::default().with_check_frequency(Duration::from_secs(1)))?;
//!
//!     db.put(Bytes::from("session"), Bytes::from("token"), WriteOptions::ttl(Duration::from_secs(30)))
//!         .await?;
//!
//!     db.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`store`]: The ordered store contract, an in-memory store and sub-namespaces
//! - [`ttl`]: Codecs, key layout, locks, arm/disarm, the sweeper and [`TtlDb`]
//!
//! ## Key Format
//!
//! With the default options an armed key `bar` expiring at `e` (milliseconds
//! since the Unix epoch) is accompanied by
//!
//! ```text
//! !ttl!bar                  -> 1700000000100
//! !ttl!x!1700000000100!bar  -> bar
//! ```
//!
//! The format is stable: changing the namespace, separator or codec of an
//! existing store orphans its metadata.

pub mod store;
pub mod ttl;

// Re-export commonly used types for convenience
pub use store::{BatchOp, MemoryStore, OrderedStore, ScanRange, StoreError, Sublevel};
pub use ttl::{
    BinaryCodec, KeyCodec, SeparatorCodec, SweepStats, TtlDb, TtlError, TtlOptions, TtlResult,
    WriteOptions,
};

/// Version of kvttl
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
