//! Expiring Keys
//!
//! This module adds time-to-live semantics on top of any [`OrderedStore`].
//! Arming a key writes two metadata entries next to it:
//!
//! ```text
//! ┌────────────────────┐        ┌──────────────────────────┐
//! │  forward pointer   │        │   expiry index entry     │
//! │  !ttl!bar -> e     │<──────>│   !ttl!x!e!bar -> bar    │
//! └────────────────────┘        └──────────────────────────┘
//!                                            ▲
//!                                            │ range scan [.., now]
//!                               ┌────────────┴─────────────┐
//!                               │        Sweeper           │
//!                               │  (Background Tokio Task) │
//!                               └──────────────────────────┘
//! ```
//!
//! For every armed key exactly one pointer and one index entry exist, and
//! they agree on the expiry instant. Every mutation of the pair runs under
//! the key's lock from [`lock`], which is what keeps that true when arms,
//! disarms and sweeps of the same key race.
//!
//! [`OrderedStore`]: crate::store::OrderedStore

pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod layout;
pub mod lock;
pub mod meta;
pub mod sweeper;

pub use codec::{BinaryCodec, CodecError, Element, KeyCodec, SeparatorCodec};
pub use config::{TtlOptions, WriteOptions};
pub use db::TtlDb;
pub use error::{TtlError, TtlResult};
pub use layout::KeyLayout;
pub use lock::{KeyGuard, KeyLocks};
pub use meta::Metadata;
pub use sweeper::{SweepStats, Sweeper};

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, or 0 if the clock is set before it.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
