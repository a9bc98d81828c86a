//! Arm and Disarm
//!
//! The two mutations of expiry metadata:
//!
//! - **Arm** writes a forward pointer and an expiry index entry for each key,
//!   after disarming whatever was there before. Re-arming a key therefore
//!   moves its deadline instead of adding a second one.
//! - **Disarm** reads each key's forward pointer and deletes it together with
//!   the index entry it points at. Keys without a pointer are skipped.
//!
//! Both come in two flavours: `arm`/`disarm` take the key locks themselves,
//! `arm_locked`/`disarm_locked` run on guards the caller already holds. The
//! guards are the only way to name keys to the locked variants, so metadata
//! can't be touched without the lock.

use crate::store::{BatchOp, OrderedStore, StoreError, StoreResult};
use crate::ttl::error::{TtlError, TtlResult};
use crate::ttl::layout::KeyLayout;
use crate::ttl::lock::{KeyGuard, KeyLocks};
use crate::ttl::now_millis;
use anyhow::anyhow;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Whole milliseconds in `ttl`, rounded up to at least one.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Expiry metadata for one store.
#[derive(Clone)]
pub struct Metadata {
    store: Arc<dyn OrderedStore>,
    layout: KeyLayout,
    locks: KeyLocks,
}

impl std::fmt::Debug for Metadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metadata")
            .field("layout", &self.layout)
            .field("locked_keys", &self.locks.active())
            .finish()
    }
}

impl Metadata {
    pub fn new(store: Arc<dyn OrderedStore>, layout: KeyLayout, locks: KeyLocks) -> Self {
        Self {
            store,
            layout,
            locks,
        }
    }

    pub fn store(&self) -> &Arc<dyn OrderedStore> {
        &self.store
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    pub fn locks(&self) -> &KeyLocks {
        &self.locks
    }

    /// Locks `keys` and arms them with `ttl`.
    pub async fn arm(&self, keys: Vec<Bytes>, ttl: Duration) -> TtlResult<()> {
        if keys.is_empty() || ttl.is_zero() {
            return Ok(());
        }
        let guards = self.locks.lock_many(keys).await;
        self.arm_locked(&guards, ttl).await
    }

    /// Locks `keys` and disarms them.
    pub async fn disarm(&self, keys: Vec<Bytes>) -> TtlResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let guards = self.locks.lock_many(keys).await;
        self.disarm_locked(&guards).await
    }

    /// Replaces any existing expiry of the guarded keys with `now + ttl`.
    ///
    /// A zero `ttl` arms nothing. If disarming the old expiry fails the new
    /// one is not written, since that could leave two index entries behind.
    pub async fn arm_locked(&self, guards: &[KeyGuard], ttl: Duration) -> TtlResult<()> {
        if guards.is_empty() || ttl.is_zero() {
            return Ok(());
        }

        self.disarm_locked(guards).await?;

        let expires_at = now_millis().saturating_add(ttl_millis(ttl));
        let expiry_value = self.layout.encode_expiry(expires_at)?;

        let mut batch = Vec::with_capacity(guards.len() * 2);
        for guard in guards {
            let key = guard.key();
            batch.push(BatchOp::Put {
                key: self.layout.expiry_key(expires_at, key)?,
                value: self.layout.encode_key(key)?,
            });
            batch.push(BatchOp::Put {
                key: self.layout.forward_key(key)?,
                value: expiry_value.clone(),
            });
        }

        self.store.batch(batch).await?;
        debug!(keys = guards.len(), expires_at, "Armed expiry");
        Ok(())
    }

    /// Removes the forward pointer and index entry of every guarded key.
    ///
    /// Keys that were never armed are skipped. Pairs that could be read are
    /// deleted even when another key's read failed; the first failure is
    /// returned afterwards.
    pub async fn disarm_locked(&self, guards: &[KeyGuard]) -> TtlResult<()> {
        if guards.is_empty() {
            return Ok(());
        }

        let keys: Vec<Bytes> = guards.iter().map(|g| g.key().clone()).collect();
        let pointers = self.read_pointers(&keys).await?;

        let mut batch = Vec::new();
        let mut first_error: Option<TtlError> = None;

        for (key, slot) in keys.iter().zip(pointers) {
            let Some((forward, pointer)) = slot else {
                continue;
            };
            match pointer {
                Ok(raw) => match self.layout.decode_expiry(&raw) {
                    Ok(expires_at) => {
                        batch.push(BatchOp::Del {
                            key: self.layout.expiry_key(expires_at, key)?,
                        });
                        batch.push(BatchOp::Del { key: forward });
                    }
                    Err(e) => {
                        warn!(key = ?key, error = %e, "Unreadable forward pointer");
                        first_error.get_or_insert(e.into());
                    }
                },
                Err(StoreError::NotFound) => {}
                Err(e) => {
                    first_error.get_or_insert(e.into());
                }
            }
        }

        if !batch.is_empty() {
            let removed = batch.len() / 2;
            if let Err(e) = self.store.batch(batch).await {
                first_error.get_or_insert(e.into());
            } else {
                debug!(keys = removed, "Disarmed expiry");
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Reads the forward pointers of `keys` concurrently.
    ///
    /// Returns `(forward key, read result)` in the order of `keys`, or `None`
    /// for a key the layout cannot encode. Such a key can never have been
    /// armed.
    pub(crate) async fn read_pointers(
        &self,
        keys: &[Bytes],
    ) -> TtlResult<Vec<Option<(Bytes, StoreResult<Bytes>)>>> {
        let forwards: Vec<Option<Bytes>> = keys
            .iter()
            .map(|key| self.layout.forward_key(key).ok())
            .collect();

        let mut reads = JoinSet::new();
        for (i, forward) in forwards.iter().enumerate() {
            let Some(forward) = forward.clone() else {
                continue;
            };
            let store = Arc::clone(&self.store);
            reads.spawn(async move { (i, store.get(&forward).await) });
        }

        let mut results: Vec<Option<StoreResult<Bytes>>> = (0..keys.len()).map(|_| None).collect();
        while let Some(joined) = reads.join_next().await {
            let (i, result) = joined.map_err(|e| StoreError::Backend(anyhow!(e)))?;
            results[i] = Some(result);
        }

        Ok(forwards
            .into_iter()
            .zip(results)
            .map(|(forward, result)| {
                forward.map(|forward| {
                    let result = result
                        .unwrap_or_else(|| Err(StoreError::Backend(anyhow!("read was lost"))));
                    (forward, result)
                })
            })
            .collect())
    }

    /// Checks that `key` can carry an expiry of `ttl` from now.
    ///
    /// Callers run this before writing anything, so a key that cannot be
    /// armed is rejected without a partial write.
    pub fn check_armable(&self, key: &[u8], ttl: Duration) -> TtlResult<()> {
        let expires_at = now_millis().saturating_add(ttl_millis(ttl));
        self.layout
            .forward_key(key)
            .and_then(|_| self.layout.expiry_key(expires_at, key))
            .map(|_| ())
            .map_err(|e| {
                TtlError::InvalidArgument(format!(
                    "key {:?} cannot carry a TTL: {e}",
                    String::from_utf8_lossy(key)
                ))
            })
    }

    /// Current expiry instant of `key`, if it is armed.
    pub async fn expires_at(&self, key: &[u8]) -> TtlResult<Option<u64>> {
        let Ok(forward) = self.layout.forward_key(key) else {
            return Ok(None);
        };
        match self.store.get(&forward).await {
            Ok(raw) => Ok(Some(self.layout.decode_expiry(&raw)?)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
