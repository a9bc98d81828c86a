//! TTL-Aware Store
//!
//! [`TtlDb`] wraps an [`OrderedStore`] and keeps expiry metadata in step with
//! the writes passing through it:
//!
//! | operation  | store call | metadata                                  |
//! |------------|------------|-------------------------------------------|
//! | `put`      | put        | arm when a TTL applies                    |
//! | `del`      | delete     | disarm                                    |
//! | `batch`    | batch      | arm puts when a TTL applies, disarm dels  |
//! | `set_ttl`  | -          | arm                                       |
//! | `persist`  | -          | disarm                                    |
//!
//! A `put` without a TTL leaves an existing expiry in place.

use crate::store::{BatchOp, OrderedStore, StoreError};
use crate::ttl::config::{TtlOptions, WriteOptions};
use crate::ttl::error::{TtlError, TtlResult};
use crate::ttl::layout::KeyLayout;
use crate::ttl::lock::KeyGuard;
use crate::ttl::meta::Metadata;
use crate::ttl::now_millis;
use crate::ttl::sweeper::{SweepContext, SweepStats, Sweeper};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Capacity of the sweeper error channel.
const ERROR_CHANNEL_CAPACITY: usize = 64;

struct Inner {
    db: Arc<dyn OrderedStore>,
    meta: Metadata,
    default_ttl: Option<Duration>,
    sweeper: Sweeper,
    errors: broadcast::Sender<Arc<TtlError>>,
}

/// An ordered store whose keys can expire.
///
/// Cloning is cheap and shares the same metadata, locks and sweeper. The
/// sweeper stops once the last clone is dropped or [`TtlDb::stop`] is called.
///
/// # Example
///
/// ```
/// use kvttl::store::{MemoryStore, OrderedStore};
/// use kvttl::ttl::{TtlDb, TtlOptions, WriteOptions};
/// use bytes::Bytes;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let store = Arc::new(MemoryStore::new());
/// let db = TtlDb::new(store, TtlOptions::default()).unwrap();
///
/// db.put(
///     Bytes::from("session"),
///     Bytes::from("token123"),
///     WriteOptions::ttl(Duration::from_secs(3600)),
/// )
/// .await
/// .unwrap();
///
/// assert!(db.ttl_remaining(b"session").await.unwrap().is_some());
/// db.close().await.unwrap();
/// # });
/// ```
#[derive(Clone)]
pub struct TtlDb {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TtlDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlDb")
            .field("meta", &self.inner.meta)
            .field("default_ttl", &self.inner.default_ttl)
            .field("sweeper", &self.inner.sweeper)
            .finish()
    }
}

fn require_key(op: &str, key: &[u8]) -> TtlResult<()> {
    if key.is_empty() {
        return Err(TtlError::InvalidArgument(format!(
            "{op}() requires a non-empty key"
        )));
    }
    Ok(())
}

/// Reports the first failure among results that completed independently.
fn first_error(results: impl IntoIterator<Item = TtlResult<()>>) -> TtlResult<()> {
    results.into_iter().collect::<TtlResult<Vec<()>>>().map(|_| ())
}

impl TtlDb {
    /// Wraps `db` and starts the sweeper on the current tokio runtime.
    pub fn new(db: Arc<dyn OrderedStore>, options: TtlOptions) -> TtlResult<Self> {
        options.validate()?;

        let layout = options.layout();
        let (meta_store, separate) = match &options.sub {
            Some(sub) => (Arc::clone(sub), true),
            None => (Arc::clone(&db), false),
        };
        let meta = Metadata::new(meta_store, layout, Default::default());
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);

        let sweeper = Sweeper::start(
            SweepContext {
                meta: meta.clone(),
                primary: Arc::clone(&db),
                separate,
                errors: errors.clone(),
            },
            options.check_frequency,
        );

        info!(options = ?options, "TTL layer initialized");

        Ok(Self {
            inner: Arc::new(Inner {
                db,
                meta,
                default_ttl: options.effective_default_ttl(),
                sweeper,
                errors,
            }),
        })
    }

    /// The wrapped store.
    pub fn store(&self) -> &Arc<dyn OrderedStore> {
        &self.inner.db
    }

    pub fn layout(&self) -> &KeyLayout {
        self.inner.meta.layout()
    }

    /// Receives errors from background sweeps.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<Arc<TtlError>> {
        self.inner.errors.subscribe()
    }

    pub async fn get(&self, key: &[u8]) -> TtlResult<Bytes> {
        Ok(self.inner.db.get(key).await?)
    }

    /// Writes `key`, arming it when `options` or the default names a TTL.
    pub async fn put(&self, key: Bytes, value: Bytes, options: WriteOptions) -> TtlResult<()> {
        require_key("put", &key)?;

        let Some(ttl) = options.resolve(self.inner.default_ttl) else {
            return Ok(self.inner.db.put(key, value).await?);
        };

        self.inner.meta.check_armable(&key, ttl)?;

        let guard = self.inner.meta.locks().lock(key.clone()).await;
        let (armed, written) = tokio::join!(
            self.inner
                .meta
                .arm_locked(std::slice::from_ref(&guard), ttl),
            self.inner.db.put(key, value),
        );
        first_error([armed, written.map_err(TtlError::from)])
    }

    /// Deletes `key` along with its expiry metadata.
    pub async fn del(&self, key: Bytes) -> TtlResult<()> {
        require_key("del", &key)?;

        let guard = self.inner.meta.locks().lock(key.clone()).await;
        let (disarmed, deleted) = tokio::join!(
            self.inner
                .meta
                .disarm_locked(std::slice::from_ref(&guard)),
            self.inner.db.delete(&key),
        );
        first_error([disarmed, deleted.map_err(TtlError::from)])
    }

    /// Applies `ops` atomically to the store.
    ///
    /// Put keys are armed when a TTL applies; deleted keys are always
    /// disarmed. A key listed more than once is treated according to its
    /// last entry.
    pub async fn batch(&self, ops: Vec<BatchOp>, options: WriteOptions) -> TtlResult<()> {
        for op in &ops {
            require_key("batch", op.key())?;
        }
        if ops.is_empty() {
            return Ok(());
        }

        let ttl = options.resolve(self.inner.default_ttl);
        let mut last: HashMap<Bytes, bool> = HashMap::with_capacity(ops.len());
        for op in &ops {
            last.insert(op.key().clone(), matches!(op, BatchOp::Put { .. }));
        }
        last.retain(|_, is_put| !*is_put || ttl.is_some());
        if let Some(ttl) = ttl {
            for (key, _) in last.iter().filter(|(_, is_put)| **is_put) {
                self.inner.meta.check_armable(key, ttl)?;
            }
        }

        let guards = self
            .inner
            .meta
            .locks()
            .lock_many(last.keys().cloned())
            .await;
        let (arm, disarm): (Vec<KeyGuard>, Vec<KeyGuard>) = guards
            .into_iter()
            .partition(|guard| last.get(guard.key()).copied().unwrap_or(false));

        debug!(
            ops = ops.len(),
            arm = arm.len(),
            disarm = disarm.len(),
            "Applying batch"
        );

        let (armed, disarmed, written) = tokio::join!(
            async {
                match ttl {
                    Some(ttl) => self.inner.meta.arm_locked(&arm, ttl).await,
                    None => Ok(()),
                }
            },
            self.inner.meta.disarm_locked(&disarm),
            self.inner.db.batch(ops),
        );
        first_error([armed, disarmed, written.map_err(TtlError::from)])
    }

    /// Arms `key` to expire after `ttl` without touching its value.
    ///
    /// A zero `ttl` is ignored.
    pub async fn set_ttl(&self, key: Bytes, ttl: Duration) -> TtlResult<()> {
        require_key("ttl", &key)?;
        if ttl.is_zero() {
            return Ok(());
        }
        self.inner.meta.check_armable(&key, ttl)?;
        self.inner.meta.arm(vec![key], ttl).await
    }

    /// Removes the expiry of `key`, keeping its value.
    pub async fn persist(&self, key: Bytes) -> TtlResult<()> {
        require_key("persist", &key)?;
        self.inner.meta.disarm(vec![key]).await
    }

    /// When `key` is due to expire, if it is armed.
    pub async fn expires_at(&self, key: &[u8]) -> TtlResult<Option<SystemTime>> {
        Ok(self
            .inner
            .meta
            .expires_at(key)
            .await?
            .map(|ms| UNIX_EPOCH + Duration::from_millis(ms)))
    }

    /// Time left before `key` expires, if it is armed.
    ///
    /// Returns `Some(Duration::ZERO)` for a key past its deadline that has not
    /// been swept yet.
    pub async fn ttl_remaining(&self, key: &[u8]) -> TtlResult<Option<Duration>> {
        Ok(self
            .inner
            .meta
            .expires_at(key)
            .await?
            .map(|ms| Duration::from_millis(ms.saturating_sub(now_millis()))))
    }

    /// Runs a sweep immediately. Returns the number of keys removed.
    pub async fn sweep(&self) -> TtlResult<u64> {
        self.inner.sweeper.sweep().await
    }

    pub fn sweep_stats(&self) -> SweepStats {
        self.inner.sweeper.stats()
    }

    /// Stops the sweeper. If a sweep is running, returns once it has closed.
    pub async fn stop(&self) {
        self.inner.sweeper.stop().await;
    }

    /// Stops the sweeper, then closes the wrapped store.
    pub async fn close(&self) -> TtlResult<()> {
        self.stop().await;
        match self.inner.db.close().await {
            Ok(()) | Err(StoreError::Closed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
