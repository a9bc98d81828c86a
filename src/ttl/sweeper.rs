//! Background Expiry Sweeper
//!
//! A periodic task that finds expired keys through the expiry index and
//! removes them together with their metadata.
//!
//! ## Design
//!
//! Each tick:
//! 1. Scans the index range `[.., now]`, collecting `(index key, original key)`
//! 2. Locks the collected keys, then re-reads their forward pointers. A key is
//!    removed only if its pointer still refers to the scanned entry; a key that
//!    was re-armed or disarmed in the meantime is left alone.
//! 3. Deletes the original keys, then the metadata, each as one atomic batch
//!    (a single batch when metadata shares the primary store)
//!
//! If a tick fails nothing it found is lost: the entries stay in the index and
//! the next tick retries them. Primary deletes go first so that a failure
//! between the two batches leaves metadata behind rather than an immortal key.
//!
//! ## State Machine
//!
//! ```text
//!            tick                      scan done
//!   Idle ───────────> Scanning ──────────────────────> Idle
//!    │                   │
//!    │ stop()            │ stop()
//!    ▼                   ▼            scan done
//!  Stopped <──────── StopRequested ─────────────> Stopped (+ wake waiters)
//! ```
//!
//! `stop()` during a scan waits until that scan closes, so once it returns no
//! scan is running and none will start.

use crate::store::{BatchOp, OrderedStore, StoreError};
use crate::ttl::error::{TtlError, TtlResult};
use crate::ttl::meta::Metadata;
use crate::ttl::now_millis;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Where the sweeper is in its cycle.
#[derive(Debug, Default)]
enum SweepState {
    #[default]
    Idle,
    Scanning,
    StopRequested(Vec<oneshot::Sender<()>>),
    Stopped,
}

/// Counters describing sweeper activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Sweeps that ran to completion
    pub sweeps: u64,
    /// Original keys removed because they expired
    pub expired: u64,
    /// Sweeps that reported an error
    pub failures: u64,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<SweepState>,
    sweeps: AtomicU64,
    expired: AtomicU64,
    failures: AtomicU64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SweepState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Idle -> Scanning. Returns `false` if no scan may start.
    fn begin_scan(&self) -> bool {
        let mut state = self.state();
        match *state {
            SweepState::Idle => {
                *state = SweepState::Scanning;
                true
            }
            _ => false,
        }
    }

    /// Closes a scan. Returns `true` if the sweeper is now stopped.
    fn finish_scan(&self) -> bool {
        let mut state = self.state();
        match std::mem::take(&mut *state) {
            SweepState::StopRequested(waiters) => {
                *state = SweepState::Stopped;
                for waiter in waiters {
                    let _ = waiter.send(());
                }
                true
            }
            SweepState::Stopped => {
                *state = SweepState::Stopped;
                true
            }
            SweepState::Idle | SweepState::Scanning => false,
        }
    }

    fn is_stopped(&self) -> bool {
        matches!(*self.state(), SweepState::Stopped)
    }
}

/// Everything a sweep touches.
pub struct SweepContext {
    pub meta: Metadata,
    pub primary: Arc<dyn OrderedStore>,
    /// Metadata lives in a store other than `primary`
    pub separate: bool,
    pub errors: broadcast::Sender<Arc<TtlError>>,
}

/// Handle to the running sweeper.
///
/// Dropping the handle stops the background task after any scan in progress.
pub struct Sweeper {
    ctx: Arc<SweepContext>,
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("state", &*self.shared.state())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Sweeper {
    /// Starts sweeping every `period` on the current tokio runtime.
    ///
    /// The first sweep runs one period after start. The task does not keep
    /// the runtime alive on its own.
    pub fn start(ctx: SweepContext, period: Duration) -> Self {
        let ctx = Arc::new(ctx);
        let shared = Arc::new(Shared::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(
            Arc::clone(&ctx),
            Arc::clone(&shared),
            period,
            shutdown_rx,
        ));

        info!(period_ms = period.as_millis() as u64, "Expiry sweeper started");

        Self {
            ctx,
            shared,
            shutdown_tx,
        }
    }

    /// Runs one sweep now, unless a sweep is already running or the sweeper
    /// is stopped. Returns the number of expired keys removed.
    pub async fn sweep(&self) -> TtlResult<u64> {
        if !self.shared.begin_scan() {
            return Ok(0);
        }
        let result = run_sweep(&self.ctx, &self.shared).await;
        self.shared.finish_scan();
        result
    }

    /// Stops the sweeper, waiting for a scan in progress to close first.
    pub async fn stop(&self) {
        let pending = {
            let mut state = self.shared.state();
            let (next, pending) = match std::mem::take(&mut *state) {
                SweepState::Idle | SweepState::Stopped => (SweepState::Stopped, None),
                SweepState::Scanning => {
                    let (tx, rx) = oneshot::channel();
                    (SweepState::StopRequested(vec![tx]), Some(rx))
                }
                SweepState::StopRequested(mut waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    (SweepState::StopRequested(waiters), Some(rx))
                }
            };
            *state = next;
            pending
        };

        let _ = self.shutdown_tx.send(true);

        if let Some(rx) = pending {
            debug!("Stop requested during a sweep, waiting for it to close");
            let _ = rx.await;
        }
        info!("Expiry sweeper stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    pub fn stats(&self) -> SweepStats {
        SweepStats {
            sweeps: self.shared.sweeps.load(Ordering::Relaxed),
            expired: self.shared.expired.load(Ordering::Relaxed),
            failures: self.shared.failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// The main sweeper loop.
async fn sweeper_loop(
    ctx: Arc<SweepContext>,
    shared: Arc<Shared>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
                continue;
            }
        }

        if !shared.begin_scan() {
            if shared.is_stopped() {
                return;
            }
            trace!("Sweep already in progress, skipping tick");
            continue;
        }

        // No caller to hand a tick's error to, so it goes to subscribers.
        if let Err(e) = run_sweep(&ctx, &shared).await {
            let _ = ctx.errors.send(Arc::new(e));
        }

        if shared.finish_scan() {
            return;
        }
    }
}

/// Runs one sweep and records its outcome.
async fn run_sweep(ctx: &SweepContext, shared: &Shared) -> TtlResult<u64> {
    match sweep_once(ctx).await {
        Ok(expired) => {
            shared.sweeps.fetch_add(1, Ordering::Relaxed);
            shared.expired.fetch_add(expired, Ordering::Relaxed);
            if expired > 0 {
                debug!(expired, "Expired keys cleaned up");
            }
            Ok(expired)
        }
        Err(e) => {
            shared.failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "Expiry sweep failed, entries left for the next sweep");
            Err(e)
        }
    }
}

/// Scans for expired entries and deletes them. Returns the number of
/// original keys removed.
pub async fn sweep_once(ctx: &SweepContext) -> TtlResult<u64> {
    let layout = ctx.meta.layout();
    let range = layout.sweep_range(now_millis())?;

    let mut candidates: Vec<(Bytes, Bytes)> = Vec::new();
    let mut meta_batch: Vec<BatchOp> = Vec::new();
    {
        let mut iter = ctx.meta.store().iter(range).await?;
        while let Some((index_key, value)) = iter.next().await? {
            match layout.decode_key(&value) {
                Ok(key) => candidates.push((index_key, key)),
                Err(e) => {
                    warn!(error = %e, "Dropping undecodable expiry index entry");
                    meta_batch.push(BatchOp::Del { key: index_key });
                }
            }
        }
    }

    if candidates.is_empty() && meta_batch.is_empty() {
        return Ok(0);
    }

    let keys: Vec<Bytes> = candidates.iter().map(|(_, key)| key.clone()).collect();
    let _guards = ctx.meta.locks().lock_many(keys.iter().cloned()).await;
    let pointers = ctx.meta.read_pointers(&keys).await?;

    let mut primary_batch: Vec<BatchOp> = Vec::new();
    for ((index_key, key), slot) in candidates.into_iter().zip(pointers) {
        let Some((forward, pointer)) = slot else {
            meta_batch.push(BatchOp::Del { key: index_key });
            continue;
        };
        match pointer {
            Ok(raw) => {
                let current = layout
                    .decode_expiry(&raw)
                    .and_then(|expires_at| layout.expiry_key(expires_at, &key));
                if current.as_ref() == Ok(&index_key) {
                    primary_batch.push(BatchOp::Del { key });
                    meta_batch.push(BatchOp::Del { key: forward });
                } else {
                    trace!(key = ?key, "Expiry entry superseded since scan");
                }
                meta_batch.push(BatchOp::Del { key: index_key });
            }
            Err(StoreError::NotFound) => {
                meta_batch.push(BatchOp::Del { key: index_key });
            }
            Err(e) => return Err(e.into()),
        }
    }

    let expired = primary_batch.len() as u64;
    if ctx.separate {
        if !primary_batch.is_empty() {
            ctx.primary.batch(primary_batch).await?;
        }
        if !meta_batch.is_empty() {
            ctx.meta.store().batch(meta_batch).await?;
        }
    } else {
        primary_batch.extend(meta_batch);
        if !primary_batch.is_empty() {
            ctx.primary.batch(primary_batch).await?;
        }
    }

    Ok(expired)
}
