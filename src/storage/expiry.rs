//! Background Expiry Sweeper
//!
//! Reads never delete: an expired entry simply reads as absent until
//! something removes it. If a key expires and is never touched again it
//! would stay in memory forever, so each store can run a sweeper that
//! periodically walks its keys and reclaims the expired ones.
//!
//! ## Design
//!
//! The sweeper runs as a Tokio task and:
//! 1. Waits one interval, then ticks at a fixed rate
//! 2. Walks the store's keys (one shard snapshot at a time)
//! 3. Reads each raw entry, expired ones included
//! 4. Removes an expired entry only if it still equals the snapshot it read
//!
//! Step 4 is what keeps the sweeper out of the writers' way. If a writer
//! refreshes or replaces a key between the read and the removal, the
//! conditional removal finds a different entry and does nothing, so the
//! newer entry survives. No lock is held across a pass.

use crate::clock::Timestamp;
use crate::config::SweepConfig;
use crate::error::{CacheError, Result};
use crate::storage::entry::TimedEntry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, info_span, trace, warn, Instrument};

/// A raw stored value the sweeper can judge on its own.
pub(crate) trait Expiring {
    fn is_expired(&self, now: Timestamp) -> bool;
}

impl<V> Expiring for TimedEntry<V> {
    #[inline]
    fn is_expired(&self, now: Timestamp) -> bool {
        TimedEntry::is_expired(self, now)
    }
}

impl Expiring for Timestamp {
    #[inline]
    fn is_expired(&self, now: Timestamp) -> bool {
        *self < now
    }
}

/// The internal contract a store offers its sweeper.
pub(crate) trait SweepTarget: Send + Sync + 'static {
    type Key: 'static;
    type Snapshot: Expiring;

    /// Current time according to the store's clock.
    fn now(&self) -> Timestamp;

    /// A fresh, weakly consistent walk over the current keys.
    fn sweep_keys(&self) -> Box<dyn Iterator<Item = Self::Key> + '_>;

    /// The stored value for `key`, without any expiry filtering.
    fn snapshot(&self, key: &Self::Key) -> Option<Self::Snapshot>;

    /// Removes `key` only if it still holds exactly `snapshot`.
    fn remove_snapshot(&self, key: &Self::Key, snapshot: &Self::Snapshot) -> bool;
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Keys visited
    pub scanned: usize,
    /// Expired entries actually removed
    pub reclaimed: usize,
}

/// Runs a single pass over `target`.
///
/// "Now" is read once per pass; entries that expire while the pass is
/// running are left for the next one.
pub(crate) fn sweep_once<T>(target: &T) -> SweepReport
where
    T: SweepTarget + ?Sized,
{
    let now = target.now();
    let mut report = SweepReport::default();

    for key in target.sweep_keys() {
        report.scanned += 1;

        // Removed between the key snapshot and now
        let Some(snapshot) = target.snapshot(&key) else {
            continue;
        };

        if !snapshot.is_expired(now) {
            continue;
        }

        if target.remove_snapshot(&key, &snapshot) {
            report.reclaimed += 1;
        } else {
            trace!("Entry changed since it was read, leaving it alone");
        }
    }

    report
}

/// A handle to a running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub(crate) struct ExpirySweeper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,

    /// The spawned task; finished once it exits for any reason
    task: JoinHandle<()>,

    config: SweepConfig,
}

impl ExpirySweeper {
    /// Starts the expiry sweeper as a background task on the current Tokio runtime.
    ///
    /// Fails if the interval is below the minimum, too long to schedule, or
    /// if called outside a runtime.
    pub(crate) fn start<T: SweepTarget>(target: Arc<T>, config: SweepConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| CacheError::NoRuntime)?;

        let first_tick = Instant::now()
            .checked_add(config.interval)
            .ok_or(CacheError::IntervalTooLong {
                interval: config.interval,
            })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let span = info_span!("sweeper", label = %config.label);

        let task = runtime.spawn(
            sweeper_loop(target, first_tick, config.interval, shutdown_rx).instrument(span),
        );

        info!(
            label = %config.label,
            interval_secs = config.interval.as_secs(),
            "Background expiry sweeper started"
        );

        Ok(Self {
            shutdown_tx,
            task,
            config,
        })
    }

    /// Returns the label this sweeper was started with.
    pub fn label(&self) -> &str {
        &self.config.label
    }

    /// Returns true once the task has exited, whether it was stopped,
    /// cancelled with its runtime, or panicked.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the expiry sweeper.
    ///
    /// A pass already in progress runs to completion; no later pass starts.
    /// This is called automatically when the handle is dropped, and calling
    /// it more than once is harmless.
    pub fn stop(&self) {
        let signalled = self.shutdown_tx.send_if_modified(|stopped| {
            let first = !*stopped;
            *stopped = true;
            first
        });

        if signalled {
            info!(label = %self.config.label, "Background expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main sweeper loop.
async fn sweeper_loop<T: SweepTarget>(
    target: Arc<T>,
    first_tick: Instant,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = time::interval_at(first_tick, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    loop {
        // Wait for the next tick or shutdown signal
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

        let report = sweep_once(target.as_ref());

        if report.reclaimed > 0 {
            debug!(
                scanned = report.scanned,
                reclaimed = report.reclaimed,
                "Expired entries cleaned up"
            );
        } else {
            trace!(scanned = report.scanned, "Sweep found nothing to reclaim");
        }
    }
}

/// The zero-or-one sweeper binding a store owns.
#[derive(Debug, Default)]
pub(crate) struct SweeperSlot {
    current: Mutex<Option<ExpirySweeper>>,
}

impl SweeperSlot {
    fn lock(&self) -> MutexGuard<'_, Option<ExpirySweeper>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds a new sweeper to `target`. Refuses if a live one is already bound.
    pub(crate) fn start<T: SweepTarget>(&self, target: &Arc<T>, config: SweepConfig) -> Result<()> {
        let mut current = self.lock();

        match current.as_ref() {
            Some(running) if !running.is_finished() => {
                return Err(CacheError::SweeperAlreadyRunning {
                    label: running.label().to_string(),
                });
            }
            Some(dead) => {
                warn!(label = dead.label(), "Previous expiry sweeper task is gone, replacing it");
            }
            None => {}
        }

        *current = Some(ExpirySweeper::start(Arc::clone(target), config)?);
        Ok(())
    }

    /// Stops and unbinds the current sweeper, if any.
    pub(crate) fn stop(&self) {
        // Take it out first so the slot lock isn't held while logging
        let sweeper = self.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.stop();
        }
    }

    /// True while a sweeper is bound and its task is still alive.
    pub(crate) fn is_running(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|sweeper| !sweeper.is_finished())
    }
}
