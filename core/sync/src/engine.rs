//! Core sync engine that orchestrates reconciliation passes.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use goalpost_common::{timestamp_now, EntityId, EntityKind, Error, Result};
use goalpost_gateway::RemoteGateway;
use goalpost_store::LocalStore;

use crate::config::SyncConfig;
use crate::conflict::{ConflictResolver, Resolution};
use crate::state::{EngineStatus, ListenerRegistry, Subscription, SyncState};
use crate::tracker::ChangeTracker;

/// Message published when a pass fails or times out.
pub const SYNC_FAILED_MESSAGE: &str = "Sync failed. Your changes are saved and will sync later.";

/// Counts for one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Records the remote acknowledged.
    pub uploaded: usize,
    /// Records whose upload call failed.
    pub upload_failures: usize,
    /// Remote rows written locally.
    pub downloaded: usize,
    /// Records tombstoned as deleted remotely.
    pub tombstoned: usize,
    /// Records flagged as conflicting.
    pub conflicts: usize,
    /// Kinds whose listing failed. Any failure fails the pass.
    pub download_failures: usize,
    /// Wall time of the pass.
    pub duration: Duration,
}

impl SyncReport {
    /// True when every gateway call of the pass succeeded.
    pub fn is_clean(&self) -> bool {
        self.upload_failures == 0 && self.download_failures == 0
    }
}

/// Result of a `sync()` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A full pass ran.
    Completed(SyncReport),
    /// The remote was unreachable; nothing changed.
    Offline,
    /// Another pass was already running; this request was dropped.
    Skipped,
}

/// Cumulative engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Passes that ran to completion.
    pub passes_completed: u64,
    /// Passes that ended in the `error` state, timeouts included.
    pub passes_failed: u64,
    /// Requests that found the remote unreachable.
    pub passes_offline: u64,
    /// Requests dropped because a pass was already running.
    pub passes_skipped: u64,
    /// Records acknowledged by the remote across all passes.
    pub records_uploaded: u64,
    /// Remote rows written locally across all passes.
    pub records_downloaded: u64,
    /// Report of the most recent completed pass.
    pub last_report: Option<SyncReport>,
}

/// Clears the single-flight flag when a pass ends, even if it is cancelled.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Main sync engine.
///
/// Built once with an injected store and gateway and shared through an
/// `Arc`. At most one pass runs at a time.
pub struct SyncEngine<S: ?Sized, G> {
    tracker: ChangeTracker<S, G>,
    gateway: Arc<G>,
    config: SyncConfig,
    running: AtomicBool,
    state: Mutex<SyncState>,
    /// Held from state update through fan-out so listeners see changes in order.
    fanout: Mutex<()>,
    listeners: Arc<ListenerRegistry>,
    stats: Mutex<SyncStats>,
}

impl<S, G> SyncEngine<S, G>
where
    S: LocalStore + ?Sized + 'static,
    G: RemoteGateway + 'static,
{
    /// Create a new sync engine.
    pub fn new(store: Arc<S>, gateway: Arc<G>, config: SyncConfig) -> Self {
        let resolver = ConflictResolver::new(config.conflict_strategy);
        let tracker = ChangeTracker::new(
            store,
            Arc::clone(&gateway),
            resolver,
            config.detect_remote_deletes,
        );

        Self {
            tracker,
            gateway,
            config,
            running: AtomicBool::new(false),
            state: Mutex::new(SyncState::new()),
            fanout: Mutex::new(()),
            listeners: Arc::new(ListenerRegistry::new()),
            stats: Mutex::new(SyncStats::default()),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SyncState {
        lock(&self.state).clone()
    }

    /// Snapshot of cumulative counters.
    pub fn stats(&self) -> SyncStats {
        lock(&self.stats).clone()
    }

    /// True while a pass is in flight.
    pub fn is_syncing(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Observe every state change. Listeners run synchronously on the
    /// task that changed the state, in the order the changes happened.
    ///
    /// A listener may read `state()` but must not call `reset()` or start a
    /// pass; that would deadlock the fan-out.
    pub fn subscribe<L>(&self, listener: L) -> Subscription
    where
        L: Fn(&SyncState) + Send + Sync + 'static,
    {
        let id = self.listeners.add(Arc::new(listener));
        Subscription::new(id, &self.listeners)
    }

    /// Force the state back to idle and clear the error.
    ///
    /// Does not cancel a pass in flight.
    pub fn reset(&self) {
        self.transition(|state| {
            state.status = EngineStatus::Idle;
            state.error_message = None;
        });
    }

    /// Run one reconciliation pass and wait for it.
    ///
    /// # Returns
    /// - `Skipped` if a pass is already running
    /// - `Offline` if the availability probe failed; state returns to idle
    /// - `Completed` with the pass report otherwise
    ///
    /// # Errors
    /// - `Timeout` if the pass exceeded `pass_timeout`
    /// - Gateway errors from a failed listing, after the other kinds merged
    /// - Local store errors raised during the pass
    ///
    /// Either error leaves the state at `error` with a user-facing message.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("Sync already in progress; request dropped");
            lock(&self.stats).passes_skipped += 1;
            return Ok(SyncOutcome::Skipped);
        }
        let _guard = PassGuard(&self.running);

        self.transition(|state| state.status = EngineStatus::Syncing);

        if let Err(reason) = self.probe().await {
            debug!("Remote unavailable, skipping sync: {}", reason);
            lock(&self.stats).passes_offline += 1;
            self.transition(|state| state.status = EngineStatus::Idle);
            return Ok(SyncOutcome::Offline);
        }

        info!("Starting sync");
        let started = Instant::now();
        let mut report = SyncReport::default();
        let result = timeout(self.config.pass_timeout, self.tracker.reconcile(&mut report)).await;
        report.duration = started.elapsed();

        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(Error::Timeout(self.config.pass_timeout)),
        };

        match failure {
            None => {
                info!(
                    "Sync completed in {:?}: {} uploaded, {} downloaded, {} tombstoned, {} conflicts, {} failures",
                    report.duration,
                    report.uploaded,
                    report.downloaded,
                    report.tombstoned,
                    report.conflicts,
                    report.upload_failures + report.download_failures
                );
                {
                    let mut stats = lock(&self.stats);
                    stats.passes_completed += 1;
                    stats.records_uploaded += report.uploaded as u64;
                    stats.records_downloaded += report.downloaded as u64;
                    stats.last_report = Some(report.clone());
                }
                self.transition(|state| {
                    state.status = EngineStatus::Success;
                    state.last_sync_time = Some(timestamp_now());
                    state.error_message = None;
                });
                Ok(SyncOutcome::Completed(report))
            }
            Some(e) => {
                error!("Sync failed after {:?}: {}", report.duration, e);
                {
                    let mut stats = lock(&self.stats);
                    stats.passes_failed += 1;
                    stats.records_uploaded += report.uploaded as u64;
                    stats.records_downloaded += report.downloaded as u64;
                }
                self.transition(|state| {
                    state.status = EngineStatus::Error;
                    state.error_message = Some(SYNC_FAILED_MESSAGE.to_string());
                });
                Err(e)
            }
        }
    }

    /// Start a pass in the background.
    ///
    /// Failures are logged here and published to subscribers as an `error`
    /// state; the returned handle only reports task completion.
    pub fn trigger_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            match engine.sync().await {
                Ok(SyncOutcome::Completed(_)) => {}
                Ok(outcome) => trace!("Background sync ended: {:?}", outcome),
                Err(e) => warn!("Background sync failed: {}", e),
            }
        })
    }

    /// Settle a conflicting record.
    ///
    /// # Errors
    /// - `NotFound` / `InvalidInput` if the record is unknown or not in conflict
    /// - Gateway errors when fetching the remote copy
    pub async fn resolve_conflict(
        &self,
        kind: EntityKind,
        id: &EntityId,
        resolution: Resolution,
    ) -> Result<()> {
        self.tracker.resolve_conflict(kind, id, resolution).await
    }

    async fn probe(&self) -> Result<()> {
        match timeout(self.config.probe_timeout, self.gateway.health()).await {
            Ok(result) => result,
            Err(_) => Err(Error::TransportUnavailable(format!(
                "health probe timed out after {:?}",
                self.config.probe_timeout
            ))),
        }
    }

    /// The only path that changes state; fans out to every listener.
    fn transition(&self, update: impl FnOnce(&mut SyncState)) {
        let _fanout = lock(&self.fanout);
        let snapshot = {
            let mut state = lock(&self.state);
            update(&mut state);
            state.clone()
        };
        self.listeners.notify(&snapshot);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
