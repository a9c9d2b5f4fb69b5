//! Change tracking: pushes local edits and merges remote listings.
//!
//! Uploads of every kind finish before any download starts. Upload failures
//! are isolated per record and only counted. A failed listing still lets the
//! other kinds merge, then fails the pass. Local store failures abort at once.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use goalpost_common::{
    timestamp_now, EntityId, EntityKind, Error, Fields, GoalFields, Record, RemoteRow, Result,
    SyncStatus, TaskFields, TodoFields,
};
use goalpost_gateway::RemoteGateway;
use goalpost_store::{EntityStore, LocalStore};

use crate::conflict::{ConflictResolver, MergeDecision, Resolution};
use crate::engine::SyncReport;

/// Remote answer to one pushed record.
enum Pushed {
    /// The remote accepted the change.
    Acknowledged,
    /// The remote no longer has the record.
    RemoteGone,
}

/// Reconciles the local store with the remote gateway.
pub struct ChangeTracker<S: ?Sized, G> {
    store: Arc<S>,
    gateway: Arc<G>,
    resolver: ConflictResolver,
    detect_remote_deletes: bool,
}

impl<S, G> ChangeTracker<S, G>
where
    S: LocalStore + ?Sized,
    G: RemoteGateway,
{
    /// Create a tracker over a store and a gateway.
    pub fn new(
        store: Arc<S>,
        gateway: Arc<G>,
        resolver: ConflictResolver,
        detect_remote_deletes: bool,
    ) -> Self {
        Self {
            store,
            gateway,
            resolver,
            detect_remote_deletes,
        }
    }

    /// One full pass: upload every kind, then download every kind.
    pub async fn reconcile(&self, report: &mut SyncReport) -> Result<()> {
        self.upload_all(report).await?;
        self.download_all(report).await
    }

    /// Push pending records in kind order Goal, Task, Todo.
    pub async fn upload_all(&self, report: &mut SyncReport) -> Result<()> {
        self.upload_kind::<GoalFields>(report).await?;
        self.upload_kind::<TaskFields>(report).await?;
        self.upload_kind::<TodoFields>(report).await?;
        Ok(())
    }

    /// List every kind concurrently, then merge them in kind order.
    ///
    /// # Errors
    /// Returns the first listing error once the kinds that did list have
    /// been merged. Store errors are returned immediately.
    pub async fn download_all(&self, report: &mut SyncReport) -> Result<()> {
        let (goals, tasks, todos) = futures::join!(
            self.gateway.list_all::<GoalFields>(),
            self.gateway.list_all::<TaskFields>(),
            self.gateway.list_all::<TodoFields>(),
        );
        let mut failure = None;
        self.merge_listing(goals, &mut failure, report).await?;
        self.merge_listing(tasks, &mut failure, report).await?;
        self.merge_listing(todos, &mut failure, report).await?;
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn merge_listing<F: Fields>(
        &self,
        listing: Result<Vec<RemoteRow<F>>>,
        failure: &mut Option<Error>,
        report: &mut SyncReport,
    ) -> Result<()>
    where
        S: EntityStore<F>,
    {
        match listing {
            Ok(rows) => self.merge_kind(rows, report).await,
            Err(e) => {
                warn!("Failed to list remote {}: {}", F::KIND.collection(), e);
                report.download_failures += 1;
                failure.get_or_insert(e);
                Ok(())
            }
        }
    }

    async fn upload_kind<F: Fields>(&self, report: &mut SyncReport) -> Result<()>
    where
        S: EntityStore<F>,
    {
        let pending = EntityStore::<F>::list_pending(&*self.store).await?;
        if pending.is_empty() {
            return Ok(());
        }
        debug!("Uploading {} pending {} records", pending.len(), F::KIND);

        for record in pending {
            match self.push(&record).await {
                Ok(Pushed::Acknowledged) => {
                    let settled = EntityStore::<F>::mark_uploaded(
                        &*self.store,
                        &record.id,
                        record.meta.revision,
                        timestamp_now(),
                    )
                    .await?;
                    if !settled {
                        debug!(
                            "{} {} changed during upload; stays pending",
                            F::KIND,
                            record.id
                        );
                    }
                    report.uploaded += 1;
                }
                Ok(Pushed::RemoteGone) => {
                    info!("{} {} was deleted remotely", F::KIND, record.id);
                    EntityStore::<F>::mark_remote_deleted(&*self.store, &record.id).await?;
                    report.tombstoned += 1;
                }
                Err(e) if e.is_remote() => {
                    warn!("Failed to upload {} {}: {}", F::KIND, record.id, e);
                    report.upload_failures += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Send one record.
    async fn push<F: Fields>(&self, record: &Record<F>) -> Result<Pushed> {
        let id = &record.id;

        if record.meta.deleted_at.is_some() {
            return match self.gateway.delete::<F>(id).await {
                Ok(()) => Ok(Pushed::Acknowledged),
                Err(e) if e.is_not_found() => {
                    trace!("{} {} already absent remotely", F::KIND, id);
                    Ok(Pushed::Acknowledged)
                }
                Err(e) => Err(e),
            };
        }

        if record.meta.synced_at.is_none() {
            self.gateway.create(id, &record.fields).await?;
            return Ok(Pushed::Acknowledged);
        }

        match self.gateway.update(id, &record.fields).await {
            Ok(()) => Ok(Pushed::Acknowledged),
            Err(e) if e.is_not_found() => Ok(Pushed::RemoteGone),
            Err(e) => Err(e),
        }
    }

    async fn merge_kind<F: Fields>(
        &self,
        rows: Vec<RemoteRow<F>>,
        report: &mut SyncReport,
    ) -> Result<()>
    where
        S: EntityStore<F>,
    {
        let mut seen = HashSet::with_capacity(rows.len());
        for row in rows {
            seen.insert(row.id.clone());
            let local = EntityStore::<F>::get_by_id(&*self.store, &row.id).await?;
            match self.resolver.decide(local.as_ref(), &row) {
                MergeDecision::Apply => {
                    EntityStore::<F>::upsert_from_remote(&*self.store, row).await?;
                    report.downloaded += 1;
                }
                MergeDecision::Conflict => {
                    warn!("Conflict on {} {}: changed locally and remotely", F::KIND, row.id);
                    EntityStore::<F>::mark_conflict(&*self.store, &row.id).await?;
                    report.conflicts += 1;
                }
                MergeDecision::Skip(reason) => {
                    trace!("Skipping remote {} {}: {:?}", F::KIND, row.id, reason);
                }
            }
        }

        if self.detect_remote_deletes {
            for id in EntityStore::<F>::list_synced_ids(&*self.store).await? {
                if !seen.contains(&id) {
                    info!("{} {} missing from remote listing; tombstoning", F::KIND, id);
                    EntityStore::<F>::mark_remote_deleted(&*self.store, &id).await?;
                    report.tombstoned += 1;
                }
            }
        }
        Ok(())
    }

    /// Settle a record flagged as conflicting.
    ///
    /// # Errors
    /// - `NotFound` if the record does not exist locally
    /// - `InvalidInput` if the record is not in conflict
    /// - Gateway errors when fetching the remote copy for `KeepRemote`
    pub async fn resolve_conflict(
        &self,
        kind: EntityKind,
        id: &EntityId,
        resolution: Resolution,
    ) -> Result<()> {
        match kind {
            EntityKind::Goal => self.resolve_kind::<GoalFields>(id, resolution).await,
            EntityKind::Task => self.resolve_kind::<TaskFields>(id, resolution).await,
            EntityKind::Todo => self.resolve_kind::<TodoFields>(id, resolution).await,
        }
    }

    async fn resolve_kind<F: Fields>(&self, id: &EntityId, resolution: Resolution) -> Result<()>
    where
        S: EntityStore<F>,
    {
        let record = EntityStore::<F>::get_by_id(&*self.store, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} {id}", F::KIND)))?;
        if record.meta.sync_status != SyncStatus::Conflict {
            return Err(Error::InvalidInput(format!(
                "{} {id} is not in conflict",
                F::KIND
            )));
        }

        match resolution {
            Resolution::KeepLocal => {
                EntityStore::<F>::mark_pending(&*self.store, id).await?;
            }
            Resolution::KeepRemote => match self.gateway.get::<F>(id).await? {
                Some(row) => {
                    EntityStore::<F>::upsert_from_remote(&*self.store, row).await?;
                }
                None => {
                    EntityStore::<F>::mark_remote_deleted(&*self.store, id).await?;
                }
            },
        }
        info!("Resolved conflict on {} {} keeping {}", F::KIND, id, resolution);
        Ok(())
    }
}
