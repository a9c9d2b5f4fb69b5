//! Entity store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use goalpost_common::{
    EntityId, Error, Fields, GoalFields, GoalOrder, GoalPatch, Record, RemoteRow, Result,
    SyncStatus, TaskFields, TodoFields,
};

/// Row counts of one entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSummary {
    /// Rows visible to active reads.
    pub active: usize,
    /// Rows waiting for upload.
    pub pending: usize,
    /// Rows waiting for manual resolution.
    pub conflicts: usize,
    /// Rows the remote reported gone.
    pub tombstoned: usize,
}

/// Durable storage for one entity kind.
///
/// Every read returns owned snapshots. Implementations serialize their own
/// access internally, so a single store can be shared behind an `Arc`.
#[async_trait]
pub trait EntityStore<F: Fields>: Send + Sync {
    /// Insert a new local record, pending upload.
    ///
    /// # Errors
    /// - `AlreadyExists` if the id is taken, including by a tombstone
    /// - `InvalidInput` if the fields fail validation
    async fn create(&self, id: EntityId, fields: F) -> Result<Record<F>>;

    /// Merge a partial update.
    ///
    /// # Postconditions
    /// - `updated_at` is now and the record is pending, whatever changed
    ///
    /// # Errors
    /// - `NotFound` if absent
    /// - `InvalidInput` if the patched fields fail validation
    async fn update(&self, id: &EntityId, patch: F::Patch) -> Result<Record<F>>;

    /// Soft-delete a record. It stays stored until its delete is uploaded.
    ///
    /// # Errors
    /// - `NotFound` if absent
    /// - `Conflict` if the record awaits conflict resolution; resolve it first
    async fn soft_delete(&self, id: &EntityId) -> Result<()>;

    /// Fetch a record in any state, tombstones included.
    async fn get_by_id(&self, id: &EntityId) -> Result<Option<Record<F>>>;

    /// All stored records, ordered by id.
    async fn list_all(&self) -> Result<Vec<Record<F>>>;

    /// Records neither soft-deleted nor remote-deleted.
    async fn list_active(&self) -> Result<Vec<Record<F>>>;

    /// Upload candidates, oldest edit first.
    async fn list_pending(&self) -> Result<Vec<Record<F>>>;

    /// Records waiting for manual conflict resolution.
    async fn list_conflicts(&self) -> Result<Vec<Record<F>>>;

    /// Ids of live records that were reconciled at least once.
    async fn list_synced_ids(&self) -> Result<Vec<EntityId>>;

    /// Mark a record reconciled. Touches only status and `synced_at`.
    ///
    /// # Errors
    /// - `NotFound` if absent
    async fn mark_synced(&self, id: &EntityId, synced_at: DateTime<Utc>) -> Result<()>;

    /// Acknowledge an upload of `revision`.
    ///
    /// `synced_at` is always recorded so that later uploads update instead of
    /// create. The record only becomes synced when no local edit landed after
    /// `revision` was read; otherwise it stays pending.
    ///
    /// Returns `true` when the record is now synced.
    ///
    /// # Errors
    /// - `NotFound` if absent
    async fn mark_uploaded(
        &self,
        id: &EntityId,
        revision: u64,
        synced_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Tombstone a record the remote no longer has.
    ///
    /// # Errors
    /// - `NotFound` if absent
    async fn mark_remote_deleted(&self, id: &EntityId) -> Result<()>;

    /// Flag a record whose local and remote copies both changed.
    ///
    /// # Errors
    /// - `NotFound` if absent
    async fn mark_conflict(&self, id: &EntityId) -> Result<()>;

    /// Put a record back in the upload queue without editing it.
    ///
    /// # Errors
    /// - `NotFound` if absent
    async fn mark_pending(&self, id: &EntityId) -> Result<()>;

    /// Insert or overwrite a record from its remote copy, marking it synced now.
    async fn upsert_from_remote(&self, row: RemoteRow<F>) -> Result<Record<F>>;

    /// Physically remove a record. Returns whether it existed.
    async fn purge(&self, id: &EntityId) -> Result<bool>;

    /// Row counts for status displays.
    async fn summary(&self) -> Result<KindSummary> {
        let mut summary = KindSummary::default();
        for record in self.list_all().await? {
            if record.meta.is_active() {
                summary.active += 1;
            }
            if record.meta.is_upload_candidate() {
                summary.pending += 1;
            }
            if record.meta.sync_status == SyncStatus::Conflict {
                summary.conflicts += 1;
            }
            if record.meta.remote_deleted {
                summary.tombstoned += 1;
            }
        }
        Ok(summary)
    }

    /// Purge every finalized record: acknowledged deletes and remote tombstones.
    ///
    /// Returns the purged ids.
    async fn purge_finalized(&self) -> Result<Vec<EntityId>> {
        let mut purged = Vec::new();
        for record in self.list_all().await? {
            if record.meta.is_finalized() && self.purge(&record.id).await? {
                purged.push(record.id);
            }
        }
        debug!("Purged {} finalized {} rows", purged.len(), F::KIND);
        Ok(purged)
    }
}

/// A store holding all three entity kinds.
pub trait LocalStore:
    EntityStore<GoalFields> + EntityStore<TaskFields> + EntityStore<TodoFields>
{
}

impl<T> LocalStore for T where
    T: EntityStore<GoalFields> + EntityStore<TaskFields> + EntityStore<TodoFields> + ?Sized
{
}

/// Rewrite goal rankings to follow `ids`, assigning orders `1..=n`.
///
/// Each rewritten goal becomes pending.
///
/// # Errors
/// - `InvalidInput` if `ids` repeats an id
/// - `NotFound` for an unknown id; goals before it are already rewritten
pub async fn reorder_goals<S>(store: &S, ids: &[EntityId]) -> Result<Vec<GoalOrder>>
where
    S: EntityStore<GoalFields> + ?Sized,
{
    let mut seen = HashSet::new();
    if let Some(dup) = ids.iter().find(|id| !seen.insert(*id)) {
        return Err(Error::InvalidInput(format!(
            "Goal {dup} appears more than once in reorder request"
        )));
    }

    let mut orders = Vec::with_capacity(ids.len());
    for (index, id) in ids.iter().enumerate() {
        let order = index as i64 + 1;
        let patch = GoalPatch {
            order: Some(order),
            ..GoalPatch::default()
        };
        store.update(id, patch).await?;
        orders.push(GoalOrder {
            id: id.clone(),
            order,
        });
    }

    debug!("Reordered {} goals", orders.len());
    Ok(orders)
}
