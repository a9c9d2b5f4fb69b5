//! In-memory entity store for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use goalpost_common::{
    timestamp_now, EntityId, Error, Fields, GoalFields, Record, RemoteRow, Result, SyncStatus,
    TaskFields, TodoFields,
};

use crate::store::EntityStore;

type Table<F> = RwLock<BTreeMap<EntityId, Record<F>>>;

/// In-memory entity store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    goals: Table<GoalFields>,
    tasks: Table<TaskFields>,
    todos: Table<TodoFields>,
}

/// Selects the table of a `MemoryStore` that holds `F`.
pub trait MemoryTable<F: Fields> {
    /// The table for `F`.
    fn table(&self) -> &Table<F>;
}

impl MemoryTable<GoalFields> for MemoryStore {
    fn table(&self) -> &Table<GoalFields> {
        &self.goals
    }
}

impl MemoryTable<TaskFields> for MemoryStore {
    fn table(&self) -> &Table<TaskFields> {
        &self.tasks
    }
}

impl MemoryTable<TodoFields> for MemoryStore {
    fn table(&self) -> &Table<TodoFields> {
        &self.todos
    }
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read<F: Fields>(&self) -> Result<RwLockReadGuard<'_, BTreeMap<EntityId, Record<F>>>>
    where
        Self: MemoryTable<F>,
    {
        MemoryTable::<F>::table(self)
            .read()
            .map_err(|_| Error::Storage(format!("{} table lock poisoned", F::KIND)))
    }

    fn write<F: Fields>(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<EntityId, Record<F>>>>
    where
        Self: MemoryTable<F>,
    {
        MemoryTable::<F>::table(self)
            .write()
            .map_err(|_| Error::Storage(format!("{} table lock poisoned", F::KIND)))
    }

    /// Read-modify-write one record under the table lock.
    fn modify<F, T>(
        &self,
        id: &EntityId,
        f: impl FnOnce(&mut Record<F>) -> Result<T>,
    ) -> Result<T>
    where
        F: Fields,
        Self: MemoryTable<F>,
    {
        let mut table = self.write::<F>()?;
        let record = table
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("{} {id}", F::KIND)))?;
        f(record)
    }

    fn select<F>(&self, keep: impl Fn(&Record<F>) -> bool) -> Result<Vec<Record<F>>>
    where
        F: Fields,
        Self: MemoryTable<F>,
    {
        let table = self.read::<F>()?;
        Ok(table.values().filter(|r| keep(r)).cloned().collect())
    }
}

#[async_trait]
impl<F> EntityStore<F> for MemoryStore
where
    F: Fields,
    MemoryStore: MemoryTable<F>,
{
    async fn create(&self, id: EntityId, fields: F) -> Result<Record<F>> {
        let record = Record::new_local(id, fields, timestamp_now())?;
        let mut table = self.write::<F>()?;
        if table.contains_key(&record.id) {
            return Err(Error::AlreadyExists(format!("{} {}", F::KIND, record.id)));
        }
        table.insert(record.id.clone(), record.clone());
        debug!("Created {} {}", F::KIND, record.id);
        Ok(record)
    }

    async fn update(&self, id: &EntityId, patch: F::Patch) -> Result<Record<F>> {
        self.modify(id, |record: &mut Record<F>| {
            record.apply_patch(patch, timestamp_now())?;
            Ok(record.clone())
        })
    }

    async fn soft_delete(&self, id: &EntityId) -> Result<()> {
        self.modify(id, |record: &mut Record<F>| record.soft_delete(timestamp_now()))
    }

    async fn get_by_id(&self, id: &EntityId) -> Result<Option<Record<F>>> {
        Ok(self.read::<F>()?.get(id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Record<F>>> {
        self.select(|_: &Record<F>| true)
    }

    async fn list_active(&self) -> Result<Vec<Record<F>>> {
        self.select(|r: &Record<F>| r.meta.is_active())
    }

    async fn list_pending(&self) -> Result<Vec<Record<F>>> {
        let mut pending = self.select(|r: &Record<F>| r.meta.is_upload_candidate())?;
        pending.sort_by(|a, b| {
            a.meta
                .updated_at
                .cmp(&b.meta.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(pending)
    }

    async fn list_conflicts(&self) -> Result<Vec<Record<F>>> {
        self.select(|r: &Record<F>| r.meta.sync_status == SyncStatus::Conflict)
    }

    async fn list_synced_ids(&self) -> Result<Vec<EntityId>> {
        let settled = self.select(|r: &Record<F>| r.meta.is_settled())?;
        Ok(settled.into_iter().map(|r| r.id).collect())
    }

    async fn mark_synced(&self, id: &EntityId, synced_at: DateTime<Utc>) -> Result<()> {
        self.modify(id, |record: &mut Record<F>| {
            record.meta.mark_synced(synced_at);
            Ok(())
        })
    }

    async fn mark_uploaded(
        &self,
        id: &EntityId,
        revision: u64,
        synced_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.modify(id, |record: &mut Record<F>| {
            if record.meta.revision == revision {
                record.meta.mark_synced(synced_at);
                Ok(true)
            } else {
                record.meta.synced_at = Some(synced_at);
                Ok(false)
            }
        })
    }

    async fn mark_remote_deleted(&self, id: &EntityId) -> Result<()> {
        self.modify(id, |record: &mut Record<F>| {
            record.meta.mark_remote_deleted();
            Ok(())
        })
    }

    async fn mark_conflict(&self, id: &EntityId) -> Result<()> {
        self.modify(id, |record: &mut Record<F>| {
            record.meta.sync_status = SyncStatus::Conflict;
            Ok(())
        })
    }

    async fn mark_pending(&self, id: &EntityId) -> Result<()> {
        self.modify(id, |record: &mut Record<F>| {
            record.meta.sync_status = SyncStatus::Pending;
            Ok(())
        })
    }

    async fn upsert_from_remote(&self, row: RemoteRow<F>) -> Result<Record<F>> {
        let now = timestamp_now();
        let mut table = self.write::<F>()?;
        let record = match table.get_mut(&row.id) {
            Some(existing) => {
                existing.overwrite_from_remote(row, now);
                existing.clone()
            }
            None => {
                let record = Record::from_remote(row, now);
                table.insert(record.id.clone(), record.clone());
                record
            }
        };
        Ok(record)
    }

    async fn purge(&self, id: &EntityId) -> Result<bool> {
        Ok(self.write::<F>()?.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use goalpost_common::{GoalPatch, TaskPatch, TodoPatch};

    fn id(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_create_sets_pending() {
        let store = MemoryStore::new();
        let goal = store.create(id("g1"), GoalFields::new("Run")).await.unwrap();

        assert_eq!(goal.meta.sync_status, SyncStatus::Pending);
        assert!(goal.meta.synced_at.is_none());
        assert!(!goal.meta.remote_deleted);
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let store = MemoryStore::new();
        store.create(id("g1"), GoalFields::new("Run")).await.unwrap();

        let err = store.create(id("g1"), GoalFields::new("Swim")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_update_after_sync_returns_to_pending() {
        let store = MemoryStore::new();
        store.create(id("g1"), GoalFields::new("Run")).await.unwrap();
        EntityStore::<GoalFields>::mark_synced(&store, &id("g1"), timestamp_now())
            .await
            .unwrap();

        let goal = EntityStore::<GoalFields>::update(&store, &id("g1"), GoalPatch::default())
            .await
            .unwrap();
        assert_eq!(goal.meta.sync_status, SyncStatus::Pending);
        assert!(goal.meta.synced_at.is_some());
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = EntityStore::<TaskFields>::update(&store, &id("nope"), TaskPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_kinds_are_isolated() {
        let store = MemoryStore::new();
        store.create(id("x"), GoalFields::new("Goal")).await.unwrap();
        store.create(id("x"), TodoFields::new("Todo")).await.unwrap();

        let goals: Vec<Record<GoalFields>> = store.list_active().await.unwrap();
        let tasks: Vec<Record<TaskFields>> = store.list_active().await.unwrap();
        let todos: Vec<Record<TodoFields>> = store.list_active().await.unwrap();
        assert_eq!((goals.len(), tasks.len(), todos.len()), (1, 0, 1));
    }

    #[tokio::test]
    async fn test_soft_delete_hides_from_active_but_stays_pending() {
        let store = MemoryStore::new();
        store.create(id("t1"), TodoFields::new("Call")).await.unwrap();
        EntityStore::<TodoFields>::soft_delete(&store, &id("t1"))
            .await
            .unwrap();

        let active: Vec<Record<TodoFields>> = store.list_active().await.unwrap();
        let pending: Vec<Record<TodoFields>> = store.list_pending().await.unwrap();
        assert!(active.is_empty());
        assert_eq!(pending.len(), 1);
        assert!(pending[0].meta.deleted_at.is_some());
    }

    #[tokio::test]
    async fn test_list_pending_orders_by_last_edit() {
        let store = MemoryStore::new();
        store.create(id("b"), TodoFields::new("first")).await.unwrap();
        store.create(id("a"), TodoFields::new("second")).await.unwrap();
        EntityStore::<TodoFields>::update(&store, &id("b"), TodoPatch::complete(timestamp_now()))
            .await
            .unwrap();

        let pending: Vec<Record<TodoFields>> = store.list_pending().await.unwrap();
        let last = pending.last().unwrap();
        assert_eq!(last.id, id("b"));
    }

    #[tokio::test]
    async fn test_mark_uploaded_detects_concurrent_edit() {
        let store = MemoryStore::new();
        let goal = store.create(id("g1"), GoalFields::new("Run")).await.unwrap();
        let uploaded_revision = goal.meta.revision;

        let rename = GoalPatch {
            name: Some("Run far".to_string()),
            ..GoalPatch::default()
        };
        EntityStore::<GoalFields>::update(&store, &id("g1"), rename)
            .await
            .unwrap();

        let settled = EntityStore::<GoalFields>::mark_uploaded(
            &store,
            &id("g1"),
            uploaded_revision,
            timestamp_now(),
        )
        .await
        .unwrap();
        assert!(!settled);

        let goal: Record<GoalFields> = store.get_by_id(&id("g1")).await.unwrap().unwrap();
        assert_eq!(goal.meta.sync_status, SyncStatus::Pending);
        assert!(goal.meta.synced_at.is_some());
    }

    #[tokio::test]
    async fn test_remote_deleted_excluded_from_reads() {
        let store = MemoryStore::new();
        store.create(id("g1"), GoalFields::new("Run")).await.unwrap();
        EntityStore::<GoalFields>::mark_synced(&store, &id("g1"), timestamp_now())
            .await
            .unwrap();
        EntityStore::<GoalFields>::mark_remote_deleted(&store, &id("g1"))
            .await
            .unwrap();

        let active: Vec<Record<GoalFields>> = store.list_active().await.unwrap();
        let pending: Vec<Record<GoalFields>> = store.list_pending().await.unwrap();
        let synced = EntityStore::<GoalFields>::list_synced_ids(&store).await.unwrap();
        assert!(active.is_empty());
        assert!(pending.is_empty());
        assert!(synced.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_inserts_and_overwrites() {
        let store = MemoryStore::new();
        let remote_time = timestamp_now() - Duration::hours(1);
        let row = RemoteRow::new(id("g1"), GoalFields::new("Remote")).with_updated_at(remote_time);

        let inserted = store.upsert_from_remote(row).await.unwrap();
        assert_eq!(inserted.meta.sync_status, SyncStatus::Synced);
        assert_eq!(inserted.meta.updated_at, remote_time);
        assert!(inserted.meta.synced_at.is_some());

        let row = RemoteRow::new(id("g1"), GoalFields::new("Renamed"));
        let overwritten = store.upsert_from_remote(row).await.unwrap();
        assert_eq!(overwritten.fields.name, "Renamed");
        assert_eq!(overwritten.meta.created_at, inserted.meta.created_at);
    }

    #[tokio::test]
    async fn test_snapshots_are_owned() {
        let store = MemoryStore::new();
        let mut goal = store.create(id("g1"), GoalFields::new("Run")).await.unwrap();
        goal.fields.name = "mutated".to_string();

        let stored: Record<GoalFields> = store.get_by_id(&id("g1")).await.unwrap().unwrap();
        assert_eq!(stored.fields.name, "Run");
    }
}
