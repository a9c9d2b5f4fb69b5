//! SQLite-backed entity store.
//!
//! One table per kind. Reconciliation metadata lives in real columns so the
//! engine's queries are index lookups; domain fields are a JSON document.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use goalpost_common::{
    timestamp_now, EntityId, EntityKind, Error, Fields, Record, RemoteRow, Result, SyncMeta,
    SyncStatus,
};

use crate::store::EntityStore;

const COLUMNS: &str = "id, data, created_at, updated_at, deleted_at, synced_at, \
                       sync_status, remote_deleted, revision";

/// Durable entity store on a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db_err(err: rusqlite::Error) -> Error {
    Error::Storage(err.to_string())
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::Storage(format!("Timestamp out of range: {ms}")))
}

/// A row exactly as stored, before JSON and timestamp decoding.
struct StoredRow {
    id: String,
    data: String,
    created_at: i64,
    updated_at: i64,
    deleted_at: Option<i64>,
    synced_at: Option<i64>,
    sync_status: String,
    remote_deleted: bool,
    revision: i64,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            data: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
            deleted_at: row.get(4)?,
            synced_at: row.get(5)?,
            sync_status: row.get(6)?,
            remote_deleted: row.get::<_, i32>(7)? != 0,
            revision: row.get(8)?,
        })
    }

    fn into_record<F: Fields>(self) -> Result<Record<F>> {
        Ok(Record {
            id: EntityId::new(self.id)?,
            fields: serde_json::from_str(&self.data)?,
            meta: SyncMeta {
                created_at: from_millis(self.created_at)?,
                updated_at: from_millis(self.updated_at)?,
                deleted_at: self.deleted_at.map(from_millis).transpose()?,
                synced_at: self.synced_at.map(from_millis).transpose()?,
                sync_status: self.sync_status.parse::<SyncStatus>()?,
                remote_deleted: self.remote_deleted,
                revision: self.revision.max(0) as u64,
            },
        })
    }
}

impl SqliteStore {
    /// Create or open a store database.
    ///
    /// # Arguments
    /// - `path`: Path to the SQLite database file
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err)?;
        let store = Self::init(conn)?;
        info!("Entity store opened at {}", path.as_ref().display());
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        for kind in EntityKind::ALL {
            let table = kind.collection();
            conn.execute_batch(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    data TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    deleted_at INTEGER,
                    synced_at INTEGER,
                    sync_status TEXT NOT NULL,
                    remote_deleted INTEGER NOT NULL DEFAULT 0,
                    revision INTEGER NOT NULL DEFAULT 0
                );

                CREATE INDEX IF NOT EXISTS idx_{table}_sync_status ON {table}(sync_status);
                CREATE INDEX IF NOT EXISTS idx_{table}_deleted_at ON {table}(deleted_at);
                "#
            ))
            .map_err(db_err)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("connection lock poisoned".to_string()))
    }

    fn load<F: Fields>(conn: &Connection, id: &EntityId) -> Result<Option<Record<F>>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE id = ?1",
            F::KIND.collection()
        );
        let stored = conn
            .query_row(&sql, [id.as_str()], StoredRow::from_row)
            .optional()
            .map_err(db_err)?;
        stored.map(StoredRow::into_record).transpose()
    }

    fn save<F: Fields>(conn: &Connection, record: &Record<F>) -> Result<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            F::KIND.collection()
        );
        let meta = &record.meta;
        conn.execute(
            &sql,
            params![
                record.id.as_str(),
                serde_json::to_string(&record.fields)?,
                to_millis(meta.created_at),
                to_millis(meta.updated_at),
                meta.deleted_at.map(to_millis),
                meta.synced_at.map(to_millis),
                meta.sync_status.as_str(),
                meta.remote_deleted as i32,
                meta.revision as i64,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Records matching a fixed SQL condition.
    fn select<F: Fields>(&self, condition: &str, order_by: &str) -> Result<Vec<Record<F>>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE {condition} ORDER BY {order_by}",
            F::KIND.collection()
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt.query_map([], StoredRow::from_row).map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(db_err)?.into_record()?);
        }
        Ok(records)
    }

    /// Read-modify-write one record under the connection lock.
    fn modify<F, T>(
        &self,
        id: &EntityId,
        f: impl FnOnce(&mut Record<F>) -> Result<T>,
    ) -> Result<T>
    where
        F: Fields,
    {
        let conn = self.lock()?;
        let mut record = Self::load::<F>(&conn, id)?
            .ok_or_else(|| Error::NotFound(format!("{} {id}", F::KIND)))?;
        let out = f(&mut record)?;
        Self::save(&conn, &record)?;
        Ok(out)
    }
}

#[async_trait]
impl<F: Fields> EntityStore<F> for SqliteStore {
    async fn create(&self, id: EntityId, fields: F) -> Result<Record<F>> {
        let record = Record::new_local(id, fields, timestamp_now())?;
        let conn = self.lock()?;
        if Self::load::<F>(&conn, &record.id)?.is_some() {
            return Err(Error::AlreadyExists(format!("{} {}", F::KIND, record.id)));
        }
        Self::save(&conn, &record)?;
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
        let conn = self.lock()?;
        Self::load(&conn, id)
    }

    async fn list_all(&self) -> Result<Vec<Record<F>>> {
        self.select("1 = 1", "id")
    }

    async fn list_active(&self) -> Result<Vec<Record<F>>> {
        self.select("deleted_at IS NULL AND remote_deleted = 0", "id")
    }

    async fn list_pending(&self) -> Result<Vec<Record<F>>> {
        self.select(
            "sync_status = 'pending' AND remote_deleted = 0",
            "updated_at, id",
        )
    }

    async fn list_conflicts(&self) -> Result<Vec<Record<F>>> {
        self.select("sync_status = 'conflict'", "id")
    }

    async fn list_synced_ids(&self) -> Result<Vec<EntityId>> {
        let settled: Vec<Record<F>> = self.select(
            "sync_status = 'synced' AND synced_at IS NOT NULL \
             AND deleted_at IS NULL AND remote_deleted = 0",
            "id",
        )?;
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
        let conn = self.lock()?;
        let record = match Self::load::<F>(&conn, &row.id)? {
            Some(mut existing) => {
                existing.overwrite_from_remote(row, now);
                existing
            }
            None => Record::from_remote(row, now),
        };
        Self::save(&conn, &record)?;
        Ok(record)
    }

    async fn purge(&self, id: &EntityId) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn
            .execute(
                &format!("DELETE FROM {} WHERE id = ?1", F::KIND.collection()),
                params![id.as_str()],
            )
            .map_err(db_err)?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goalpost_common::{GoalFields, GoalPatch, Priority, TaskFields, TodoFields};
    use tempfile::TempDir;

    fn id(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_read_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let created = store
            .create(id("t1"), TaskFields::new("Write").with_priority(Priority::High))
            .await
            .unwrap();

        let loaded: Record<TaskFields> = store.get_by_id(&id("t1")).await.unwrap().unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.meta.sync_status, SyncStatus::Pending);
        assert!(loaded.meta.synced_at.is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create(id("g1"), GoalFields::new("Run")).await.unwrap();
        let err = store.create(id("g1"), GoalFields::new("Run")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_update_merges_and_marks_pending() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .create(id("g1"), GoalFields::new("Run").with_description("daily"))
            .await
            .unwrap();
        EntityStore::<GoalFields>::mark_synced(&store, &id("g1"), timestamp_now())
            .await
            .unwrap();

        let patch = GoalPatch {
            order: Some(4),
            ..GoalPatch::default()
        };
        let goal = EntityStore::<GoalFields>::update(&store, &id("g1"), patch)
            .await
            .unwrap();
        assert_eq!(goal.fields.name, "Run");
        assert_eq!(goal.fields.description.as_deref(), Some("daily"));
        assert_eq!(goal.fields.order, 4);
        assert_eq!(goal.meta.sync_status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_pending_and_synced_queries() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create(id("a"), TodoFields::new("a")).await.unwrap();
        store.create(id("b"), TodoFields::new("b")).await.unwrap();
        store.create(id("c"), TodoFields::new("c")).await.unwrap();
        let now = timestamp_now();
        EntityStore::<TodoFields>::mark_synced(&store, &id("a"), now)
            .await
            .unwrap();
        EntityStore::<TodoFields>::mark_synced(&store, &id("c"), now)
            .await
            .unwrap();
        EntityStore::<TodoFields>::mark_remote_deleted(&store, &id("c"))
            .await
            .unwrap();

        let pending: Vec<Record<TodoFields>> = store.list_pending().await.unwrap();
        assert_eq!(pending.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), ["b"]);

        let synced = EntityStore::<TodoFields>::list_synced_ids(&store).await.unwrap();
        assert_eq!(synced, vec![id("a")]);

        let active: Vec<Record<TodoFields>> = store.list_active().await.unwrap();
        assert_eq!(active.len(), 2);
    }

    #[tokio::test]
    async fn test_upsert_from_remote_overwrites() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create(id("g1"), GoalFields::new("Local")).await.unwrap();

        let record = store
            .upsert_from_remote(RemoteRow::new(id("g1"), GoalFields::new("Remote")))
            .await
            .unwrap();
        assert_eq!(record.fields.name, "Remote");
        assert_eq!(record.meta.sync_status, SyncStatus::Synced);

        let loaded: Record<GoalFields> = store.get_by_id(&id("g1")).await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_purge() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create(id("g1"), GoalFields::new("Run")).await.unwrap();

        assert!(EntityStore::<GoalFields>::purge(&store, &id("g1")).await.unwrap());
        assert!(!EntityStore::<GoalFields>::purge(&store, &id("g1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("goalpost.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.create(id("g1"), GoalFields::new("Run")).await.unwrap();
            EntityStore::<GoalFields>::soft_delete(&store, &id("g1"))
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let goal: Record<GoalFields> = store.get_by_id(&id("g1")).await.unwrap().unwrap();
        assert!(goal.meta.deleted_at.is_some());
        assert_eq!(goal.meta.sync_status, SyncStatus::Pending);
        assert_eq!(goal.meta.revision, 2);
    }
}
