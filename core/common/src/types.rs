//! Common types used throughout Goalpost.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{Error, Result};

/// Current time truncated to millisecond precision.
///
/// Every timestamp the stores write goes through this so that values read
/// back from SQLite compare equal to the ones handed out at write time.
pub fn timestamp_now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Globally unique, client-generated record identifier.
///
/// Ids are immutable once assigned and are used verbatim as the last
/// segment of remote resource URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing id.
    ///
    /// # Errors
    /// - Returns error if id is empty or contains a path separator
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("EntityId cannot be empty".to_string()));
        }
        if trimmed.contains('/') || trimmed.contains('?') || trimmed.contains('#') {
            return Err(Error::InvalidInput(format!(
                "EntityId cannot contain URL separators: {trimmed}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// The three synchronized entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Goal,
    Task,
    Todo,
}

impl EntityKind {
    /// All kinds, in upload order.
    pub const ALL: [EntityKind; 3] = [EntityKind::Goal, EntityKind::Task, EntityKind::Todo];

    /// Singular lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Goal => "goal",
            EntityKind::Task => "task",
            EntityKind::Todo => "todo",
        }
    }

    /// Plural collection name, used for REST paths and table names.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Goal => "goals",
            EntityKind::Task => "tasks",
            EntityKind::Todo => "todos",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "goal" | "goals" => Ok(EntityKind::Goal),
            "task" | "tasks" => Ok(EntityKind::Task),
            "todo" | "todos" => Ok(EntityKind::Todo),
            other => Err(Error::InvalidInput(format!("Unknown entity kind: {other}"))),
        }
    }
}

/// Reconciliation status of a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local change not yet acknowledged by remote.
    Pending,
    /// Local state mirrors the last known remote state.
    Synced,
    /// Local and remote both changed since the last sync.
    Conflict,
}

impl SyncStatus {
    /// Lowercase name as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Conflict => "conflict",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "conflict" => Ok(SyncStatus::Conflict),
            other => Err(Error::Serialization(format!("Unknown sync status: {other}"))),
        }
    }
}

/// Reconciliation metadata carried by every local row.
///
/// None of these fields is ever sent to the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Local soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Last successful reconciliation; `None` means never uploaded.
    pub synced_at: Option<DateTime<Utc>>,
    /// Current reconciliation status.
    pub sync_status: SyncStatus,
    /// Set once the remote side reports the record gone.
    pub remote_deleted: bool,
    /// Local mutation counter, bumped by every local edit.
    pub revision: u64,
}

impl SyncMeta {
    /// Metadata for a freshly created local record.
    pub fn new_local(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            deleted_at: None,
            synced_at: None,
            sync_status: SyncStatus::Pending,
            remote_deleted: false,
            revision: 1,
        }
    }

    /// Metadata for a record first seen in a remote listing.
    pub fn new_synced(
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            created_at,
            updated_at,
            deleted_at: None,
            synced_at: Some(now),
            sync_status: SyncStatus::Synced,
            remote_deleted: false,
            revision: 0,
        }
    }

    /// Record a local edit.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.sync_status = SyncStatus::Pending;
        self.revision += 1;
    }

    /// Mark as locally deleted, pending one more upload.
    pub fn soft_delete(&mut self, now: DateTime<Utc>) {
        self.deleted_at = Some(now);
        self.touch(now);
    }

    /// Mark as reconciled with the remote.
    pub fn mark_synced(&mut self, synced_at: DateTime<Utc>) {
        self.synced_at = Some(synced_at);
        self.sync_status = SyncStatus::Synced;
    }

    /// Mark as gone on the remote side.
    pub fn mark_remote_deleted(&mut self) {
        self.remote_deleted = true;
        self.sync_status = SyncStatus::Synced;
    }

    /// Visible to active reads.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none() && !self.remote_deleted
    }

    /// Eligible for the upload phase.
    pub fn is_upload_candidate(&self) -> bool {
        self.sync_status == SyncStatus::Pending && !self.remote_deleted
    }

    /// Part of the "previously synced" set used to detect remote deletes.
    pub fn is_settled(&self) -> bool {
        self.sync_status == SyncStatus::Synced
            && self.synced_at.is_some()
            && self.deleted_at.is_none()
            && !self.remote_deleted
    }

    /// Nothing left to reconcile: an acknowledged local delete or a remote tombstone.
    pub fn is_finalized(&self) -> bool {
        self.remote_deleted
            || (self.deleted_at.is_some() && self.sync_status == SyncStatus::Synced)
    }
}
