//! Local rows and remote rows.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{EntityId, EntityKind, SyncMeta, SyncStatus};
use crate::{Error, Result};

/// Domain fields of one entity kind.
///
/// Implementors are the payloads that travel to and from the remote service;
/// reconciliation metadata never lives here.
pub trait Fields:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Kind these fields belong to.
    const KIND: EntityKind;

    /// Partial update applied by `EntityStore::update`.
    type Patch: Clone + fmt::Debug + Default + Send + Sync + 'static;

    /// Merge a partial update into these fields.
    fn apply(&mut self, patch: Self::Patch);

    /// Check domain constraints.
    ///
    /// # Errors
    /// - `InvalidInput` when a field is out of range
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// A locally stored record: id, domain fields and reconciliation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record<F> {
    /// Client-generated id.
    pub id: EntityId,
    /// Domain fields.
    #[serde(flatten)]
    pub fields: F,
    /// Reconciliation metadata.
    #[serde(flatten)]
    pub meta: SyncMeta,
}

impl<F: Fields> Record<F> {
    /// Create a new local record, pending upload.
    ///
    /// # Errors
    /// - `InvalidInput` if the fields fail validation
    pub fn new_local(id: EntityId, fields: F, now: DateTime<Utc>) -> Result<Self> {
        fields.validate()?;
        Ok(Self {
            id,
            fields,
            meta: SyncMeta::new_local(now),
        })
    }

    /// Create a synced record from a remote listing.
    pub fn from_remote(row: RemoteRow<F>, now: DateTime<Utc>) -> Self {
        let created_at = row.created_at.unwrap_or(now);
        let updated_at = row.updated_at.unwrap_or(created_at);
        Self {
            id: row.id,
            fields: row.fields,
            meta: SyncMeta::new_synced(created_at, updated_at, now),
        }
    }

    /// Kind of this record.
    pub fn kind(&self) -> EntityKind {
        F::KIND
    }

    /// Apply a local edit. The record becomes pending whatever changed.
    ///
    /// # Errors
    /// - `Conflict` if the record awaits conflict resolution
    /// - `InvalidInput` if the patched fields fail validation; the record is left untouched
    pub fn apply_patch(&mut self, patch: F::Patch, now: DateTime<Utc>) -> Result<()> {
        self.ensure_editable()?;
        let mut fields = self.fields.clone();
        fields.apply(patch);
        fields.validate()?;
        self.fields = fields;
        self.meta.touch(now);
        Ok(())
    }

    /// Soft-delete locally.
    ///
    /// # Errors
    /// - `Conflict` if the record awaits conflict resolution
    pub fn soft_delete(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_editable()?;
        self.meta.soft_delete(now);
        Ok(())
    }

    fn ensure_editable(&self) -> Result<()> {
        if self.meta.sync_status == SyncStatus::Conflict {
            return Err(Error::Conflict(format!(
                "{} {} must be resolved before editing",
                F::KIND,
                self.id
            )));
        }
        Ok(())
    }

    /// Overwrite domain fields and timestamps with the remote copy.
    pub fn overwrite_from_remote(&mut self, row: RemoteRow<F>, now: DateTime<Utc>) {
        self.fields = row.fields;
        if let Some(created_at) = row.created_at {
            self.meta.created_at = created_at;
        }
        if let Some(updated_at) = row.updated_at {
            self.meta.updated_at = updated_at;
        }
        self.meta.mark_synced(now);
    }
}

/// A row as returned by the remote service.
///
/// Unknown server-side columns are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRow<F> {
    /// Record id.
    pub id: EntityId,
    /// Domain fields.
    #[serde(flatten)]
    pub fields: F,
    /// Server-side creation time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Server-side modification time.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl<F: Fields> RemoteRow<F> {
    /// Build a remote row without server timestamps.
    pub fn new(id: EntityId, fields: F) -> Self {
        Self {
            id,
            fields,
            created_at: None,
            updated_at: None,
        }
    }

    /// Attach a server modification time.
    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GoalFields, GoalPatch, TaskFields};
    use crate::types::timestamp_now;
    use chrono::Duration;

    #[test]
    fn test_new_local_record() {
        let now = timestamp_now();
        let record = Record::new_local(EntityId::generate(), GoalFields::new("Run"), now).unwrap();
        assert_eq!(record.kind(), EntityKind::Goal);
        assert_eq!(record.meta.sync_status, SyncStatus::Pending);
        assert!(record.meta.synced_at.is_none());
        assert_eq!(record.meta.created_at, now);
    }

    #[test]
    fn test_invalid_patch_leaves_record_untouched() {
        let now = timestamp_now();
        let mut record =
            Record::new_local(EntityId::generate(), GoalFields::new("Run"), now).unwrap();
        record.meta.mark_synced(now);

        let patch = GoalPatch {
            name: Some("   ".to_string()),
            ..GoalPatch::default()
        };
        assert!(record.apply_patch(patch, now).is_err());
        assert_eq!(record.fields.name, "Run");
        assert_eq!(record.meta.sync_status, SyncStatus::Synced);
    }

    #[test]
    fn test_conflicted_record_rejects_edits() {
        let now = timestamp_now();
        let mut record =
            Record::new_local(EntityId::generate(), GoalFields::new("Run"), now).unwrap();
        record.meta.sync_status = SyncStatus::Conflict;

        let err = record.apply_patch(GoalPatch::default(), now).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(record.meta.revision, 1);

        let err = record.soft_delete(now).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(record.meta.deleted_at.is_none());
        assert_eq!(record.meta.revision, 1);
    }

    #[test]
    fn test_overwrite_from_remote_keeps_local_times_when_absent() {
        let now = timestamp_now();
        let id = EntityId::generate();
        let mut record = Record::new_local(id.clone(), GoalFields::new("Run"), now).unwrap();

        let later = now + Duration::seconds(5);
        record.overwrite_from_remote(RemoteRow::new(id, GoalFields::new("Swim")), later);

        assert_eq!(record.fields.name, "Swim");
        assert_eq!(record.meta.updated_at, now);
        assert_eq!(record.meta.synced_at, Some(later));
        assert_eq!(record.meta.sync_status, SyncStatus::Synced);
    }

    #[test]
    fn test_remote_row_ignores_unknown_columns() {
        let json = r#"{
            "id": "t-1",
            "goalId": "g-1",
            "description": "Write report",
            "priority": "high",
            "completionPercentage": 40,
            "isRepeat": true,
            "repeatInterval": 2,
            "repeatUnit": "week",
            "userId": "someone",
            "createdAt": "2024-03-01T10:00:00Z",
            "updatedAt": "2024-03-02T10:00:00Z"
        }"#;

        let row: RemoteRow<TaskFields> = serde_json::from_str(json).unwrap();
        assert_eq!(row.id.as_str(), "t-1");
        assert_eq!(row.fields.goal_id.as_ref().map(|g| g.as_str()), Some("g-1"));
        assert_eq!(row.fields.completion_percentage, 40);
        assert!(row.fields.repeat.is_repeat);
        assert_eq!(row.fields.repeat.repeat_interval, 2);
        assert!(row.updated_at.unwrap() > row.created_at.unwrap());
    }
}
