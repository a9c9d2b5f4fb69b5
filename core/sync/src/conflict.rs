//! Download merge decisions and conflict resolution.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use goalpost_common::{Error, Fields, Record, RemoteRow, Result, SyncStatus};

/// What to do when local and remote both changed a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Flag the record and wait for `resolve_conflict`.
    #[default]
    Manual,
    /// Keep the local edit; it uploads on the next pass.
    PreferLocal,
    /// Overwrite the local edit with the remote copy.
    PreferRemote,
}

/// Why a remote row was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Local row is a remote tombstone.
    Tombstoned,
    /// Local row is soft-deleted.
    LocalDelete,
    /// Remote copy matches what is stored.
    Unchanged,
    /// Local edit still waiting for upload.
    PendingLocal,
    /// Local row waits for manual resolution.
    AwaitingResolution,
}

/// Outcome of comparing one remote row against local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Write the remote copy locally.
    Apply,
    /// Leave the local row alone.
    Skip(SkipReason),
    /// Both sides changed; flag the local row.
    Conflict,
}

/// Manual resolution of a flagged record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Re-queue the local copy for upload.
    KeepLocal,
    /// Replace the local copy with the remote one.
    KeepRemote,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::KeepLocal => f.write_str("local"),
            Resolution::KeepRemote => f.write_str("remote"),
        }
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "keep_local" => Ok(Resolution::KeepLocal),
            "remote" | "keep_remote" => Ok(Resolution::KeepRemote),
            other => Err(Error::InvalidInput(format!("Unknown resolution: {other}"))),
        }
    }
}

/// Decides how each downloaded row merges into the local store.
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    strategy: ConflictStrategy,
}

impl ConflictResolver {
    /// Create a resolver with the given strategy.
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self { strategy }
    }

    /// The configured strategy.
    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Compare a remote row with the local row of the same id.
    ///
    /// Tombstones are terminal and a local pending edit is never overwritten
    /// silently; a remote change after our last sync under a pending local
    /// edit is a conflict.
    pub fn decide<F: Fields>(
        &self,
        local: Option<&Record<F>>,
        remote: &RemoteRow<F>,
    ) -> MergeDecision {
        let Some(local) = local else {
            return MergeDecision::Apply;
        };
        let meta = &local.meta;

        if meta.remote_deleted {
            return MergeDecision::Skip(SkipReason::Tombstoned);
        }

        match meta.sync_status {
            SyncStatus::Synced => {
                if meta.deleted_at.is_some() {
                    MergeDecision::Skip(SkipReason::LocalDelete)
                } else if local.fields == remote.fields
                    && remote.updated_at.map_or(true, |at| at == meta.updated_at)
                {
                    MergeDecision::Skip(SkipReason::Unchanged)
                } else {
                    MergeDecision::Apply
                }
            }
            SyncStatus::Conflict => MergeDecision::Skip(SkipReason::AwaitingResolution),
            SyncStatus::Pending => {
                if meta.deleted_at.is_some() {
                    return MergeDecision::Skip(SkipReason::LocalDelete);
                }
                let remote_changed = match (meta.synced_at, remote.updated_at) {
                    (Some(synced_at), Some(updated_at)) => updated_at > synced_at,
                    _ => false,
                };
                if !remote_changed {
                    return MergeDecision::Skip(SkipReason::PendingLocal);
                }
                match self.strategy {
                    ConflictStrategy::Manual => MergeDecision::Conflict,
                    ConflictStrategy::PreferLocal => MergeDecision::Skip(SkipReason::PendingLocal),
                    ConflictStrategy::PreferRemote => MergeDecision::Apply,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use goalpost_common::{timestamp_now, EntityId, GoalFields};

    fn local_goal(name: &str) -> Record<GoalFields> {
        Record::new_local(EntityId::new("g1").unwrap(), GoalFields::new(name), timestamp_now())
            .unwrap()
    }

    fn remote_goal(name: &str) -> RemoteRow<GoalFields> {
        RemoteRow::new(EntityId::new("g1").unwrap(), GoalFields::new(name))
    }

    #[test]
    fn test_new_remote_row_applies() {
        let resolver = ConflictResolver::default();
        assert_eq!(
            resolver.decide(None, &remote_goal("Run")),
            MergeDecision::Apply
        );
    }

    #[test]
    fn test_tombstone_is_terminal() {
        let mut local = local_goal("Run");
        local.meta.mark_remote_deleted();
        let decision = ConflictResolver::default().decide(Some(&local), &remote_goal("Run"));
        assert_eq!(decision, MergeDecision::Skip(SkipReason::Tombstoned));
    }

    #[test]
    fn test_synced_row_takes_remote_changes() {
        let mut local = local_goal("Run");
        local.meta.mark_synced(timestamp_now());

        let resolver = ConflictResolver::default();
        assert_eq!(
            resolver.decide(Some(&local), &remote_goal("Swim")),
            MergeDecision::Apply
        );
        assert_eq!(
            resolver.decide(Some(&local), &remote_goal("Run")),
            MergeDecision::Skip(SkipReason::Unchanged)
        );
    }

    #[test]
    fn test_pending_row_without_remote_change_is_kept() {
        let mut local = local_goal("Run");
        let synced_at = timestamp_now();
        local.meta.mark_synced(synced_at);
        local.meta.touch(synced_at + Duration::seconds(1));

        let remote = remote_goal("Run").with_updated_at(synced_at - Duration::seconds(5));
        let decision = ConflictResolver::default().decide(Some(&local), &remote);
        assert_eq!(decision, MergeDecision::Skip(SkipReason::PendingLocal));
    }

    #[test]
    fn test_both_sides_changed_follows_strategy() {
        let mut local = local_goal("Run");
        let synced_at = timestamp_now();
        local.meta.mark_synced(synced_at);
        local.meta.touch(synced_at + Duration::seconds(1));
        let remote = remote_goal("Swim").with_updated_at(synced_at + Duration::seconds(2));

        let decide = |strategy| ConflictResolver::new(strategy).decide(Some(&local), &remote);
        assert_eq!(decide(ConflictStrategy::Manual), MergeDecision::Conflict);
        assert_eq!(
            decide(ConflictStrategy::PreferLocal),
            MergeDecision::Skip(SkipReason::PendingLocal)
        );
        assert_eq!(decide(ConflictStrategy::PreferRemote), MergeDecision::Apply);
    }

    #[test]
    fn test_never_synced_pending_row_is_kept() {
        let local = local_goal("Run");
        let remote = remote_goal("Swim").with_updated_at(timestamp_now() + Duration::hours(1));
        let decision = ConflictResolver::default().decide(Some(&local), &remote);
        assert_eq!(decision, MergeDecision::Skip(SkipReason::PendingLocal));
    }

    #[test]
    fn test_conflicted_row_waits() {
        let mut local = local_goal("Run");
        local.meta.sync_status = SyncStatus::Conflict;
        let decision = ConflictResolver::default().decide(Some(&local), &remote_goal("Swim"));
        assert_eq!(decision, MergeDecision::Skip(SkipReason::AwaitingResolution));
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!("local".parse::<Resolution>().unwrap(), Resolution::KeepLocal);
        assert_eq!("REMOTE".parse::<Resolution>().unwrap(), Resolution::KeepRemote);
        assert!("both".parse::<Resolution>().is_err());
    }
}
