//! Goalpost Sync Engine
//!
//! Offline-first reconciliation between the local entity store and the
//! remote REST service:
//! - Upload of pending local edits, isolated per record
//! - Download merge with tombstone and conflict detection
//! - Single-flight engine state machine with observers
//! - Periodic scheduling with manual triggers

pub mod config;
pub mod conflict;
pub mod engine;
pub mod scheduler;
pub mod state;
pub mod tracker;

// Re-export main types
pub use config::SyncConfig;
pub use conflict::{ConflictResolver, ConflictStrategy, MergeDecision, Resolution, SkipReason};
pub use engine::{SyncEngine, SyncOutcome, SyncReport, SyncStats, SYNC_FAILED_MESSAGE};
pub use scheduler::{SyncRequest, SyncScheduler, SyncSchedulerHandle};
pub use state::{EngineStatus, ListenerRegistry, Subscription, SyncState};
pub use tracker::ChangeTracker;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let config = SyncConfig::default();
        let resolver = ConflictResolver::new(config.conflict_strategy);
        assert_eq!(resolver.strategy(), ConflictStrategy::Manual);
        assert_eq!(SyncState::new().status, EngineStatus::Idle);
    }
}
