//! Common utilities and types shared across Goalpost modules.
//!
//! This crate holds the error taxonomy, identifiers, reconciliation metadata
//! and the Goal/Task/Todo domain models. Every other crate in the workspace
//! speaks in these types.

pub mod duration_secs;
pub mod error;
pub mod models;
pub mod types;

pub use error::{Error, Result};
pub use models::{
    Fields, GoalFields, GoalOrder, GoalPatch, Priority, Record, RemoteRow, RepeatConfig,
    RepeatUnit, TaskFields, TaskPatch, TodoFields, TodoPatch, TodoStatus,
};
pub use types::{timestamp_now, EntityId, EntityKind, SyncMeta, SyncStatus};
