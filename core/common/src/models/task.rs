//! Task model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::Fields;
use super::repeat::RepeatConfig;
use crate::types::{EntityId, EntityKind};
use crate::{Error, Result};

/// Task and todo priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// Domain fields of a Task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFields {
    /// Owning goal. Not enforced: an orphaned id is accepted.
    #[serde(default)]
    pub goal_id: Option<EntityId>,
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// 0..=100
    #[serde(default)]
    pub completion_percentage: u8,
    #[serde(default)]
    pub actual_completion_date: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub repeat: RepeatConfig,
}

impl TaskFields {
    /// Create task fields with the given description.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            goal_id: None,
            description: description.into(),
            priority: Priority::default(),
            start_date: None,
            end_date: None,
            completion_percentage: 0,
            actual_completion_date: None,
            repeat: RepeatConfig::default(),
        }
    }

    /// Attach to a goal.
    pub fn for_goal(mut self, goal_id: EntityId) -> Self {
        self.goal_id = Some(goal_id);
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Partial update for a Task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub goal_id: Option<Option<EntityId>>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub start_date: Option<Option<DateTime<Utc>>>,
    pub end_date: Option<Option<DateTime<Utc>>>,
    pub completion_percentage: Option<u8>,
    pub actual_completion_date: Option<Option<DateTime<Utc>>>,
    pub repeat: Option<RepeatConfig>,
}

impl Fields for TaskFields {
    const KIND: EntityKind = EntityKind::Task;
    type Patch = TaskPatch;

    fn apply(&mut self, patch: TaskPatch) {
        if let Some(goal_id) = patch.goal_id {
            self.goal_id = goal_id;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(start_date) = patch.start_date {
            self.start_date = start_date;
        }
        if let Some(end_date) = patch.end_date {
            self.end_date = end_date;
        }
        if let Some(completion) = patch.completion_percentage {
            self.completion_percentage = completion;
        }
        if let Some(actual) = patch.actual_completion_date {
            self.actual_completion_date = actual;
        }
        if let Some(repeat) = patch.repeat {
            self.repeat = repeat;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.completion_percentage > 100 {
            return Err(Error::InvalidInput(format!(
                "Completion percentage must be within 0..=100, got {}",
                self.completion_percentage
            )));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(Error::InvalidInput(
                    "Task end date is before its start date".to_string(),
                ));
            }
        }
        self.repeat.validate()
    }
}
