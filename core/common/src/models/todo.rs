//! Todo model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::Fields;
use super::repeat::RepeatConfig;
use super::task::Priority;
use crate::types::EntityKind;
use crate::{Error, Result};

/// Completion state of a Todo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoStatus {
    #[default]
    Pending,
    Completed,
}

/// Domain fields of a Todo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoFields {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: TodoStatus,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub repeat: RepeatConfig,
}

impl TodoFields {
    /// Create an open todo with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            due_date: None,
            priority: Priority::default(),
            status: TodoStatus::Pending,
            completed_at: None,
            repeat: RepeatConfig::default(),
        }
    }

    /// Set the due date.
    pub fn due(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }
}

/// Partial update for a Todo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub priority: Option<Priority>,
    pub status: Option<TodoStatus>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub repeat: Option<RepeatConfig>,
}

impl TodoPatch {
    /// Mark the todo completed at `at`.
    pub fn complete(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(TodoStatus::Completed),
            completed_at: Some(Some(at)),
            ..Self::default()
        }
    }

    /// Reopen a completed todo.
    pub fn reopen() -> Self {
        Self {
            status: Some(TodoStatus::Pending),
            completed_at: Some(None),
            ..Self::default()
        }
    }
}

impl Fields for TodoFields {
    const KIND: EntityKind = EntityKind::Todo;
    type Patch = TodoPatch;

    fn apply(&mut self, patch: TodoPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at = completed_at;
        }
        if let Some(repeat) = patch.repeat {
            self.repeat = repeat;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidInput("Todo title cannot be empty".to_string()));
        }
        self.repeat.validate()
    }
}
