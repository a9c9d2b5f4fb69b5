//! Goal model.

use serde::{Deserialize, Serialize};

use super::record::Fields;
use crate::types::{EntityId, EntityKind};
use crate::{Error, Result};

/// Domain fields of a Goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalFields {
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Dense, user-controlled ranking (1-based).
    #[serde(default)]
    pub order: i64,
}

impl GoalFields {
    /// Create goal fields with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            order: 0,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the ranking.
    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }
}

/// Partial update for a Goal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoalPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub order: Option<i64>,
}

impl Fields for GoalFields {
    const KIND: EntityKind = EntityKind::Goal;
    type Patch = GoalPatch;

    fn apply(&mut self, patch: GoalPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(order) = patch.order {
            self.order = order;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("Goal name cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// One entry of a goal reorder request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalOrder {
    pub id: EntityId,
    pub order: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_serializes_camel_case_without_metadata() {
        let goal = GoalFields::new("Read more").with_order(3);
        let json = serde_json::to_value(&goal).unwrap();
        assert_eq!(json["name"], "Read more");
        assert_eq!(json["order"], 3);
        assert!(json.get("syncStatus").is_none());
    }

    #[test]
    fn test_goal_patch_clears_description() {
        let mut goal = GoalFields::new("Read").with_description("20 books");
        goal.apply(GoalPatch {
            description: Some(None),
            ..GoalPatch::default()
        });
        assert_eq!(goal.description, None);
        assert_eq!(goal.name, "Read");
    }
}
