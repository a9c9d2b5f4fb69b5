//! Repeat configuration shared by Tasks and Todos.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Unit of a repeat interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatUnit {
    #[default]
    Day,
    Week,
    Month,
    Year,
}

/// Descriptive repeat rule. Occurrences are never expanded here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatConfig {
    #[serde(default)]
    pub is_repeat: bool,
    #[serde(default = "default_interval")]
    pub repeat_interval: u32,
    #[serde(default)]
    pub repeat_unit: RepeatUnit,
    #[serde(default)]
    pub repeat_end_date: Option<DateTime<Utc>>,
}

fn default_interval() -> u32 {
    1
}

impl RepeatConfig {
    /// A repeating rule every `interval` units.
    pub fn every(interval: u32, unit: RepeatUnit) -> Self {
        Self {
            is_repeat: true,
            repeat_interval: interval,
            repeat_unit: unit,
            repeat_end_date: None,
        }
    }

    /// Check that the interval is positive.
    pub fn validate(&self) -> Result<()> {
        if self.repeat_interval == 0 {
            return Err(Error::InvalidInput(
                "Repeat interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RepeatConfig {
    fn default() -> Self {
        Self {
            is_repeat: false,
            repeat_interval: default_interval(),
            repeat_unit: RepeatUnit::Day,
            repeat_end_date: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_interval_rejected() {
        let repeat = RepeatConfig::every(0, RepeatUnit::Week);
        assert!(repeat.validate().is_err());
        assert!(RepeatConfig::every(2, RepeatUnit::Week).validate().is_ok());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let repeat: RepeatConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(repeat, RepeatConfig::default());
    }
}
