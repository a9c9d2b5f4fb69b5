//! Sync engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use goalpost_common::{Error, Result};

use crate::conflict::ConflictStrategy;

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Deadline for the availability probe.
    #[serde(with = "goalpost_common::duration_secs")]
    pub probe_timeout: Duration,
    /// Deadline for one whole upload-then-download pass.
    #[serde(with = "goalpost_common::duration_secs")]
    pub pass_timeout: Duration,
    /// Period of the background scheduler.
    #[serde(with = "goalpost_common::duration_secs")]
    pub sync_interval: Duration,
    /// Tombstone synced records that vanish from the remote listing.
    pub detect_remote_deletes: bool,
    /// What to do when both sides changed a record.
    pub conflict_strategy: ConflictStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            pass_timeout: Duration::from_secs(10),
            sync_interval: Duration::from_secs(30),
            detect_remote_deletes: true,
            conflict_strategy: ConflictStrategy::Manual,
        }
    }
}

impl SyncConfig {
    /// Check that every duration is usable.
    ///
    /// # Errors
    /// `InvalidInput` naming the first zero duration.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("probe_timeout", self.probe_timeout),
            ("pass_timeout", self.pass_timeout),
            ("sync_interval", self.sync_interval),
        ] {
            if value.is_zero() {
                return Err(Error::InvalidInput(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}
