//! Common error types for Goalpost.

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for Goalpost operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Local store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A single remote call failed (non-2xx answer or `success: false`).
    #[error("Gateway error{}: {message}", fmt_status(.status))]
    Gateway {
        /// HTTP status, when the server answered at all.
        status: Option<u16>,
        /// Server or transport message.
        message: String,
    },

    /// The remote service could not be reached.
    #[error("Remote unavailable: {0}")]
    TransportUnavailable(String),

    /// A reconciliation pass exceeded its deadline.
    #[error("Sync timed out after {0:?}")]
    Timeout(Duration),

    /// Conflicting local and remote edits.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A background component stopped answering.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl Error {
    /// Build a gateway error carrying an HTTP status.
    pub fn gateway(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Gateway {
            status,
            message: message.into(),
        }
    }

    /// True for local `NotFound` and for remote 404 answers.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::Gateway { status: Some(404), .. }
        )
    }

    /// True when the error came from the remote side rather than the local store.
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Gateway { .. } | Error::TransportUnavailable(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
