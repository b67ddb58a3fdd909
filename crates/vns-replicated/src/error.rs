//! Error types for the replicated engines.

use thiserror::Error;
use vns_store::StoreError;

/// Errors surfaced by codecs, engines and the persistent-entry helpers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplicatedError {
    /// A key or value can not be written as a path segment. Raised before
    /// any store call.
    #[error("Cannot encode {field} {input:?}: {reason}")]
    Encoding {
        field: &'static str,
        input: String,
        reason: &'static str,
    },

    /// A node name found during a scan is not a valid entry.
    #[error("Malformed entry {segment:?}: {reason}")]
    MalformedEntry { segment: String, reason: String },

    /// A typed codec rejected a decoded string.
    #[error("Cannot decode {field} {input:?}: {reason}")]
    Codec {
        field: &'static str,
        input: String,
        reason: String,
    },

    /// Connection loss persisted through every retry.
    #[error("Store connection lost during {operation} after {attempts} attempts")]
    StoreConnection {
        operation: &'static str,
        attempts: u32,
    },

    /// The session ended; locally owned ephemeral entries are gone.
    #[error("Store session expired")]
    StoreSessionExpired,

    /// A conditional operation hit a node that changed underneath it.
    #[error("Version conflict at {0}")]
    StoreVersionConflict(String),

    /// A listener callback panicked. Only ever logged.
    #[error("Listener failed: {0}")]
    Listener(String),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl ReplicatedError {
    /// Whether the mirror should be treated as possibly stale after this
    /// error.
    pub fn marks_stale(&self) -> bool {
        matches!(
            self,
            ReplicatedError::StoreConnection { .. } | ReplicatedError::StoreSessionExpired
        )
    }
}

impl From<StoreError> for ReplicatedError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SessionExpired => ReplicatedError::StoreSessionExpired,
            StoreError::ConnectionLoss => ReplicatedError::StoreConnection {
                operation: "store call",
                attempts: 1,
            },
            StoreError::VersionMismatch { path, .. } => ReplicatedError::StoreVersionConflict(path),
            other => ReplicatedError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReplicatedError>;
