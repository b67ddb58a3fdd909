//! Error types for store operations.

use thiserror::Error;

/// Errors returned by a [`Directory`](crate::Directory).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("No node: {0}")]
    NoNode(String),

    #[error("Version mismatch at {path}: expected {expected}, found {actual}")]
    VersionMismatch {
        path: String,
        expected: u32,
        actual: u32,
    },

    #[error("Node has children: {0}")]
    NotEmpty(String),

    #[error("Ephemeral nodes cannot have children: {0}")]
    NoChildrenForEphemerals(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("Connection lost")]
    ConnectionLoss,
}

impl StoreError {
    /// Whether the same call may succeed if retried on the same session.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::ConnectionLoss)
    }

    /// Whether the session that issued the call is gone for good.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, StoreError::SessionExpired)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
