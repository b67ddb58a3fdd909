//! Error types for the typed tables.

use thiserror::Error;

/// A string that is not a MAC address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid MAC address {input:?}: {reason}")]
pub struct ParseMacError {
    pub input: String,
    pub reason: &'static str,
}
