//! Path helpers for the hierarchical namespace.
//!
//! Paths are absolute, `/`-separated, with no empty segments and no
//! trailing separator. The root is `/`.

use crate::error::{Result, StoreError};

pub const ROOT: &str = "/";

/// Check that `path` is a well-formed absolute path.
pub fn validate_path(path: &str) -> Result<()> {
    if path == ROOT {
        return Ok(());
    }
    if !path.starts_with('/') || path.ends_with('/') {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    if path[1..].split('/').any(|segment| segment.is_empty()) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Append a child name to a parent path.
pub fn join_path(parent: &str, child: &str) -> String {
    if parent == ROOT {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Split a path into its parent path and final segment.
///
/// Returns `None` for the root.
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    if path == ROOT {
        return None;
    }
    let idx = path.rfind('/')?;
    let parent = if idx == 0 { ROOT } else { &path[..idx] };
    Some((parent, &path[idx + 1..]))
}

/// Final segment of a path (the node name).
pub fn node_name(path: &str) -> &str {
    split_path(path).map(|(_, name)| name).unwrap_or("")
}
