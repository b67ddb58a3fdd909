//! Path-segment encoding of map entries.
//!
//! An entry is stored as a single child node named
//! `<key>,<value>,<version>`. The version is assigned by the store when a
//! sequential node is created; persistent entries use the reserved version
//! `1` so they can be addressed from `(key, value)` alone.

use crate::error::{ReplicatedError, Result};

/// Separator between the three fields of a segment.
pub const SEPARATOR: char = ',';

/// Version carried by every persistent entry.
pub const PERSISTENT_VERSION: u64 = 1;

/// A decoded `(key, value, version)` triple.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntrySegment {
    pub key: String,
    pub value: String,
    pub version: u64,
}

impl EntrySegment {
    pub fn is_persistent(&self) -> bool {
        self.version == PERSISTENT_VERSION
    }
}

fn check_field(field: &'static str, input: &str) -> Result<()> {
    if input.contains(SEPARATOR) {
        return Err(ReplicatedError::Encoding {
            field,
            input: input.to_string(),
            reason: "contains the ',' separator",
        });
    }
    if input.contains('/') {
        return Err(ReplicatedError::Encoding {
            field,
            input: input.to_string(),
            reason: "contains the '/' path separator",
        });
    }
    Ok(())
}

/// Encode a full segment with an explicit version.
pub fn encode(key: &str, value: &str, version: u64) -> Result<String> {
    Ok(format!("{}{}", encode_prefix(key, value)?, version))
}

/// Encode `key,value,`; the store appends the version on sequential create.
pub fn encode_prefix(key: &str, value: &str) -> Result<String> {
    if key.is_empty() {
        return Err(ReplicatedError::Encoding {
            field: "key",
            input: String::new(),
            reason: "is empty",
        });
    }
    check_field("key", key)?;
    check_field("value", value)?;
    Ok(format!("{}{}{}{}", key, SEPARATOR, value, SEPARATOR))
}

/// Decode a segment. Leading zeros in the version are accepted.
pub fn decode(segment: &str) -> Result<EntrySegment> {
    let malformed = |reason: &str| ReplicatedError::MalformedEntry {
        segment: segment.to_string(),
        reason: reason.to_string(),
    };

    let mut parts = segment.split(SEPARATOR);
    let (key, value, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), Some(version), None) => (key, value, version),
        _ => return Err(malformed("expected exactly three fields")),
    };

    if key.is_empty() {
        return Err(malformed("empty key"));
    }
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed("version is not a decimal integer"));
    }
    let version = version
        .parse::<u64>()
        .map_err(|e| malformed(&e.to_string()))?;

    Ok(EntrySegment {
        key: key.to_string(),
        value: value.to_string(),
        version,
    })
}
