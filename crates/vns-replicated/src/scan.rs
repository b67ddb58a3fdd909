//! Scan, resolve and diff: the store-independent half of reconciliation.

use crate::codec::EntryCodec;
use crate::entry::{self, EntrySegment};
use crate::error::Result;
use crate::listener::Notification;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use tracing::warn;

/// A value together with the version of the node it was read from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<V> {
    pub value: V,
    pub version: u64,
}

/// Authoritative key → (value, version) view of a store path.
pub type Mirror<K, V> = HashMap<K, Versioned<V>>;

/// One decodable node found under the bound path.
#[derive(Clone, Debug)]
pub(crate) struct ScannedEntry<K> {
    pub(crate) key: K,
    pub(crate) name: String,
}

pub(crate) struct Scan<K, V> {
    pub(crate) authoritative: Mirror<K, V>,
    pub(crate) entries: Vec<ScannedEntry<K>>,
    pub(crate) malformed: usize,
}

impl<K: Eq + Hash, V> Scan<K, V> {
    /// Node names holding `key`, at any version.
    pub(crate) fn names_for(&self, key: &K) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| &e.key == key)
            .map(|e| e.name.clone())
            .collect()
    }
}

pub(crate) fn decode_typed<C: EntryCodec>(
    codec: &C,
    name: &str,
) -> Result<(C::Key, C::Value, EntrySegment)> {
    let segment = entry::decode(name)?;
    let key = codec.decode_key(&segment.key)?;
    let value = codec.decode_value(&segment.value)?;
    Ok((key, value, segment))
}

/// Higher version wins; equal versions fall back to the greater encoded
/// value so every replica picks the same entry.
fn supersedes(version: u64, value: &str, current_version: u64, current_value: &str) -> bool {
    version > current_version || (version == current_version && value > current_value)
}

/// Decode every child name and resolve the authoritative entry per key.
///
/// Malformed names are logged and skipped.
pub(crate) fn scan<C, I>(codec: &C, path: &str, children: I) -> Scan<C::Key, C::Value>
where
    C: EntryCodec,
    I: IntoIterator<Item = String>,
{
    let mut best: HashMap<C::Key, (Versioned<C::Value>, String)> = HashMap::new();
    let mut entries = Vec::new();
    let mut malformed = 0;

    for name in children {
        let (key, value, segment) = match decode_typed(codec, &name) {
            Ok(decoded) => decoded,
            Err(err) => {
                malformed += 1;
                warn!(path, entry = %name, error = %err, "skipping malformed entry");
                continue;
            }
        };

        entries.push(ScannedEntry {
            key: key.clone(),
            name,
        });

        let candidate = Versioned {
            value,
            version: segment.version,
        };
        match best.entry(key) {
            Entry::Occupied(mut slot) => {
                let (current, current_value) = slot.get();
                if supersedes(
                    segment.version,
                    &segment.value,
                    current.version,
                    current_value,
                ) {
                    slot.insert((candidate, segment.value));
                }
            }
            Entry::Vacant(slot) => {
                slot.insert((candidate, segment.value));
            }
        }
    }

    Scan {
        authoritative: best.into_iter().map(|(k, (v, _))| (k, v)).collect(),
        entries,
        malformed,
    }
}

/// Changes that turn `old` into `new`.
///
/// A version bump that keeps the same value is not a change.
pub(crate) fn diff<K, V>(old: &Mirror<K, V>, new: &Mirror<K, V>) -> Vec<Notification<K, V>>
where
    K: Clone + Eq + Hash,
    V: Clone + PartialEq,
{
    let mut changes = Vec::new();

    for (key, current) in new {
        match old.get(key) {
            None => changes.push(Notification {
                key: key.clone(),
                old: None,
                new: Some(current.value.clone()),
            }),
            Some(previous) if previous.value != current.value => changes.push(Notification {
                key: key.clone(),
                old: Some(previous.value.clone()),
                new: Some(current.value.clone()),
            }),
            Some(_) => {}
        }
    }

    for (key, previous) in old {
        if !new.contains_key(key) {
            changes.push(Notification {
                key: key.clone(),
                old: Some(previous.value.clone()),
                new: None,
            });
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::StringCodec;
    use crate::listener::ChangeKind;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_highest_version_wins() {
        let scan = scan(
            &StringCodec,
            "/m",
            names(&["k,old,0000000005", "k,new,0000000009", "j,x,1"]),
        );
        assert_eq!(scan.malformed, 0);
        assert_eq!(scan.authoritative.len(), 2);
        assert_eq!(
            scan.authoritative["k"],
            Versioned {
                value: "new".to_string(),
                version: 9
            }
        );
        assert_eq!(scan.authoritative["j"].version, 1);
        assert_eq!(scan.names_for(&"k".to_string()).len(), 2);
    }

    #[test]
    fn test_equal_versions_resolve_by_value() {
        let forward = scan(&StringCodec, "/m", names(&["k,a,1", "k,b,1"]));
        let backward = scan(&StringCodec, "/m", names(&["k,b,1", "k,a,1"]));
        assert_eq!(forward.authoritative["k"].value, "b");
        assert_eq!(backward.authoritative["k"].value, "b");
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let scan = scan(
            &StringCodec,
            "/m",
            names(&["garbage", "k,v,12", "a,b,c,d", "x,y,notanumber"]),
        );
        assert_eq!(scan.malformed, 3);
        assert_eq!(scan.authoritative.len(), 1);
        assert_eq!(scan.entries.len(), 1);
    }

    #[test]
    fn test_diff_kinds() {
        let mut old: Mirror<String, String> = HashMap::new();
        old.insert("same".into(), Versioned { value: "v".into(), version: 2 });
        old.insert("bumped".into(), Versioned { value: "v".into(), version: 3 });
        old.insert("changed".into(), Versioned { value: "a".into(), version: 4 });
        old.insert("gone".into(), Versioned { value: "g".into(), version: 5 });

        let mut new = old.clone();
        new.get_mut("bumped").unwrap().version = 30;
        new.insert("changed".into(), Versioned { value: "b".into(), version: 40 });
        new.remove("gone");
        new.insert("fresh".into(), Versioned { value: "f".into(), version: 50 });

        let mut changes: Vec<(String, ChangeKind)> = diff(&old, &new)
            .into_iter()
            .map(|n| (n.key.clone(), n.kind()))
            .collect();
        changes.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(
            changes,
            vec![
                ("changed".to_string(), ChangeKind::Changed),
                ("fresh".to_string(), ChangeKind::Added),
                ("gone".to_string(), ChangeKind::Removed),
            ]
        );
    }
}
