//! Direct access to persistent entries, without a running engine.
//!
//! Administrative tooling uses these with nothing but a store handle and
//! a codec. A persistent entry is always the node `key,value,1`, so it
//! can be checked, written and removed from `(key, value)` alone.

use crate::codec::EntryCodec;
use crate::config::RetryPolicy;
use crate::entry::{self, PERSISTENT_VERSION};
use crate::error::{ReplicatedError, Result};
use crate::retry::{delete_idempotent, with_retry};
use crate::scan;
use std::collections::HashMap;
use tracing::debug;
use vns_store::{join_path, CreateMode, Directory, Op, StoreError};

/// Concurrent writers racing on the same key re-read and try again this
/// many times before reporting a conflict.
const MAX_CONFLICT_ATTEMPTS: u32 = 5;

/// Whether the persistent entry `key,value,1` exists under `path`.
pub async fn has_persistent_entry<C, D>(
    dir: &D,
    path: &str,
    codec: &C,
    key: &C::Key,
    value: &C::Value,
) -> Result<bool>
where
    C: EntryCodec,
    D: Directory + ?Sized,
{
    let segment = entry::encode(
        &codec.encode_key(key),
        &codec.encode_value(value),
        PERSISTENT_VERSION,
    )?;
    let target = join_path(path, &segment);
    let target = target.as_str();
    with_retry(&RetryPolicy::writes(), "has persistent entry", move || {
        dir.exists(target)
    })
    .await
}

/// Write the persistent entry `key,value,1`.
///
/// Any other version-1 entry for the same key is deleted in the same
/// atomic batch, so a key never holds two persistent values.
pub async fn add_persistent_entry<C, D>(
    dir: &D,
    path: &str,
    codec: &C,
    key: &C::Key,
    value: &C::Value,
) -> Result<()>
where
    C: EntryCodec,
    D: Directory + ?Sized,
{
    write_persistent(
        dir,
        &RetryPolicy::writes(),
        path,
        &codec.encode_key(key),
        &codec.encode_value(value),
    )
    .await
}

/// Delete the persistent entry `key,value,1`. A missing entry is not an
/// error.
pub async fn delete_persistent_entry<C, D>(
    dir: &D,
    path: &str,
    codec: &C,
    key: &C::Key,
    value: &C::Value,
) -> Result<()>
where
    C: EntryCodec,
    D: Directory + ?Sized,
{
    let segment = entry::encode(
        &codec.encode_key(key),
        &codec.encode_value(value),
        PERSISTENT_VERSION,
    )?;
    delete_idempotent(dir, &RetryPolicy::writes(), &join_path(path, &segment)).await
}

/// One-shot read of the authoritative map stored under `path`.
///
/// Malformed entries are skipped.
pub async fn read_entries<C, D>(
    dir: &D,
    path: &str,
    codec: &C,
) -> Result<HashMap<C::Key, C::Value>>
where
    C: EntryCodec,
    D: Directory + ?Sized,
{
    let children = with_retry(&RetryPolicy::scans(), "read entries", move || {
        dir.get_children(path, None)
    })
    .await?;

    Ok(scan::scan(codec, path, children)
        .authoritative
        .into_iter()
        .map(|(key, versioned)| (key, versioned.value))
        .collect())
}

/// Shared by the free functions and by persistent-mode engines.
pub(crate) async fn write_persistent<D>(
    dir: &D,
    policy: &RetryPolicy,
    path: &str,
    key: &str,
    value: &str,
) -> Result<()>
where
    D: Directory + ?Sized,
{
    let segment = entry::encode(key, value, PERSISTENT_VERSION)?;

    for attempt in 1..=MAX_CONFLICT_ATTEMPTS {
        let children = with_retry(policy, "add persistent entry", move || {
            dir.get_children(path, None)
        })
        .await?;

        let mut ops: Vec<Op> = children
            .iter()
            .filter(|name| **name != segment)
            .filter(|name| {
                entry::decode(name)
                    .map(|existing| existing.key == key && existing.is_persistent())
                    .unwrap_or(false)
            })
            .map(|name| Op::delete(join_path(path, name), None))
            .collect();
        if !children.contains(&segment) {
            ops.push(Op::create(
                join_path(path, &segment),
                Vec::new(),
                CreateMode::Persistent,
            ));
        }
        if ops.is_empty() {
            return Ok(());
        }

        let batch = ops.clone();
        match with_retry(policy, "add persistent entry", move || {
            dir.multi(batch.clone())
        })
        .await
        {
            Ok(_) => {
                debug!(path, entry = %segment, replaced = ops.len() - 1, "wrote persistent entry");
                return Ok(());
            }
            Err(ReplicatedError::Store(StoreError::NodeExists(_)))
            | Err(ReplicatedError::Store(StoreError::NoNode(_))) => {
                // Another writer touched the key between list and multi.
                debug!(path, entry = %segment, attempt, "persistent write raced, re-reading");
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Err(ReplicatedError::StoreVersionConflict(join_path(path, &segment)))
}
