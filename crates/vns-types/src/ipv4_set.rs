//! Replicated set of IPv4 addresses.

use crate::codec::Ipv4Codec;
use std::ops::Deref;
use std::sync::Arc;
use vns_replicated::{EntryMode, ReplicatedConfig, ReplicatedSet};
use vns_store::Directory;

/// Replicated IPv4 membership set, e.g. the addresses behind a port group.
pub struct Ipv4Set<D: Directory> {
    inner: ReplicatedSet<Ipv4Codec, D>,
}

impl<D: Directory> Ipv4Set<D> {
    pub fn new(dir: Arc<D>, path: impl Into<String>, mode: EntryMode) -> Self {
        Self {
            inner: ReplicatedSet::new(dir, path, Ipv4Codec, mode),
        }
    }

    pub fn with_config(dir: Arc<D>, path: impl Into<String>, config: ReplicatedConfig) -> Self {
        Self {
            inner: ReplicatedSet::with_config(dir, path, Ipv4Codec, config),
        }
    }
}

impl<D: Directory> Deref for Ipv4Set<D> {
    type Target = ReplicatedSet<Ipv4Codec, D>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
