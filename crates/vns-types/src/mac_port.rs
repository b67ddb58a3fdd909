//! MAC learning table: which port a MAC address was last seen on.

use crate::codec::MacPortCodec;
use crate::mac::MacAddr;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use uuid::Uuid;
use vns_replicated::{persistent, ReplicatedConfig, ReplicatedMap, Result};
use vns_store::Directory;

/// Replicated `MacAddr → port id` map.
///
/// Learned entries are ephemeral by default and disappear with the
/// learning agent's session. Statically configured entries go through the
/// persistent-entry functions.
pub struct MacPortMap<D: Directory> {
    inner: ReplicatedMap<MacPortCodec, D>,
}

impl<D: Directory> MacPortMap<D> {
    pub fn new(dir: Arc<D>, path: impl Into<String>) -> Self {
        Self::with_config(dir, path, ReplicatedConfig::default())
    }

    pub fn with_config(dir: Arc<D>, path: impl Into<String>, config: ReplicatedConfig) -> Self {
        Self {
            inner: ReplicatedMap::new(dir, path, MacPortCodec, config),
        }
    }

    /// MAC addresses currently learned on `port`.
    pub fn macs_on_port(&self, port: &Uuid) -> Vec<MacAddr> {
        self.inner.keys_for_value(port)
    }

    pub async fn has_persistent_entry(
        dir: &D,
        path: &str,
        mac: &MacAddr,
        port: &Uuid,
    ) -> Result<bool> {
        persistent::has_persistent_entry(dir, path, &MacPortCodec, mac, port).await
    }

    pub async fn add_persistent_entry(
        dir: &D,
        path: &str,
        mac: &MacAddr,
        port: &Uuid,
    ) -> Result<()> {
        persistent::add_persistent_entry(dir, path, &MacPortCodec, mac, port).await
    }

    pub async fn delete_persistent_entry(
        dir: &D,
        path: &str,
        mac: &MacAddr,
        port: &Uuid,
    ) -> Result<()> {
        persistent::delete_persistent_entry(dir, path, &MacPortCodec, mac, port).await
    }

    /// Read the table under `path` without starting an engine.
    pub async fn get_as_map(dir: &D, path: &str) -> Result<HashMap<MacAddr, Uuid>> {
        persistent::read_entries(dir, path, &MacPortCodec).await
    }
}

impl<D: Directory> Deref for MacPortMap<D> {
    type Target = ReplicatedMap<MacPortCodec, D>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
