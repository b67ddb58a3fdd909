//! DHCP lease table.

use crate::codec::DhcpLeaseCodec;
use crate::mac::MacAddr;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::ops::Deref;
use std::sync::Arc;
use vns_replicated::{persistent, ReplicatedConfig, ReplicatedMap, Result};
use vns_store::Directory;

/// Replicated `MacAddr → Ipv4Addr` lease map.
pub struct DhcpLeaseMap<D: Directory> {
    inner: ReplicatedMap<DhcpLeaseCodec, D>,
}

impl<D: Directory> DhcpLeaseMap<D> {
    pub fn new(dir: Arc<D>, path: impl Into<String>) -> Self {
        Self::with_config(dir, path, ReplicatedConfig::default())
    }

    pub fn with_config(dir: Arc<D>, path: impl Into<String>, config: ReplicatedConfig) -> Self {
        Self {
            inner: ReplicatedMap::new(dir, path, DhcpLeaseCodec, config),
        }
    }

    /// Clients currently holding `address`. More than one means a
    /// conflicting lease.
    pub fn holders_of(&self, address: &Ipv4Addr) -> Vec<MacAddr> {
        self.inner.keys_for_value(address)
    }

    pub async fn get_as_map(dir: &D, path: &str) -> Result<HashMap<MacAddr, Ipv4Addr>> {
        persistent::read_entries(dir, path, &DhcpLeaseCodec).await
    }
}

impl<D: Directory> Deref for DhcpLeaseMap<D> {
    type Target = ReplicatedMap<DhcpLeaseCodec, D>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
