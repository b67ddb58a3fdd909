//! vns-types - Typed replicated tables for virtual network state
//!
//! Domain value types with canonical text forms, their codecs, and the
//! tables built from them:
//!
//! - [`MacPortMap`] - MAC learning table, `MacAddr → port Uuid`
//! - [`Ipv4Set`] - IPv4 membership set
//! - [`DhcpLeaseMap`] - DHCP leases, `MacAddr → Ipv4Addr`
//!
//! ```rust
//! use std::sync::Arc;
//! use uuid::Uuid;
//! use vns_store::MemoryStore;
//! use vns_types::{MacAddr, MacPortMap};
//!
//! # tokio_test::block_on(async {
//! let store = MemoryStore::new();
//! let macs = MacPortMap::new(Arc::new(store.connect()), "/bridges/br0/macs");
//! macs.start().await.unwrap();
//!
//! let mac: MacAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
//! let port = Uuid::new_v4();
//! macs.put(mac, port).await.unwrap();
//! assert_eq!(macs.get(&mac), Some(port));
//! # });
//! ```

pub mod codec;
pub mod error;
pub mod mac;

mod dhcp;
mod ipv4_set;
mod mac_port;

pub use codec::{DhcpLeaseCodec, Ipv4Codec, MacPortCodec};
pub use dhcp::DhcpLeaseMap;
pub use error::ParseMacError;
pub use ipv4_set::Ipv4Set;
pub use mac::MacAddr;
pub use mac_port::MacPortMap;
