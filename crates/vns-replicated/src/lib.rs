//! vns-replicated - Replicated maps and sets over a hierarchical store
//!
//! Engines in this crate keep an eventually consistent key → value view
//! of one store path. Every write is a child node named
//! `key,value,version`; the store-assigned version orders writes, and the
//! highest version per key wins on every replica.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use vns_replicated::{ReplicatedConfig, ReplicatedMap, StringCodec};
//! use vns_store::MemoryStore;
//!
//! # tokio_test::block_on(async {
//! let store = MemoryStore::new();
//! let map = ReplicatedMap::new(
//!     Arc::new(store.connect()),
//!     "/state/example",
//!     StringCodec,
//!     ReplicatedConfig::default(),
//! );
//! map.start().await.unwrap();
//!
//! map.put("host-a".to_string(), "port-1".to_string()).await.unwrap();
//! assert_eq!(map.get(&"host-a".to_string()).as_deref(), Some("port-1"));
//! # });
//! ```
//!
//! # Architecture
//!
//! - [`entry`] - Path-segment encoding of `(key, value, version)`
//! - [`codec`] - Typed key/value codecs
//! - [`map`] - The replicated map engine
//! - [`set`] - The replicated set engine
//! - [`persistent`] - Engine-free access to persistent entries
//! - [`listener`] - Change notifications
//! - [`config`] - Entry lifecycle and retry configuration
//! - [`error`] - Error types

pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod listener;
pub mod map;
pub mod persistent;
pub mod set;

mod retry;
mod scan;

pub use codec::{EntryCodec, SetCodec, SetEntries, StringCodec};
pub use config::{EntryMode, ReplicatedConfig, ReplicatedConfigBuilder, RetryPolicy};
pub use entry::{EntrySegment, PERSISTENT_VERSION, SEPARATOR};
pub use error::{ReplicatedError, Result};
pub use listener::{Callback, ChangeKind, Notification, Subscription};
pub use map::ReplicatedMap;
pub use persistent::{
    add_persistent_entry, delete_persistent_entry, has_persistent_entry, read_entries,
};
pub use scan::{Mirror, Versioned};
pub use set::{ReplicatedSet, SetChange};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::codec::{EntryCodec, SetCodec};
    pub use crate::config::{EntryMode, ReplicatedConfig};
    pub use crate::error::ReplicatedError;
    pub use crate::map::ReplicatedMap;
    pub use crate::set::{ReplicatedSet, SetChange};
}
