//! # vns-store
//!
//! Hierarchical versioned store contract for vnstate.
//!
//! This crate provides:
//! - The [`Directory`] trait: path-addressed nodes, ephemeral and
//!   persistent creation modes, atomic multi-operation batches, children
//!   listing with one-shot watches, and connection/session events
//! - [`StoreError`], distinguishing transient connection loss from
//!   terminal failures such as session expiry
//! - [`MemoryStore`] / [`MemoryDirectory`], an in-memory implementation
//!   with fault injection for tests and simulation
//!
//! ## Example
//!
//! ```rust
//! use vns_store::{CreateMode, Directory, MemoryStore, Watcher, ensure_path};
//!
//! # tokio_test::block_on(async {
//! let store = MemoryStore::new();
//! let dir = store.connect();
//! ensure_path(&dir, "/state/macs").await.unwrap();
//!
//! let (watcher, mut fired) = Watcher::channel();
//! dir.get_children("/state/macs", Some(&watcher)).await.unwrap();
//!
//! let created = dir
//!     .create("/state/macs/a,b,", &[], CreateMode::EphemeralSequential)
//!     .await
//!     .unwrap();
//! assert!(created.starts_with("/state/macs/a,b,"));
//! assert!(fired.recv().await.is_some());
//! # });
//! ```

mod directory;
mod error;
mod memory;
mod path;

pub use directory::{
    ensure_path, ConnectionEvent, CreateMode, Directory, Op, OpResult, WatchEvent,
    WatchEventKind, Watcher,
};
pub use error::{Result, StoreError};
pub use memory::{MemoryDirectory, MemoryStore, SessionId};
pub use path::{join_path, node_name, split_path, validate_path, ROOT};
