//! The coordination store contract consumed by the replicated engines.

use crate::error::{Result, StoreError};
use crate::path::{join_path, validate_path, ROOT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc};

/// How a node is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreateMode {
    /// Survives the session that created it.
    Persistent,
    /// Persistent, with a store-assigned sequence appended to the name.
    PersistentSequential,
    /// Deleted when the creating session ends.
    Ephemeral,
    /// Ephemeral, with a store-assigned sequence appended to the name.
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// One operation inside an atomic [`Directory::multi`] batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Create {
        path: String,
        data: Vec<u8>,
        mode: CreateMode,
    },
    Delete {
        path: String,
        expected_version: Option<u32>,
    },
    /// Fails the batch unless the node exists (at the given version).
    Check {
        path: String,
        expected_version: Option<u32>,
    },
}

impl Op {
    pub fn create(path: impl Into<String>, data: Vec<u8>, mode: CreateMode) -> Self {
        Op::Create {
            path: path.into(),
            data,
            mode,
        }
    }

    pub fn delete(path: impl Into<String>, expected_version: Option<u32>) -> Self {
        Op::Delete {
            path: path.into(),
            expected_version,
        }
    }

    pub fn check(path: impl Into<String>, expected_version: Option<u32>) -> Self {
        Op::Check {
            path: path.into(),
            expected_version,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Op::Create { path, .. } | Op::Delete { path, .. } | Op::Check { path, .. } => path,
        }
    }
}

/// Result of one operation in a successful batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpResult {
    /// The actual path created (including any sequence suffix).
    Created(String),
    Deleted,
    Checked,
}

/// What caused a watch to fire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchEventKind {
    /// A child was added to or removed from the watched node.
    ChildrenChanged,
    /// The watched node itself was deleted.
    NodeDeleted,
}

/// Delivered once per watch registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: String,
    pub kind: WatchEventKind,
}

static NEXT_WATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// A handle through which a store delivers watch firings.
///
/// Registering the same watcher twice on one path before it fires is a
/// single registration; it fires once.
#[derive(Clone, Debug)]
pub struct Watcher {
    id: u64,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

impl Watcher {
    /// Create a watcher and the receiver its firings arrive on.
    pub fn channel() -> (Watcher, mpsc::UnboundedReceiver<WatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = NEXT_WATCHER_ID.fetch_add(1, Ordering::Relaxed);
        (Watcher { id, tx }, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Deliver an event. Returns `false` if the receiver is gone.
    pub fn notify(&self, event: WatchEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Session-level state changes seen by a client handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// The connection dropped; the session may still be alive.
    Disconnected,
    /// The connection is usable again. Watches may have been missed.
    Reconnected,
    /// The session is gone along with all of its ephemeral nodes.
    SessionExpired,
}

/// Hierarchical, versioned, watchable store.
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    /// Create a node. Returns the actual path, which differs from `path`
    /// for sequential modes.
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String>;

    /// Apply all operations atomically, or none of them.
    async fn multi(&self, ops: Vec<Op>) -> Result<Vec<OpResult>>;

    /// List child names, optionally arming a one-shot children watch.
    async fn get_children(&self, path: &str, watcher: Option<&Watcher>)
        -> Result<BTreeSet<String>>;

    async fn exists(&self, path: &str) -> Result<bool>;

    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete a node. `None` matches any version.
    async fn delete(&self, path: &str, expected_version: Option<u32>) -> Result<()>;

    /// Subscribe to connection and session state changes.
    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;
}

/// Create `path` and any missing ancestors as empty persistent nodes.
pub async fn ensure_path<D: Directory + ?Sized>(dir: &D, path: &str) -> Result<()> {
    validate_path(path)?;
    let mut current = ROOT.to_string();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current = join_path(&current, segment);
        match dir.create(&current, &[], CreateMode::Persistent).await {
            Ok(_) | Err(StoreError::NodeExists(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
