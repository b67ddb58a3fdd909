//! In-memory store implementing the [`Directory`] contract.
//!
//! [`MemoryStore`] plays the role of the coordination service: it owns
//! the node tree, the session table and the watch registry. Each
//! [`MemoryDirectory`] is one client session against it. Several
//! directories connected to the same store behave like cooperating
//! processes sharing one ensemble, which is what the replicated engines
//! need for tests and simulation.
//!
//! Fault injection mirrors what a real client library reports:
//! connection loss ([`MemoryDirectory::disconnect`],
//! [`MemoryDirectory::fail_next`]) and session expiry
//! ([`MemoryDirectory::expire_session`]).

use crate::directory::{
    ConnectionEvent, CreateMode, Directory, Op, OpResult, WatchEvent, WatchEventKind, Watcher,
};
use crate::error::{Result, StoreError};
use crate::path::{join_path, split_path, validate_path, ROOT};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Identifier of a client session.
pub type SessionId = u64;

/// Sequences 0 and 1 are never assigned, so a sequential node can not be
/// mistaken for a version-1 persistent entry.
const FIRST_SEQUENCE: u64 = 2;

#[derive(Clone, Debug)]
struct Node {
    data: Vec<u8>,
    version: u32,
    owner: Option<SessionId>,
    children: BTreeSet<String>,
    /// Bumped on every child create and delete; source of sequence suffixes.
    cversion: u64,
}

impl Node {
    fn new(data: Vec<u8>, owner: Option<SessionId>, first_sequence: u64) -> Self {
        Self {
            data,
            version: 0,
            owner,
            children: BTreeSet::new(),
            cversion: first_sequence,
        }
    }
}

struct Registration {
    session: SessionId,
    watcher: Watcher,
}

type Fired = Vec<(String, WatchEventKind)>;
type Deliveries = Vec<(Watcher, WatchEvent)>;

struct Tree {
    nodes: HashMap<String, Node>,
    watches: HashMap<String, HashMap<u64, Registration>>,
    sessions: HashSet<SessionId>,
    next_session: SessionId,
    first_sequence: u64,
}

impl Tree {
    fn new(first_sequence: u64) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT.to_string(), Node::new(Vec::new(), None, first_sequence));
        Self {
            nodes,
            watches: HashMap::new(),
            sessions: HashSet::new(),
            next_session: 1,
            first_sequence,
        }
    }

    /// Consume the one-shot registrations for every fired path.
    fn fire(&mut self, fired: Fired) -> Deliveries {
        let mut deliveries = Vec::new();
        for (path, kind) in fired {
            if let Some(registrations) = self.watches.remove(&path) {
                for registration in registrations.into_values() {
                    deliveries.push((
                        registration.watcher,
                        WatchEvent {
                            path: path.clone(),
                            kind,
                        },
                    ));
                }
            }
        }
        deliveries
    }
}

fn deliver(deliveries: Deliveries) {
    for (watcher, event) in deliveries {
        watcher.notify(event);
    }
}

fn apply_create(
    nodes: &mut HashMap<String, Node>,
    path: &str,
    data: &[u8],
    mode: CreateMode,
    session: SessionId,
    first_sequence: u64,
    fired: &mut Fired,
) -> Result<String> {
    validate_path(path)?;
    let (parent_path, name) =
        split_path(path).ok_or_else(|| StoreError::NodeExists(ROOT.to_string()))?;

    let actual = {
        let parent = nodes
            .get_mut(parent_path)
            .ok_or_else(|| StoreError::NoNode(parent_path.to_string()))?;
        if parent.owner.is_some() {
            return Err(StoreError::NoChildrenForEphemerals(parent_path.to_string()));
        }

        let name = if mode.is_sequential() {
            format!("{}{:010}", name, parent.cversion)
        } else {
            name.to_string()
        };
        if parent.children.contains(&name) {
            return Err(StoreError::NodeExists(join_path(parent_path, &name)));
        }
        parent.children.insert(name.clone());
        parent.cversion += 1;
        join_path(parent_path, &name)
    };

    let owner = if mode.is_ephemeral() {
        Some(session)
    } else {
        None
    };
    nodes.insert(actual.clone(), Node::new(data.to_vec(), owner, first_sequence));
    fired.push((parent_path.to_string(), WatchEventKind::ChildrenChanged));
    Ok(actual)
}

fn check_version(path: &str, node: &Node, expected_version: Option<u32>) -> Result<()> {
    match expected_version {
        Some(expected) if expected != node.version => Err(StoreError::VersionMismatch {
            path: path.to_string(),
            expected,
            actual: node.version,
        }),
        _ => Ok(()),
    }
}

fn apply_delete(
    nodes: &mut HashMap<String, Node>,
    path: &str,
    expected_version: Option<u32>,
    fired: &mut Fired,
) -> Result<()> {
    validate_path(path)?;
    let (parent_path, name) =
        split_path(path).ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;

    let node = nodes
        .get(path)
        .ok_or_else(|| StoreError::NoNode(path.to_string()))?;
    check_version(path, node, expected_version)?;
    if !node.children.is_empty() {
        return Err(StoreError::NotEmpty(path.to_string()));
    }

    nodes.remove(path);
    if let Some(parent) = nodes.get_mut(parent_path) {
        parent.children.remove(name);
        parent.cversion += 1;
    }
    fired.push((path.to_string(), WatchEventKind::NodeDeleted));
    fired.push((parent_path.to_string(), WatchEventKind::ChildrenChanged));
    Ok(())
}

fn apply_check(
    nodes: &HashMap<String, Node>,
    path: &str,
    expected_version: Option<u32>,
) -> Result<()> {
    let node = nodes
        .get(path)
        .ok_or_else(|| StoreError::NoNode(path.to_string()))?;
    check_version(path, node, expected_version)
}

/// Shared in-memory node tree, session table and watch registry.
#[derive(Clone)]
pub struct MemoryStore {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryStore {
    /// Create an empty store containing only the root node.
    pub fn new() -> Self {
        Self::with_sequence_start(FIRST_SEQUENCE)
    }

    /// Create a store whose sequence counters start at `start`.
    ///
    /// Values below 2 are raised to 2.
    pub fn with_sequence_start(start: u64) -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new(start.max(FIRST_SEQUENCE)))),
        }
    }

    /// Open a new client session.
    pub fn connect(&self) -> MemoryDirectory {
        let id = self.open_session();
        let (events, _) = broadcast::channel(64);
        MemoryDirectory {
            store: self.clone(),
            state: Mutex::new(SessionState {
                id,
                link: Link::Connected,
            }),
            injected_failures: AtomicU32::new(0),
            events,
        }
    }

    /// Child names of `path`, or empty if it does not exist.
    pub fn children(&self, path: &str) -> Vec<String> {
        self.tree
            .lock()
            .nodes
            .get(path)
            .map(|node| node.children.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.tree.lock().nodes.contains_key(path)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.tree.lock().sessions.len()
    }

    /// Number of nodes, including the root.
    pub fn node_count(&self) -> usize {
        self.tree.lock().nodes.len()
    }

    /// Create a persistent node outside of any session, as an operator
    /// tool writing straight into the ensemble would.
    pub fn insert_raw(&self, path: &str, data: &[u8]) -> Result<String> {
        let (actual, deliveries) = {
            let mut tree = self.tree.lock();
            let first = tree.first_sequence;
            let mut fired = Vec::new();
            let actual = apply_create(
                &mut tree.nodes,
                path,
                data,
                CreateMode::Persistent,
                0,
                first,
                &mut fired,
            )?;
            (actual, tree.fire(fired))
        };
        deliver(deliveries);
        Ok(actual)
    }

    fn open_session(&self) -> SessionId {
        let mut tree = self.tree.lock();
        let id = tree.next_session;
        tree.next_session += 1;
        tree.sessions.insert(id);
        debug!(session = id, "session opened");
        id
    }

    /// End a session: drop its ephemeral nodes and its watches.
    fn close_session(&self, session: SessionId) {
        let deliveries = {
            let mut tree = self.tree.lock();
            if !tree.sessions.remove(&session) {
                return;
            }

            let mut owned: Vec<String> = tree
                .nodes
                .iter()
                .filter(|(_, node)| node.owner == Some(session))
                .map(|(path, _)| path.clone())
                .collect();
            owned.sort();

            let mut fired = Vec::new();
            for path in &owned {
                let _ = apply_delete(&mut tree.nodes, path, None, &mut fired);
            }

            for registrations in tree.watches.values_mut() {
                registrations.retain(|_, r| r.session != session);
            }
            tree.watches.retain(|_, registrations| !registrations.is_empty());

            info!(session, removed = owned.len(), "session closed");
            tree.fire(fired)
        };
        deliver(deliveries);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Link {
    Connected,
    Disconnected,
    Expired,
}

struct SessionState {
    id: SessionId,
    link: Link,
}

/// One client session against a [`MemoryStore`].
///
/// Dropping the directory closes its session, deleting its ephemeral
/// nodes.
pub struct MemoryDirectory {
    store: MemoryStore,
    state: Mutex<SessionState>,
    injected_failures: AtomicU32,
    events: broadcast::Sender<ConnectionEvent>,
}

impl MemoryDirectory {
    /// Current session identifier. Changes after an expired session is
    /// re-established.
    pub fn session_id(&self) -> SessionId {
        self.state.lock().id
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().link == Link::Connected
    }

    /// Drop the connection while keeping the session alive.
    pub fn disconnect(&self) {
        {
            let mut state = self.state.lock();
            if state.link != Link::Connected {
                return;
            }
            state.link = Link::Disconnected;
        }
        debug!(session = self.session_id(), "connection lost");
        let _ = self.events.send(ConnectionEvent::Disconnected);
    }

    /// Restore the connection. An expired session is replaced by a new one.
    pub fn reconnect(&self) {
        {
            let mut state = self.state.lock();
            match state.link {
                Link::Connected => return,
                Link::Disconnected => {}
                Link::Expired => state.id = self.store.open_session(),
            }
            state.link = Link::Connected;
        }
        debug!(session = self.session_id(), "connection restored");
        let _ = self.events.send(ConnectionEvent::Reconnected);
    }

    /// Expire the session: the store deletes its ephemeral nodes and
    /// watches, and every call fails with `SessionExpired` until
    /// [`reconnect`](Self::reconnect).
    pub fn expire_session(&self) {
        let id = {
            let mut state = self.state.lock();
            if state.link == Link::Expired {
                return;
            }
            state.link = Link::Expired;
            state.id
        };
        self.store.close_session(id);
        let _ = self.events.send(ConnectionEvent::SessionExpired);
    }

    /// Make the next `count` calls fail with `ConnectionLoss` without
    /// changing the connection state.
    pub fn fail_next(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    fn session(&self) -> Result<SessionId> {
        if self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::ConnectionLoss);
        }
        let state = self.state.lock();
        match state.link {
            Link::Connected => Ok(state.id),
            Link::Disconnected => Err(StoreError::ConnectionLoss),
            Link::Expired => Err(StoreError::SessionExpired),
        }
    }
}

impl Drop for MemoryDirectory {
    fn drop(&mut self) {
        let state = self.state.lock();
        if state.link != Link::Expired {
            self.store.close_session(state.id);
        }
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String> {
        let session = self.session()?;
        let (actual, deliveries) = {
            let mut tree = self.store.tree.lock();
            let first = tree.first_sequence;
            let mut fired = Vec::new();
            let actual = apply_create(&mut tree.nodes, path, data, mode, session, first, &mut fired)?;
            (actual, tree.fire(fired))
        };
        deliver(deliveries);
        debug!(path = %actual, ?mode, session, "created node");
        Ok(actual)
    }

    async fn multi(&self, ops: Vec<Op>) -> Result<Vec<OpResult>> {
        let session = self.session()?;
        let (results, deliveries) = {
            let mut tree = self.store.tree.lock();
            let first = tree.first_sequence;
            let mut scratch = tree.nodes.clone();
            let mut fired = Vec::new();
            let mut results = Vec::with_capacity(ops.len());

            for op in &ops {
                let result = match op {
                    Op::Create { path, data, mode } => {
                        apply_create(&mut scratch, path, data, *mode, session, first, &mut fired)
                            .map(OpResult::Created)?
                    }
                    Op::Delete {
                        path,
                        expected_version,
                    } => apply_delete(&mut scratch, path, *expected_version, &mut fired)
                        .map(|_| OpResult::Deleted)?,
                    Op::Check {
                        path,
                        expected_version,
                    } => apply_check(&scratch, path, *expected_version).map(|_| OpResult::Checked)?,
                };
                results.push(result);
            }

            tree.nodes = scratch;
            (results, tree.fire(fired))
        };
        deliver(deliveries);
        debug!(ops = ops.len(), session, "applied multi");
        Ok(results)
    }

    async fn get_children(
        &self,
        path: &str,
        watcher: Option<&Watcher>,
    ) -> Result<BTreeSet<String>> {
        let session = self.session()?;
        let mut tree = self.store.tree.lock();
        let children = tree
            .nodes
            .get(path)
            .map(|node| node.children.clone())
            .ok_or_else(|| StoreError::NoNode(path.to_string()))?;

        if let Some(watcher) = watcher {
            tree.watches.entry(path.to_string()).or_default().insert(
                watcher.id(),
                Registration {
                    session,
                    watcher: watcher.clone(),
                },
            );
        }
        Ok(children)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.session()?;
        Ok(self.store.tree.lock().nodes.contains_key(path))
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.session()?;
        self.store
            .tree
            .lock()
            .nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| StoreError::NoNode(path.to_string()))
    }

    async fn delete(&self, path: &str, expected_version: Option<u32>) -> Result<()> {
        let session = self.session()?;
        let deliveries = {
            let mut tree = self.store.tree.lock();
            let mut fired = Vec::new();
            apply_delete(&mut tree.nodes, path, expected_version, &mut fired)?;
            tree.fire(fired)
        };
        deliver(deliveries);
        debug!(path, session, "deleted node");
        Ok(())
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}
