//! Replicated map engine.
//!
//! A [`ReplicatedMap`] binds an [`EntryCodec`] to one store path. Writes
//! become child nodes named `key,value,version`; every replica watches the
//! path, re-scans on each firing and publishes the highest version per key
//! into a lock-free mirror that serves all reads.

use crate::codec::EntryCodec;
use crate::config::{EntryMode, ReplicatedConfig};
use crate::entry::{self, PERSISTENT_VERSION};
use crate::error::{ReplicatedError, Result};
use crate::listener::{Listeners, Notification, Subscription};
use crate::persistent::write_persistent;
use crate::retry::{delete_idempotent, with_retry};
use crate::scan::{self, Mirror, Versioned};
use arc_swap::ArcSwap;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};
use vns_store::{
    ensure_path, join_path, node_name, ConnectionEvent, Directory, WatchEvent, Watcher,
};

/// Ephemeral nodes this engine created and has not yet seen deleted,
/// by key and version.
type Owned<K> = HashMap<K, BTreeMap<u64, String>>;

struct Shared<C: EntryCodec, D> {
    dir: Arc<D>,
    path: String,
    codec: C,
    config: ReplicatedConfig,
    mirror: ArcSwap<Mirror<C::Key, C::Value>>,
    /// Serializes writes and reconciliation cycles of this engine.
    owned: Mutex<Owned<C::Key>>,
    listeners: Listeners<C::Key, C::Value>,
    stale: AtomicBool,
    watcher: parking_lot::Mutex<Option<Watcher>>,
}

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Eventually consistent map replicated through a [`Directory`].
///
/// Reads are served from the local mirror and never touch the store.
/// Writes go to the store first and are published locally once
/// confirmed.
pub struct ReplicatedMap<C: EntryCodec, D: Directory> {
    shared: Arc<Shared<C, D>>,
    running: Mutex<Option<Running>>,
}

impl<C: EntryCodec, D: Directory> ReplicatedMap<C, D> {
    /// Bind an engine to `path`. Nothing touches the store until
    /// [`start`](Self::start).
    pub fn new(dir: Arc<D>, path: impl Into<String>, codec: C, config: ReplicatedConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                dir,
                path: path.into(),
                codec,
                config,
                mirror: ArcSwap::from_pointee(HashMap::new()),
                owned: Mutex::new(HashMap::new()),
                listeners: Listeners::new(),
                stale: AtomicBool::new(true),
                watcher: parking_lot::Mutex::new(None),
            }),
            running: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &str {
        &self.shared.path
    }

    pub fn config(&self) -> &ReplicatedConfig {
        &self.shared.config
    }

    pub fn codec(&self) -> &C {
        &self.shared.codec
    }

    pub fn directory(&self) -> &Arc<D> {
        &self.shared.dir
    }

    /// Arm the watch, load the mirror and start background delivery.
    ///
    /// Calling `start` on a running engine does nothing.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let shared = &self.shared;
        if shared.config.create_path {
            let dir = &*shared.dir;
            let path = shared.path.as_str();
            with_retry(&shared.config.scan_retry, "create path", move || {
                ensure_path(dir, path)
            })
            .await?;
        }

        // Subscribe before the first scan so no transition is missed.
        let connection = shared.dir.connection_events();
        let (watcher, fired) = Watcher::channel();
        *shared.watcher.lock() = Some(watcher);
        shared.listeners.spawn_dispatcher();

        if let Err(err) = shared.resync().await {
            *shared.watcher.lock() = None;
            return Err(err);
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(watch_loop(shared.clone(), fired, connection, shutdown_rx));
        *running = Some(Running { shutdown, task });

        info!(path = %shared.path, entries = self.len(), "replicated map started");
        Ok(())
    }

    /// Stop watching. The mirror keeps its last state; pending watch
    /// firings are dropped.
    pub async fn stop(&self) {
        let Some(Running { shutdown, task }) = self.running.lock().await.take() else {
            return;
        };
        *self.shared.watcher.lock() = None;
        let _ = shutdown.send(());
        if let Err(err) = task.await {
            warn!(path = %self.shared.path, error = %err, "watch task ended abnormally");
        }
        info!(path = %self.shared.path, "replicated map stopped");
    }

    /// Write `key → value` with a fresh version.
    ///
    /// The entry is published locally once the store confirms it. Older
    /// versions this engine wrote for the key are deleted afterwards, so
    /// the key is never absent in between.
    pub async fn put(&self, key: C::Key, value: C::Value) -> Result<()> {
        self.write(key, value, false).await.map(|_| ())
    }

    /// Like [`put`](Self::put), but skips the write when this engine
    /// already owns the authoritative entry for `key` with this value.
    /// Returns whether a write happened.
    pub(crate) async fn put_unless_owned(&self, key: C::Key, value: C::Value) -> Result<bool> {
        self.write(key, value, true).await
    }

    async fn write(&self, key: C::Key, value: C::Value, skip_if_owned: bool) -> Result<bool> {
        let shared = &self.shared;
        let key_str = shared.codec.encode_key(&key);
        let value_str = shared.codec.encode_value(&value);
        let prefix = entry::encode_prefix(&key_str, &value_str)?;

        let mut owned = shared.owned.lock().await;
        if skip_if_owned && shared.owns_authoritative(&owned, &key, &value) {
            return Ok(false);
        }

        match shared.config.entry_mode {
            EntryMode::Ephemeral => {
                let target = join_path(&shared.path, &prefix);
                let dir = &*shared.dir;
                let target = target.as_str();
                let mode = shared.config.entry_mode.create_mode();
                let created = with_retry(&shared.config.write_retry, "put", move || {
                    dir.create(target, &[], mode)
                })
                .await
                .map_err(|e| shared.observe(e))?;
                let version = entry::decode(node_name(&created))?.version;
                debug!(path = %shared.path, key = %key_str, version, "wrote entry");

                let versions = owned.entry(key.clone()).or_default();
                let superseded: Vec<(u64, String)> = versions
                    .range(..version)
                    .map(|(v, p)| (*v, p.clone()))
                    .collect();
                versions.insert(version, created);

                shared.apply_local(&key, Some(Versioned { value, version }));
                shared.collect(&mut owned, &key, superseded).await;
            }
            EntryMode::Persistent => {
                write_persistent(
                    &*shared.dir,
                    &shared.config.write_retry,
                    &shared.path,
                    &key_str,
                    &value_str,
                )
                .await
                .map_err(|e| shared.observe(e))?;
                debug!(path = %shared.path, key = %key_str, "wrote persistent entry");
                shared.apply_local(
                    &key,
                    Some(Versioned {
                        value,
                        version: PERSISTENT_VERSION,
                    }),
                );
            }
        }
        Ok(true)
    }

    /// Delete every entry for `key`, at any version, and return the value
    /// it held locally.
    ///
    /// The key is absent from this engine's mirror when the call returns.
    pub async fn remove(&self, key: &C::Key) -> Result<Option<C::Value>> {
        let shared = &self.shared;
        let key_str = shared.codec.encode_key(key);
        entry::encode_prefix(&key_str, "")?;

        let mut owned = shared.owned.lock().await;
        let dir = &*shared.dir;
        let path = shared.path.as_str();
        let children = with_retry(&shared.config.write_retry, "remove", move || {
            dir.get_children(path, None)
        })
        .await
        .map_err(|e| shared.observe(e))?;

        let scan = scan::scan(&shared.codec, path, children);
        for name in scan.names_for(key) {
            delete_idempotent(dir, &shared.config.write_retry, &join_path(path, &name))
                .await
                .map_err(|e| shared.observe(e))?;
        }
        owned.remove(key);
        debug!(path, key = %key_str, "removed entry");

        Ok(shared.apply_local(key, None))
    }

    /// Current value for `key`.
    pub fn get(&self, key: &C::Key) -> Option<C::Value> {
        self.shared.mirror.load().get(key).map(|v| v.value.clone())
    }

    /// Version of the authoritative entry for `key`.
    pub fn get_version(&self, key: &C::Key) -> Option<u64> {
        self.shared.mirror.load().get(key).map(|v| v.version)
    }

    pub fn contains_key(&self, key: &C::Key) -> bool {
        self.shared.mirror.load().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.shared.mirror.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.mirror.load().is_empty()
    }

    /// Copy of the whole mirror.
    pub fn snapshot(&self) -> HashMap<C::Key, C::Value> {
        self.shared
            .mirror
            .load()
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    /// The mirror with versions, as last published.
    pub fn versioned_snapshot(&self) -> Arc<Mirror<C::Key, C::Value>> {
        self.shared.mirror.load_full()
    }

    /// Keys currently mapped to `value`.
    pub fn keys_for_value(&self, value: &C::Value) -> Vec<C::Key> {
        self.shared
            .mirror
            .load()
            .iter()
            .filter(|(_, v)| &v.value == value)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Register `callback` for every add, change and removal, including
    /// those made through this engine.
    pub fn add_listener<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&C::Key, Option<&C::Value>, Option<&C::Value>) + Send + Sync + 'static,
    {
        self.shared.listeners.add(Arc::new(callback))
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }

    /// Whether the mirror may lag the store: before the first scan, while
    /// disconnected or expired, and after a failed scan.
    pub fn is_stale(&self) -> bool {
        self.shared.stale.load(Ordering::SeqCst)
    }

    /// Whether this engine owns the authoritative entry for `key`.
    pub async fn owns(&self, key: &C::Key) -> bool {
        let owned = self.shared.owned.lock().await;
        let version = self.get_version(key);
        version.map_or(false, |v| {
            owned.get(key).map_or(false, |versions| versions.contains_key(&v))
        })
    }
}

impl<C: EntryCodec, D: Directory> Drop for ReplicatedMap<C, D> {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.task.abort();
        }
    }
}

impl<C: EntryCodec, D: Directory> Shared<C, D> {
    /// Full reconciliation: list, decode, resolve, diff, publish, then
    /// clean up superseded nodes this engine owns.
    async fn resync(&self) -> Result<()> {
        let mut owned = self.owned.lock().await;

        let watcher = self.watcher.lock().clone();
        let watcher = watcher.as_ref();
        let dir = &*self.dir;
        let path = self.path.as_str();
        let children = match with_retry(&self.config.scan_retry, "scan", move || {
            dir.get_children(path, watcher)
        })
        .await
        {
            Ok(children) => children,
            Err(err) => {
                self.stale.store(true, Ordering::SeqCst);
                return Err(err);
            }
        };

        let scan = scan::scan(&self.codec, path, children);
        let present: HashSet<&str> =
            scan.entries.iter().map(|e| e.name.as_str()).collect();

        // Forget nodes that are gone; gather the ones now superseded.
        let mut garbage: Vec<(C::Key, Vec<(u64, String)>)> = Vec::new();
        for (key, versions) in owned.iter_mut() {
            versions.retain(|_, full| present.contains(node_name(full)));
            let authoritative = scan.authoritative.get(key).map(|v| v.version);
            if let Some(authoritative) = authoritative {
                let stale: Vec<(u64, String)> = versions
                    .range(..authoritative)
                    .map(|(v, p)| (*v, p.clone()))
                    .collect();
                if !stale.is_empty() {
                    garbage.push((key.clone(), stale));
                }
            }
        }
        owned.retain(|_, versions| !versions.is_empty());

        let previous = self.mirror.load_full();
        let changes = scan::diff(&previous, &scan.authoritative);
        let entries = scan.authoritative.len();
        let malformed = scan.malformed;
        self.mirror.store(Arc::new(scan.authoritative));
        for change in &changes {
            trace!(path, key = ?change.key, kind = ?change.kind(), "mirror changed");
        }
        let change_count = changes.len();
        for change in changes {
            self.listeners.notify(change);
        }

        for (key, stale) in garbage {
            self.collect(&mut owned, &key, stale).await;
        }

        self.stale.store(false, Ordering::SeqCst);
        debug!(path, entries, changes = change_count, malformed, "resynced");
        Ok(())
    }

    /// Delete owned nodes for `key`. Failures leave them tracked for the
    /// next cycle.
    async fn collect(&self, owned: &mut Owned<C::Key>, key: &C::Key, nodes: Vec<(u64, String)>) {
        let outcomes = join_all(
            nodes
                .iter()
                .map(|(_, full)| delete_idempotent(&*self.dir, &self.config.scan_retry, full)),
        )
        .await;

        for ((version, full), outcome) in nodes.iter().zip(outcomes) {
            match outcome {
                Ok(()) => {
                    if let Some(versions) = owned.get_mut(key) {
                        versions.remove(version);
                    }
                    trace!(path = %full, version, "collected superseded entry");
                }
                Err(err) => {
                    warn!(path = %full, error = %err, "failed to delete superseded entry");
                }
            }
        }
        if owned.get(key).map_or(false, |versions| versions.is_empty()) {
            owned.remove(key);
        }
    }

    /// Publish one local change and queue its notification. Returns the
    /// previous value.
    ///
    /// A write older than the published entry is not applied.
    fn apply_local(
        &self,
        key: &C::Key,
        next: Option<Versioned<C::Value>>,
    ) -> Option<C::Value> {
        let current = self.mirror.load_full();
        let previous = current.get(key).cloned();
        if let (Some(prev), Some(next)) = (&previous, &next) {
            if next.version < prev.version {
                return Some(prev.value.clone());
            }
        }

        let mut updated = (*current).clone();
        match &next {
            Some(versioned) => {
                updated.insert(key.clone(), versioned.clone());
            }
            None => {
                updated.remove(key);
            }
        }
        self.mirror.store(Arc::new(updated));

        let old = previous.map(|p| p.value);
        let new = next.map(|n| n.value);
        if old != new {
            self.listeners.notify(Notification {
                key: key.clone(),
                old: old.clone(),
                new,
            });
        }
        old
    }

    fn owns_authoritative(&self, owned: &Owned<C::Key>, key: &C::Key, value: &C::Value) -> bool {
        let mirror = self.mirror.load();
        let Some(current) = mirror.get(key) else {
            return false;
        };
        if &current.value != value {
            return false;
        }
        match self.config.entry_mode {
            EntryMode::Ephemeral => owned
                .get(key)
                .map_or(false, |versions| versions.contains_key(&current.version)),
            EntryMode::Persistent => current.version == PERSISTENT_VERSION,
        }
    }

    /// Record what a failed store call says about the mirror.
    fn observe(&self, err: ReplicatedError) -> ReplicatedError {
        if err.marks_stale() {
            self.stale.store(true, Ordering::SeqCst);
        }
        err
    }

    async fn on_session_expired(&self) {
        let mut owned = self.owned.lock().await;
        let lost: usize = owned.values().map(|versions| versions.len()).sum();
        owned.clear();
        self.stale.store(true, Ordering::SeqCst);
        warn!(path = %self.path, lost, "session expired, owned entries discarded");
    }

    async fn resync_logged(&self, trigger: &'static str) {
        if let Err(err) = self.resync().await {
            warn!(path = %self.path, trigger, error = %err, "resync failed");
        }
    }
}

async fn watch_loop<C: EntryCodec, D: Directory>(
    shared: Arc<Shared<C, D>>,
    mut fired: mpsc::UnboundedReceiver<WatchEvent>,
    mut connection: broadcast::Receiver<ConnectionEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut connected = true;
    let mut ticker = tokio::time::interval(shared.config.stale_resync_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = fired.recv() => {
                let Some(event) = event else { break };
                // One scan covers every firing queued so far.
                while fired.try_recv().is_ok() {}
                if connected {
                    trace!(path = %event.path, kind = ?event.kind, "watch fired");
                    shared.resync_logged("watch").await;
                }
            }
            event = connection.recv() => match event {
                Ok(ConnectionEvent::Disconnected) => {
                    connected = false;
                    shared.stale.store(true, Ordering::SeqCst);
                    debug!(path = %shared.path, "disconnected, reconciliation paused");
                }
                Ok(ConnectionEvent::SessionExpired) => {
                    connected = false;
                    shared.on_session_expired().await;
                }
                Ok(ConnectionEvent::Reconnected) => {
                    connected = true;
                    debug!(path = %shared.path, "reconnected, resyncing");
                    shared.resync_logged("reconnect").await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(path = %shared.path, missed, "missed connection events");
                    connected = true;
                    shared.stale.store(true, Ordering::SeqCst);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = ticker.tick() => {
                if connected && shared.stale.load(Ordering::SeqCst) {
                    shared.resync_logged("stale").await;
                }
            }
        }
    }
    debug!(path = %shared.path, "watch loop exited");
}
