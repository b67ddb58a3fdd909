//! Listener subscriptions and the per-engine dispatch queue.
//!
//! Reconciliation only enqueues notifications; a dedicated OS thread drains
//! the queue and runs callbacks in order. Callbacks never run on a runtime
//! worker, so a blocking callback delays later notifications of the same
//! engine but never the next watch cycle.

use crate::error::ReplicatedError;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::warn;

/// Callback invoked with `(key, old, new)`.
///
/// `old == None` is an addition, `new == None` a removal. Callbacks may
/// see the same change more than once.
pub type Callback<K, V> = Arc<dyn Fn(&K, Option<&V>, Option<&V>) + Send + Sync>;

/// Kind of change carried by a [`Notification`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// One observed change to the mirror.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification<K, V> {
    pub key: K,
    pub old: Option<V>,
    pub new: Option<V>,
}

impl<K, V> Notification<K, V> {
    pub fn kind(&self) -> ChangeKind {
        match (&self.old, &self.new) {
            (None, _) => ChangeKind::Added,
            (Some(_), Some(_)) => ChangeKind::Changed,
            (Some(_), None) => ChangeKind::Removed,
        }
    }
}

type Registry<K, V> = Arc<RwLock<Vec<(u64, Callback<K, V>)>>>;

/// Handle returned by `add_listener`.
///
/// Dropping the handle keeps the listener registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stop receiving notifications.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

pub(crate) struct Listeners<K, V> {
    registry: Registry<K, V>,
    next_id: AtomicU64,
    tx: mpsc::UnboundedSender<Notification<K, V>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Notification<K, V>>>>,
}

impl<K, V> Listeners<K, V>
where
    K: Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            registry: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub(crate) fn add(&self, callback: Callback<K, V>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.write().push((id, callback));

        let registry = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.write().retain(|(existing, _)| *existing != id);
            }
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.registry.read().len()
    }

    /// Queue a notification. Delivered once the dispatcher runs.
    pub(crate) fn notify(&self, notification: Notification<K, V>) {
        let _ = self.tx.send(notification);
    }

    /// Spawn the dispatcher thread. Only the first call spawns; the thread
    /// exits once the engine, and with it the sending half, is dropped.
    pub(crate) fn spawn_dispatcher(&self) -> Option<JoinHandle<()>> {
        let rx = self.rx.lock().take()?;
        let registry = self.registry.clone();
        match thread::Builder::new()
            .name("vns-listeners".to_string())
            .spawn(move || dispatch(rx, registry))
        {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(error = %err, "failed to spawn listener dispatcher");
                None
            }
        }
    }
}

fn dispatch<K, V>(mut rx: mpsc::UnboundedReceiver<Notification<K, V>>, registry: Registry<K, V>)
where
    K: Debug,
{
    while let Some(notification) = rx.blocking_recv() {
        let callbacks: Vec<Callback<K, V>> =
            registry.read().iter().map(|(_, cb)| cb.clone()).collect();

        for callback in callbacks {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                callback(
                    &notification.key,
                    notification.old.as_ref(),
                    notification.new.as_ref(),
                )
            }));
            if let Err(payload) = outcome {
                let err = ReplicatedError::Listener(panic_message(payload.as_ref()));
                warn!(key = ?notification.key, error = %err, "listener callback panicked");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
