//! Replicated set engine: a [`ReplicatedMap`] whose values are unit.

use crate::codec::{SetCodec, SetEntries};
use crate::config::{EntryMode, ReplicatedConfig};
use crate::error::Result;
use crate::listener::Subscription;
use crate::map::ReplicatedMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::trace;
use vns_store::Directory;

/// Membership change delivered to set listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetChange {
    Added,
    Removed,
}

/// Eventually consistent set replicated through a [`Directory`].
///
/// Each member is stored as the node `element,,version`.
pub struct ReplicatedSet<C: SetCodec, D: Directory> {
    map: ReplicatedMap<SetEntries<C>, D>,
}

impl<C: SetCodec, D: Directory> ReplicatedSet<C, D> {
    /// Bind a set to `path`, writing entries with the given lifecycle.
    pub fn new(dir: Arc<D>, path: impl Into<String>, codec: C, mode: EntryMode) -> Self {
        let config = ReplicatedConfig {
            entry_mode: mode,
            ..ReplicatedConfig::default()
        };
        Self::with_config(dir, path, codec, config)
    }

    pub fn with_config(
        dir: Arc<D>,
        path: impl Into<String>,
        codec: C,
        config: ReplicatedConfig,
    ) -> Self {
        Self {
            map: ReplicatedMap::new(dir, path, SetEntries(codec), config),
        }
    }

    pub fn path(&self) -> &str {
        self.map.path()
    }

    pub async fn start(&self) -> Result<()> {
        self.map.start().await
    }

    pub async fn stop(&self) {
        self.map.stop().await
    }

    /// Add `element`. Does nothing when this engine already holds the
    /// authoritative entry for it.
    pub async fn add(&self, element: C::Element) -> Result<()> {
        let wrote = self.map.put_unless_owned(element, ()).await?;
        if !wrote {
            trace!(path = %self.map.path(), "element already owned");
        }
        Ok(())
    }

    /// Remove `element` everywhere. Returns whether it was a member.
    pub async fn remove(&self, element: &C::Element) -> Result<bool> {
        Ok(self.map.remove(element).await?.is_some())
    }

    pub fn contains(&self, element: &C::Element) -> bool {
        self.map.contains_key(element)
    }

    pub fn elements(&self) -> HashSet<C::Element> {
        self.map.snapshot().into_keys().collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn is_stale(&self) -> bool {
        self.map.is_stale()
    }

    /// Register `callback` for every membership change.
    pub fn add_listener<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&C::Element, SetChange) + Send + Sync + 'static,
    {
        self.map.add_listener(move |element, _old, new| {
            let change = if new.is_some() {
                SetChange::Added
            } else {
                SetChange::Removed
            };
            callback(element, change)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReplicatedError;
    use parking_lot::Mutex;
    use std::time::Duration;
    use vns_store::{MemoryDirectory, MemoryStore};

    struct Words;

    impl SetCodec for Words {
        type Element = String;

        fn encode(&self, element: &String) -> String {
            element.clone()
        }

        fn decode(&self, input: &str) -> std::result::Result<String, ReplicatedError> {
            Ok(input.to_string())
        }
    }

    fn set(store: &MemoryStore, mode: EntryMode) -> ReplicatedSet<Words, MemoryDirectory> {
        ReplicatedSet::new(Arc::new(store.connect()), "/s", Words, mode)
    }

    #[tokio::test]
    async fn test_add_is_noop_when_owned() {
        let store = MemoryStore::new();
        let words = set(&store, EntryMode::Ephemeral);
        words.start().await.unwrap();

        words.add("x".into()).await.unwrap();
        let first = store.children("/s");
        words.add("x".into()).await.unwrap();

        assert_eq!(store.children("/s"), first);
        assert_eq!(first.len(), 1);
        assert!(first[0].starts_with("x,,"));
        assert!(words.contains(&"x".into()));
    }

    #[tokio::test]
    async fn test_persistent_members_and_remove() {
        let store = MemoryStore::new();
        let words = set(&store, EntryMode::Persistent);
        words.start().await.unwrap();

        words.add("a".into()).await.unwrap();
        words.add("b".into()).await.unwrap();
        words.add("a".into()).await.unwrap();

        let mut children = store.children("/s");
        children.sort();
        assert_eq!(children, vec!["a,,1".to_string(), "b,,1".to_string()]);

        assert!(words.remove(&"a".into()).await.unwrap());
        assert!(!words.remove(&"a".into()).await.unwrap());
        assert_eq!(words.elements(), HashSet::from(["b".to_string()]));
    }

    #[tokio::test]
    async fn test_listener_sees_added_and_removed() {
        let store = MemoryStore::new();
        let words = set(&store, EntryMode::Ephemeral);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        words.add_listener(move |element: &String, change| {
            sink.lock().push((element.clone(), change));
        });
        words.start().await.unwrap();

        words.add("x".into()).await.unwrap();
        words.remove(&"x".into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            *seen.lock(),
            vec![
                ("x".to_string(), SetChange::Added),
                ("x".to_string(), SetChange::Removed)
            ]
        );
    }
}
