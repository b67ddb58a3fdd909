//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use vns_store::CreateMode;

/// Lifecycle of the entries an engine writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryMode {
    /// Sequential nodes bound to the writer's session.
    #[default]
    Ephemeral,
    /// Version-1 nodes that outlive the session.
    Persistent,
}

impl EntryMode {
    pub(crate) fn create_mode(&self) -> CreateMode {
        match self {
            EntryMode::Ephemeral => CreateMode::EphemeralSequential,
            EntryMode::Persistent => CreateMode::Persistent,
        }
    }
}

/// Bounded exponential backoff for transient store failures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// One automatic retry, for caller-visible writes.
    pub fn writes() -> Self {
        Self {
            max_retries: 1,
            initial_backoff_ms: 50,
            max_backoff_ms: 50,
        }
    }

    /// Longer schedule for background scans.
    pub fn scans() -> Self {
        Self {
            max_retries: 4,
            initial_backoff_ms: 25,
            max_backoff_ms: 400,
        }
    }

    /// Fail on the first transient error.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::writes()
    }
}

/// Configuration for a replicated map or set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicatedConfig {
    /// Lifecycle of entries written by `put`.
    pub entry_mode: EntryMode,
    /// Create the bound path (and ancestors) on start.
    pub create_path: bool,
    /// Retry schedule for put/remove.
    pub write_retry: RetryPolicy,
    /// Retry schedule for reconciliation scans and garbage collection.
    pub scan_retry: RetryPolicy,
    /// How often a stale mirror retries a full resync (in milliseconds).
    pub stale_resync_ms: u64,
}

impl ReplicatedConfig {
    pub fn stale_resync_interval(&self) -> Duration {
        Duration::from_millis(self.stale_resync_ms.max(1))
    }
}

impl Default for ReplicatedConfig {
    fn default() -> Self {
        Self {
            entry_mode: EntryMode::Ephemeral,
            create_path: true,
            write_retry: RetryPolicy::writes(),
            scan_retry: RetryPolicy::scans(),
            stale_resync_ms: 1000,
        }
    }
}

/// Builder for engine configuration.
pub struct ReplicatedConfigBuilder {
    config: ReplicatedConfig,
}

impl ReplicatedConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ReplicatedConfig::default(),
        }
    }

    pub fn entry_mode(mut self, mode: EntryMode) -> Self {
        self.config.entry_mode = mode;
        self
    }

    pub fn persistent(self) -> Self {
        self.entry_mode(EntryMode::Persistent)
    }

    pub fn create_path(mut self, enabled: bool) -> Self {
        self.config.create_path = enabled;
        self
    }

    pub fn write_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.write_retry = policy;
        self
    }

    pub fn scan_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.scan_retry = policy;
        self
    }

    pub fn stale_resync(mut self, ms: u64) -> Self {
        self.config.stale_resync_ms = ms;
        self
    }

    pub fn build(self) -> ReplicatedConfig {
        self.config
    }
}

impl Default for ReplicatedConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
