//! Configuration stores hand out shared snapshots and broadcast replacements.
//!
//! # Design
//! - Readers always receive an `Arc<Config>`; a save swaps the whole value.
//! - Change notification rides on a `tokio::sync::watch` channel, so slow
//!   subscribers only ever observe the latest committed snapshot.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::error::ConfigResult;
use crate::model::Config;

/// Abstraction over configuration backends consumed by the platform.
pub trait ConfigStore: Send + Sync {
    /// Current snapshot.
    fn get(&self) -> Arc<Config>;

    /// Validate and commit a replacement snapshot, returning `(old, new)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot fails validation; the previous value
    /// stays in effect.
    fn set(&self, config: Config) -> ConfigResult<(Arc<Config>, Arc<Config>)>;

    /// Subscribe to snapshot replacements.
    fn subscribe(&self) -> watch::Receiver<Arc<Config>>;
}

/// In-memory store used by tests and by the binary after env overlay.
pub struct MemoryStore {
    sender: watch::Sender<Arc<Config>>,
}

impl MemoryStore {
    /// Create a store seeded with `config` without validating it.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (sender, _) = watch::channel(Arc::new(config));
        Self { sender }
    }

    /// Create a store seeded with defaults.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self) -> Arc<Config> {
        Arc::clone(&self.sender.borrow())
    }

    fn set(&self, config: Config) -> ConfigResult<(Arc<Config>, Arc<Config>)> {
        config.validate()?;
        let new = Arc::new(config);
        let old = self.sender.send_replace(Arc::clone(&new));
        debug!(
            receivers = self.sender.receiver_count(),
            "configuration snapshot replaced"
        );
        Ok((old, new))
    }

    fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.sender.subscribe()
    }
}
