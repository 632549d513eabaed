//! Database configuration.

use std::time::Duration;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// How long a queued waiter may sit before being dropped instead of
    /// granted.
    pub lock_timeout: Duration,

    /// How often the background thread checkpoints (and compacts the WAL).
    pub checkpoint_interval: Duration,

    /// Number of newest checkpoint files to retain.
    pub checkpoint_retention: usize,

    /// Maximum number of statements accepted in one batch.
    pub max_batch_size: usize,

    /// Maximum wall-clock time a batch may run before aborting.
    pub batch_timeout: Duration,

    /// B+ tree order (maximum children per internal node).
    pub btree_order: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(30),
            checkpoint_interval: Duration::from_secs(60),
            checkpoint_retention: 5,
            max_batch_size: 100,
            batch_timeout: Duration::from_secs(30),
            btree_order: 4,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lock waiter timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, value: Duration) -> Self {
        self.lock_timeout = value;
        self
    }

    /// Sets the checkpoint interval.
    #[must_use]
    pub const fn checkpoint_interval(mut self, value: Duration) -> Self {
        self.checkpoint_interval = value;
        self
    }

    /// Sets how many checkpoint files to retain.
    #[must_use]
    pub const fn checkpoint_retention(mut self, value: usize) -> Self {
        self.checkpoint_retention = value;
        self
    }

    /// Sets the maximum number of statements in a batch.
    #[must_use]
    pub const fn max_batch_size(mut self, value: usize) -> Self {
        self.max_batch_size = value;
        self
    }

    /// Sets the batch wall-clock budget.
    #[must_use]
    pub const fn batch_timeout(mut self, value: Duration) -> Self {
        self.batch_timeout = value;
        self
    }

    /// Sets the B+ tree order.
    #[must_use]
    pub const fn btree_order(mut self, value: usize) -> Self {
        self.btree_order = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec() {
        let config = Config::default();
        assert_eq!(config.lock_timeout, Duration::from_secs(30));
        assert_eq!(config.checkpoint_interval, Duration::from_secs(60));
        assert_eq!(config.checkpoint_retention, 5);
        assert_eq!(config.max_batch_size, 100);
        assert_eq!(config.batch_timeout, Duration::from_secs(30));
        assert_eq!(config.btree_order, 4);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .max_batch_size(10)
            .btree_order(5)
            .checkpoint_retention(2);

        assert_eq!(config.max_batch_size, 10);
        assert_eq!(config.btree_order, 5);
        assert_eq!(config.checkpoint_retention, 2);
    }
}
