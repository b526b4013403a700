//! Pool and database configuration.

use crate::error::{CoreError, CoreResult};
use crate::index::xml::DEFAULT_MAX_DEPTH;
use std::time::Duration;

/// Instance name used when none is configured.
pub const DEFAULT_INSTANCE_NAME: &str = "arbor";

/// Configuration for opening a broker pool.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name the pool registers under.
    pub instance_name: String,

    /// Whether to create the database directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Brokers created eagerly at startup.
    pub min_brokers: usize,

    /// Upper bound on brokers checked out at once.
    pub max_brokers: usize,

    /// How long `checkout` waits for a free broker.
    pub checkout_timeout: Duration,

    /// How long a lock acquisition waits before failing.
    pub lock_timeout: Duration,

    /// How long a non-forced shutdown waits for brokers to come back.
    pub shutdown_timeout: Duration,

    /// Whether a plain commit syncs the journal.
    pub sync_on_commit: bool,

    /// Journal size that triggers a checkpoint after commit (0 = never).
    pub max_journal_size: u64,

    /// Index depth used when an index configuration does not set one.
    pub default_index_depth: u32,

    /// Deepest element nesting a stored document may have.
    pub max_document_depth: usize,

    /// Test switch: skip the final journal flush and checkpoint on shutdown
    /// so the next startup has to recover.
    pub force_corruption: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance_name: DEFAULT_INSTANCE_NAME.to_string(),
            create_if_missing: true,
            min_brokers: 1,
            max_brokers: 5,
            checkout_timeout: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            sync_on_commit: true,
            max_journal_size: 16 * 1024 * 1024, // 16 MB
            default_index_depth: 1,
            max_document_depth: DEFAULT_MAX_DEPTH,
            force_corruption: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the instance name.
    #[must_use]
    pub fn instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = name.into();
        self
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the eager and maximum broker counts.
    #[must_use]
    pub fn brokers(mut self, min: usize, max: usize) -> Self {
        self.min_brokers = min;
        self.max_brokers = max;
        self
    }

    /// Sets the checkout wait budget.
    #[must_use]
    pub fn checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    /// Sets the lock wait budget.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the shutdown drain budget.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets whether to sync the journal on every commit.
    #[must_use]
    pub fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the auto-checkpoint threshold.
    #[must_use]
    pub fn max_journal_size(mut self, size: u64) -> Self {
        self.max_journal_size = size;
        self
    }

    /// Sets the fallback index depth.
    #[must_use]
    pub fn default_index_depth(mut self, depth: u32) -> Self {
        self.default_index_depth = depth;
        self
    }

    /// Sets the document nesting limit.
    #[must_use]
    pub fn max_document_depth(mut self, depth: usize) -> Self {
        self.max_document_depth = depth;
        self
    }

    /// Sets the forced-corruption test switch.
    #[must_use]
    pub fn force_corruption(mut self, value: bool) -> Self {
        self.force_corruption = value;
        self
    }

    /// Checks the broker bounds and the document nesting limit.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` when `max_brokers` is zero or smaller than
    /// `min_brokers`, or when `max_document_depth` is zero.
    pub fn validate(&self) -> CoreResult<()> {
        if self.instance_name.is_empty() {
            return Err(CoreError::configuration("instance_name must not be empty"));
        }
        if self.max_brokers == 0 {
            return Err(CoreError::configuration("max_brokers must be at least 1"));
        }
        if self.min_brokers > self.max_brokers {
            return Err(CoreError::configuration(format!(
                "min_brokers ({}) exceeds max_brokers ({})",
                self.min_brokers, self.max_brokers
            )));
        }
        if self.max_document_depth == 0 {
            return Err(CoreError::configuration("max_document_depth must be at least 1"));
        }
        Ok(())
    }
}
