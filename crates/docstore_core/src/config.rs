//! Engine configuration.

use std::time::Duration;

use crate::types::ServerRole;

/// Default lock timeout applied when a caller passes zero.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Configuration shared by every collection of a database.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum time to wait for a collection lock.
    pub lock_timeout: Duration,

    /// Sleep between lock polls.
    pub lock_sleep_period: Duration,

    /// Poll iterations between deadlock detector walks.
    pub deadlock_check_interval: u32,

    /// Documents above which an index is filled in parallel batches.
    pub fill_batch_threshold: usize,

    /// Upper bound on the documents per fill batch.
    pub fill_block_size: usize,

    /// Primary size above which a multi-index fill is logged at info level.
    pub parallel_fill_log_threshold: usize,

    /// Worker threads for index filling (0 = number of CPUs).
    pub fill_worker_threads: usize,

    /// Arena capacity; allocating beyond it fails with out-of-memory.
    pub max_handles: usize,

    /// Default number of index buckets for new collections.
    pub default_index_buckets: u32,

    /// Default maximal segment size for new collections.
    pub default_maximal_size: u64,

    /// Default sync-on-write flag for new collections.
    pub wait_for_sync: bool,

    /// Role of this server.
    pub server_role: ServerRole,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_sleep_period: Duration::from_millis(10),
            deadlock_check_interval: 5,
            fill_batch_threshold: 256 * 1024,
            fill_block_size: 1024 * 1024,
            parallel_fill_log_threshold: 131_072,
            fill_worker_threads: 0,
            max_handles: usize::MAX,
            default_index_buckets: 8,
            default_maximal_size: 32 * 1024 * 1024, // 32 MB
            wait_for_sync: false,
            server_role: ServerRole::Single,
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lock timeout. Zero selects the default.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the sleep between lock polls.
    #[must_use]
    pub const fn lock_sleep_period(mut self, period: Duration) -> Self {
        self.lock_sleep_period = period;
        self
    }

    /// Sets the number of polls between deadlock checks.
    #[must_use]
    pub const fn deadlock_check_interval(mut self, polls: u32) -> Self {
        self.deadlock_check_interval = polls;
        self
    }

    /// Sets the parallel fill threshold.
    #[must_use]
    pub const fn fill_batch_threshold(mut self, docs: usize) -> Self {
        self.fill_batch_threshold = docs;
        self
    }

    /// Sets the maximum fill batch size.
    #[must_use]
    pub const fn fill_block_size(mut self, docs: usize) -> Self {
        self.fill_block_size = docs;
        self
    }

    /// Sets the worker thread count.
    #[must_use]
    pub const fn fill_worker_threads(mut self, threads: usize) -> Self {
        self.fill_worker_threads = threads;
        self
    }

    /// Caps the number of live document handles per collection.
    #[must_use]
    pub const fn max_handles(mut self, handles: usize) -> Self {
        self.max_handles = handles;
        self
    }

    /// Sets the default index bucket count.
    #[must_use]
    pub const fn default_index_buckets(mut self, buckets: u32) -> Self {
        self.default_index_buckets = buckets;
        self
    }

    /// Sets the default maximal segment size.
    #[must_use]
    pub const fn default_maximal_size(mut self, size: u64) -> Self {
        self.default_maximal_size = size;
        self
    }

    /// Sets the default sync-on-write flag.
    #[must_use]
    pub const fn wait_for_sync(mut self, value: bool) -> Self {
        self.wait_for_sync = value;
        self
    }

    /// Sets the server role.
    #[must_use]
    pub const fn server_role(mut self, role: ServerRole) -> Self {
        self.server_role = role;
        self
    }

    /// The timeout to apply for a requested value, mapping zero to the default.
    #[must_use]
    pub fn effective_timeout(&self, requested: Duration) -> Duration {
        if requested.is_zero() {
            if self.lock_timeout.is_zero() {
                DEFAULT_LOCK_TIMEOUT
            } else {
                self.lock_timeout
            }
        } else {
            requested
        }
    }
}
