//! Kernel configuration.

use crate::types::PropertyKeyId;
use std::time::Duration;

/// Configuration for a kernel instance.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Maximum number of concurrently active transactions (0 = unbounded).
    pub max_concurrent_transactions: usize,

    /// Default transaction timeout (zero = never time out).
    pub transaction_timeout: Duration,

    /// How often the timeout monitor scans active transactions.
    pub timeout_monitor_interval: Duration,

    /// How long a lock request may wait before failing (`None` = forever).
    pub lock_acquisition_timeout: Option<Duration>,

    /// Number of transactions batched together before applying.
    pub transaction_queue_batch_size: usize,

    /// Capacity of the explicit-index commit ordering queue.
    pub explicit_index_ordering_capacity: usize,

    /// Whether node properties are mirrored into the node auto index.
    pub node_auto_indexing: bool,

    /// Property keys that are auto-indexed when `node_auto_indexing` is on.
    pub node_auto_index_keys: Vec<PropertyKeyId>,

    /// Whether per-transaction CPU time is sampled.
    pub track_cpu_time: bool,

    /// Whether per-transaction heap allocation is sampled.
    pub track_heap_allocation: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transactions: 1000,
            transaction_timeout: Duration::ZERO, // disabled
            timeout_monitor_interval: Duration::from_secs(2),
            lock_acquisition_timeout: None,
            transaction_queue_batch_size: 1,
            explicit_index_ordering_capacity: 1000,
            node_auto_indexing: false,
            node_auto_index_keys: Vec::new(),
            track_cpu_time: false,
            track_heap_allocation: false,
        }
    }
}

impl KernelConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of concurrently active transactions.
    #[must_use]
    pub const fn max_concurrent_transactions(mut self, value: usize) -> Self {
        self.max_concurrent_transactions = value;
        self
    }

    /// Sets the default transaction timeout.
    #[must_use]
    pub const fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Sets the timeout monitor scan interval.
    #[must_use]
    pub const fn timeout_monitor_interval(mut self, interval: Duration) -> Self {
        self.timeout_monitor_interval = interval;
        self
    }

    /// Sets the lock acquisition timeout.
    #[must_use]
    pub const fn lock_acquisition_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_acquisition_timeout = timeout;
        self
    }

    /// Sets the apply batch size.
    #[must_use]
    pub const fn transaction_queue_batch_size(mut self, size: usize) -> Self {
        self.transaction_queue_batch_size = size;
        self
    }

    /// Sets the explicit-index ordering queue capacity.
    #[must_use]
    pub const fn explicit_index_ordering_capacity(mut self, capacity: usize) -> Self {
        self.explicit_index_ordering_capacity = capacity;
        self
    }

    /// Enables node auto indexing for the given property keys.
    #[must_use]
    pub fn node_auto_index(mut self, keys: impl IntoIterator<Item = PropertyKeyId>) -> Self {
        self.node_auto_indexing = true;
        self.node_auto_index_keys = keys.into_iter().collect();
        self
    }

    /// Sets whether CPU time is tracked.
    #[must_use]
    pub const fn track_cpu_time(mut self, value: bool) -> Self {
        self.track_cpu_time = value;
        self
    }

    /// Sets whether heap allocation is tracked.
    #[must_use]
    pub const fn track_heap_allocation(mut self, value: bool) -> Self {
        self.track_heap_allocation = value;
        self
    }
}
