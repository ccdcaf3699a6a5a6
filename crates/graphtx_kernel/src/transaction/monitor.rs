//! Transaction lifecycle monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

/// Observes transaction starts, ends and terminations.
pub trait TransactionMonitor: Send + Sync {
    /// A transaction began.
    fn transaction_started(&self);

    /// A transaction ended, either committed or rolled back.
    fn transaction_finished(&self, committed: bool, is_write: bool);

    /// A transaction was marked for termination.
    fn transaction_terminated(&self, is_write: bool);
}

/// A monitor that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransactionMonitor;

impl TransactionMonitor for NoopTransactionMonitor {
    fn transaction_started(&self) {}
    fn transaction_finished(&self, _committed: bool, _is_write: bool) {}
    fn transaction_terminated(&self, _is_write: bool) {}
}

/// Transaction counters.
///
/// All counters are atomic and can be read while transactions run. Values
/// are monotonically increasing except for the `active` gauge.
#[derive(Debug, Default)]
pub struct TransactionCounters {
    started: AtomicU64,
    active: AtomicU64,
    committed_read: AtomicU64,
    committed_write: AtomicU64,
    rolled_back_read: AtomicU64,
    rolled_back_write: AtomicU64,
    terminated_read: AtomicU64,
    terminated_write: AtomicU64,
}

impl TransactionCounters {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total transactions started.
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Transactions currently running.
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Total transactions committed.
    pub fn committed(&self) -> u64 {
        self.committed_read.load(Ordering::Relaxed) + self.committed_write.load(Ordering::Relaxed)
    }

    /// Total transactions rolled back.
    pub fn rolled_back(&self) -> u64 {
        self.rolled_back_read.load(Ordering::Relaxed)
            + self.rolled_back_write.load(Ordering::Relaxed)
    }

    /// Total transactions terminated.
    pub fn terminated(&self) -> u64 {
        self.terminated_read.load(Ordering::Relaxed)
            + self.terminated_write.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            started: self.started(),
            active: self.active(),
            committed_read: self.committed_read.load(Ordering::Relaxed),
            committed_write: self.committed_write.load(Ordering::Relaxed),
            rolled_back_read: self.rolled_back_read.load(Ordering::Relaxed),
            rolled_back_write: self.rolled_back_write.load(Ordering::Relaxed),
            terminated_read: self.terminated_read.load(Ordering::Relaxed),
            terminated_write: self.terminated_write.load(Ordering::Relaxed),
        }
    }
}

impl TransactionMonitor for TransactionCounters {
    fn transaction_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    fn transaction_finished(&self, committed: bool, is_write: bool) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        let counter = match (committed, is_write) {
            (true, false) => &self.committed_read,
            (true, true) => &self.committed_write,
            (false, false) => &self.rolled_back_read,
            (false, true) => &self.rolled_back_write,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn transaction_terminated(&self, is_write: bool) {
        let counter = if is_write {
            &self.terminated_write
        } else {
            &self.terminated_read
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A point-in-time copy of [`TransactionCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CountersSnapshot {
    /// Total transactions started.
    pub started: u64,
    /// Transactions running at snapshot time.
    pub active: u64,
    /// Committed read-only transactions.
    pub committed_read: u64,
    /// Committed write transactions.
    pub committed_write: u64,
    /// Rolled back read-only transactions.
    pub rolled_back_read: u64,
    /// Rolled back write transactions.
    pub rolled_back_write: u64,
    /// Terminated read-only transactions.
    pub terminated_read: u64,
    /// Terminated write transactions.
    pub terminated_write: u64,
}
