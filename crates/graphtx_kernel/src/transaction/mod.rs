//! Kernel transaction lifecycle.
//!
//! Transactions are pooled: a [`KernelTransactions`] registry owns a fixed
//! arena of [`KernelTransaction`] slots and hands them out on `begin`. Each
//! use of a slot is identified by its reuse count, which is bumped when the
//! slot is reset after close. [`KernelTransactionHandle`]s capture
//! `(slot, reuse_count)` and go stale as soon as the use they refer to ends.

mod clock;
mod handle;
pub(crate) mod kernel_transaction;
mod monitor;
mod pool;
mod statistics;
mod status;
mod timeout;

pub use clock::{Clock, FakeClock, SystemClock};
pub use handle::KernelTransactionHandle;
pub use kernel_transaction::{CloseListener, CloseOutcome, KernelTransaction};
pub use monitor::{CountersSnapshot, NoopTransactionMonitor, TransactionCounters, TransactionMonitor};
pub use pool::{KernelTransactions, TransactionDependencies, TransactionsSnapshot};
pub use statistics::{
    CpuClock, HeapAllocationSampler, NoopCpuClock, NoopHeapAllocation, NoopPageCursorTracer,
    PageCursorTracer, StatisticsSnapshot, TransactionStatistics,
};
pub use status::{Phase, TransactionStatus};
pub use timeout::{TimeoutMonitor, TimeoutMonitorHandle};

use std::fmt;

/// What a transaction is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Reads only.
    Read,
    /// Reads, data writes and token creation.
    Write,
    /// Everything, including schema writes.
    Full,
}

impl AccessMode {
    /// Returns `true` if data writes are allowed.
    #[must_use]
    pub const fn allows_writes(self) -> bool {
        matches!(self, Self::Write | Self::Full)
    }

    /// Returns `true` if schema writes are allowed.
    #[must_use]
    pub const fn allows_schema_writes(self) -> bool {
        matches!(self, Self::Full)
    }

    /// Returns `true` if new tokens may be created.
    #[must_use]
    pub const fn allows_token_creates(self) -> bool {
        self.allows_writes()
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "READ"),
            Self::Write => write!(f, "WRITE"),
            Self::Full => write!(f, "FULL"),
        }
    }
}

/// Why a transaction was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationReason {
    /// Explicitly terminated by a user or administrator.
    Terminated,
    /// Ran longer than its timeout.
    TransactionTimedOut,
    /// The database is shutting down.
    DatabaseShutdown,
    /// Locks held by the transaction are no longer valid.
    LockSessionExpired,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Terminated => "explicitly terminated",
            Self::TransactionTimedOut => "timed out",
            Self::DatabaseShutdown => "database is shutting down",
            Self::LockSessionExpired => "lock session expired",
        };
        f.write_str(text)
    }
}
