//! Applying committed transactions to storage.
//!
//! A [`BatchTransactionApplierFacade`] composes per-subsystem appliers
//! (store, counts, explicit indexes, ...). For each transaction it starts one
//! [`TransactionApplier`] per subsystem in declared order, feeds every
//! command to each of them, and closes them in reverse order.

mod applier;
mod command;
mod lock_group;
mod ordering;
mod queue;

pub use applier::{
    apply_commands, BatchTransactionApplier, BatchTransactionApplierFacade, TransactionApplier,
    TransactionApplierFacade,
};
pub use command::{
    CommandKind, StorageCommand, TransactionHeader, TransactionRepresentation, TransactionToApply,
};
pub use lock_group::{ApplyLock, ApplyLocks, LockGroup};
pub use ordering::IdOrderingQueue;
pub use queue::{Applier, TransactionQueue};

/// Why a transaction is being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionApplicationMode {
    /// Committed by a local transaction.
    Internal,
    /// Received from outside, already committed elsewhere.
    External,
    /// Replayed from the log during recovery.
    Recovery,
}

impl TransactionApplicationMode {
    /// Returns `true` when replaying the log.
    #[must_use]
    pub const fn is_recovery(self) -> bool {
        matches!(self, Self::Recovery)
    }
}
