//! Handles to one use of a pooled transaction.

use crate::transaction::kernel_transaction::KernelTransaction;
use crate::transaction::statistics::StatisticsSnapshot;
use crate::transaction::TerminationReason;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Refers to one use of a [`KernelTransaction`].
///
/// The handle captures the slot's reuse count when created. Once that use
/// ends the handle goes stale: it reports closed and termination requests
/// through it are ignored.
#[derive(Clone)]
pub struct KernelTransactionHandle {
    tx: Arc<KernelTransaction>,
    reuse_count: u64,
    start_millis: u64,
    timeout: Duration,
    user_tx_id: u64,
}

impl KernelTransactionHandle {
    /// Captures the current use of `tx`.
    #[must_use]
    pub fn new(tx: &Arc<KernelTransaction>) -> Self {
        Self {
            reuse_count: tx.reuse_count(),
            start_millis: tx.start_millis(),
            timeout: tx.timeout(),
            user_tx_id: tx.user_transaction_id(),
            tx: Arc::clone(tx),
        }
    }

    fn is_current(&self) -> bool {
        self.tx.reuse_count() == self.reuse_count
    }

    /// Returns `true` while the captured use is still running.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.is_current() && self.tx.is_open()
    }

    /// Terminates the captured use. See
    /// [`KernelTransaction::mark_for_termination`].
    pub fn mark_for_termination(&self, reason: TerminationReason) -> bool {
        self.tx.mark_for_termination(self.reuse_count, reason)
    }

    /// Why the captured use was terminated, if it is still running and was.
    #[must_use]
    pub fn reason_if_terminated(&self) -> Option<TerminationReason> {
        if self.is_current() {
            self.tx.reason_if_terminated()
        } else {
            None
        }
    }

    /// Start time of the captured use, in milliseconds.
    #[must_use]
    pub fn start_millis(&self) -> u64 {
        self.start_millis
    }

    /// Timeout of the captured use; zero means none.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Id handed out by the pool for the captured use.
    #[must_use]
    pub fn user_transaction_id(&self) -> u64 {
        self.user_tx_id
    }

    /// Reuse count of the captured use.
    #[must_use]
    pub fn reuse_count(&self) -> u64 {
        self.reuse_count
    }

    /// Statistics of the captured use, while it runs.
    #[must_use]
    pub fn statistics(&self) -> Option<StatisticsSnapshot> {
        self.is_current().then(|| self.tx.statistics())
    }

    /// Returns `true` if this handle refers to `tx`'s slot.
    #[must_use]
    pub fn is_underlying(&self, tx: &KernelTransaction) -> bool {
        std::ptr::eq(&*self.tx, tx)
    }
}

impl fmt::Debug for KernelTransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelTransactionHandle")
            .field("slot", &self.tx.slot())
            .field("reuse_count", &self.reuse_count)
            .field("user_tx_id", &self.user_tx_id)
            .finish()
    }
}
