//! Committed and closed transaction ids.

use crate::types::TransactionId;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out transaction ids and tracks how far commits have progressed.
///
/// A transaction is *committed* once appended and *closed* once applied.
pub trait TransactionIdStore: Send + Sync {
    /// Reserves the next id.
    fn next_committing_id(&self) -> TransactionId;

    /// Records that `id` was appended.
    fn transaction_committed(&self, id: TransactionId);

    /// Records that `id` was applied.
    fn transaction_closed(&self, id: TransactionId);

    /// Highest committed id.
    fn last_committed(&self) -> TransactionId;

    /// Highest id such that it and every id below it are closed.
    fn last_closed(&self) -> TransactionId;
}

#[derive(Debug, Default)]
struct Progress {
    last_committed: u64,
    last_closed: u64,
    closed_ahead: BTreeSet<u64>,
}

/// In-memory [`TransactionIdStore`].
///
/// Closes may arrive out of order; `last_closed` only advances over a
/// contiguous run of closed ids.
#[derive(Debug)]
pub struct InMemoryTransactionIdStore {
    next: AtomicU64,
    progress: Mutex<Progress>,
}

impl InMemoryTransactionIdStore {
    /// Creates a store whose first id is [`TransactionId::FIRST`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(TransactionId::FIRST.as_u64()),
            progress: Mutex::new(Progress::default()),
        }
    }
}

impl Default for InMemoryTransactionIdStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionIdStore for InMemoryTransactionIdStore {
    fn next_committing_id(&self) -> TransactionId {
        TransactionId::new(self.next.fetch_add(1, Ordering::SeqCst))
    }

    fn transaction_committed(&self, id: TransactionId) {
        let id = id.as_u64();
        self.next.fetch_max(id + 1, Ordering::SeqCst);
        let mut progress = self.progress.lock();
        progress.last_committed = progress.last_committed.max(id);
    }

    fn transaction_closed(&self, id: TransactionId) {
        let id = id.as_u64();
        let mut progress = self.progress.lock();
        if id <= progress.last_closed {
            return;
        }
        progress.closed_ahead.insert(id);
        loop {
            let next = progress.last_closed + 1;
            if !progress.closed_ahead.remove(&next) {
                break;
            }
            progress.last_closed = next;
        }
    }

    fn last_committed(&self) -> TransactionId {
        TransactionId::new(self.progress.lock().last_committed)
    }

    fn last_closed(&self) -> TransactionId {
        TransactionId::new(self.progress.lock().last_closed)
    }
}
