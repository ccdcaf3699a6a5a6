//! Assigns ids and writes transactions to the log.

use crate::apply::{IdOrderingQueue, TransactionToApply};
use crate::commit::id_store::TransactionIdStore;
use crate::commit::log::{encode_entry, TransactionLogWriter};
use crate::error::{KernelError, KernelResult};
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// Appends transactions to the log.
pub trait TransactionAppender: Send + Sync {
    /// Assigns an id to every transaction in `batch` and appends them in
    /// order. Returns the id of the last one.
    fn append(&self, batch: &mut [TransactionToApply]) -> KernelResult<TransactionId>;
}

/// Appends whole batches under one lock, then flushes once.
///
/// Transactions that need ordered application have their ids offered to the
/// [`IdOrderingQueue`] while the lock is held, so offered ids increase.
pub struct BatchingTransactionAppender {
    writer: Arc<dyn TransactionLogWriter>,
    id_store: Arc<dyn TransactionIdStore>,
    ordering: Arc<IdOrderingQueue>,
    append_lock: Mutex<()>,
}

impl BatchingTransactionAppender {
    /// Creates an appender.
    pub fn new(
        writer: Arc<dyn TransactionLogWriter>,
        id_store: Arc<dyn TransactionIdStore>,
        ordering: Arc<IdOrderingQueue>,
    ) -> Self {
        Self {
            writer,
            id_store,
            ordering,
            append_lock: Mutex::new(()),
        }
    }

    fn append_one(&self, tx: &mut TransactionToApply) -> KernelResult<TransactionId> {
        let tx_id = self.id_store.next_committing_id();
        tx.set_tx_id(tx_id);
        let written = encode_entry(tx_id, tx.representation())
            .and_then(|bytes| self.writer.append(&bytes));
        self.id_store.transaction_committed(tx_id);
        let offered = written.and_then(|_| {
            if tx.requires_ordering() {
                self.ordering.offer(tx_id)
            } else {
                Ok(())
            }
        });
        offered.map(|()| tx_id).map_err(|source| {
            // The id is burnt; keep the store gap-free.
            self.id_store.transaction_closed(tx_id);
            KernelError::AppendFailed {
                tx_id,
                source: Box::new(source),
            }
        })
    }

    /// Burns the ids of transactions appended before a failure and takes
    /// them out of the ordering queue, since they will never be applied.
    fn abandon(&self, appended: &[TransactionToApply]) {
        for tx in appended {
            if tx.requires_ordering() {
                self.ordering.withdraw(tx.tx_id());
            }
            self.id_store.transaction_closed(tx.tx_id());
        }
    }
}

impl TransactionAppender for BatchingTransactionAppender {
    fn append(&self, batch: &mut [TransactionToApply]) -> KernelResult<TransactionId> {
        let _guard = self.append_lock.lock();
        let mut last = TransactionId::READ_ONLY;
        let mut appended = 0;
        let mut failure = None;
        for tx in batch.iter_mut() {
            match self.append_one(tx) {
                Ok(tx_id) => {
                    last = tx_id;
                    appended += 1;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        let result = match failure {
            Some(e) => Err(e),
            None => self.writer.flush().map_err(|source| KernelError::AppendFailed {
                tx_id: last,
                source: Box::new(source),
            }),
        };
        if let Err(e) = result {
            self.abandon(&batch[..appended]);
            warn!(%last, appended, error = %e, "transaction append failed");
            return Err(e);
        }
        Ok(last)
    }
}

impl std::fmt::Debug for BatchingTransactionAppender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchingTransactionAppender")
            .field("last_committed", &self.id_store.last_committed())
            .finish_non_exhaustive()
    }
}
