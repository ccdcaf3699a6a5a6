//! The commit pipeline: append to the transaction log, then apply to storage.
//!
//! [`TransactionRepresentationCommitProcess`] drives a batch through a
//! [`TransactionAppender`] (which assigns ids and writes framed entries to a
//! [`TransactionLogWriter`]) and then through the
//! [`StorageEngine`](crate::storage::StorageEngine). Ids are tracked by a
//! [`TransactionIdStore`].

mod appender;
mod id_store;
mod log;
mod process;

pub use appender::{BatchingTransactionAppender, TransactionAppender};
pub use id_store::{InMemoryTransactionIdStore, TransactionIdStore};
pub use log::{
    decode_entries, encode_entry, InMemoryLogWriter, LogEntry, TransactionLogWriter, LOG_MAGIC,
    LOG_VERSION,
};
pub use process::TransactionRepresentationCommitProcess;

use crate::apply::{TransactionApplicationMode, TransactionToApply};
use crate::error::KernelResult;
use crate::types::TransactionId;
use std::time::Duration;

/// Timings and sizes reported by one commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitEvent {
    /// Time spent appending to the log.
    pub append_duration: Duration,
    /// Time spent applying to storage.
    pub apply_duration: Duration,
    /// Number of transactions in the batch.
    pub batch_size: usize,
    /// Id of the last transaction in the batch.
    pub last_tx_id: TransactionId,
}

/// Commits batches of transactions.
pub trait TransactionCommitProcess: Send + Sync {
    /// Appends and applies `batch`, returning the id of its last
    /// transaction.
    fn commit(
        &self,
        batch: Vec<TransactionToApply>,
        event: &mut CommitEvent,
        mode: TransactionApplicationMode,
    ) -> KernelResult<TransactionId>;
}
