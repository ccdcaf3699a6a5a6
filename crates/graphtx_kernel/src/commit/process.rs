//! Append-then-apply commit process.

use crate::apply::{TransactionApplicationMode, TransactionToApply};
use crate::commit::appender::TransactionAppender;
use crate::commit::id_store::TransactionIdStore;
use crate::commit::{CommitEvent, TransactionCommitProcess};
use crate::error::{KernelError, KernelResult};
use crate::storage::StorageEngine;
use crate::types::TransactionId;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Commits by appending a batch to the log and applying it to storage.
///
/// An id is closed only once its transaction has been applied. If applying
/// fails, the failed transaction and those after it in the batch stay
/// committed but not closed.
pub struct TransactionRepresentationCommitProcess {
    appender: Arc<dyn TransactionAppender>,
    storage: Arc<dyn StorageEngine>,
    id_store: Arc<dyn TransactionIdStore>,
}

impl TransactionRepresentationCommitProcess {
    /// Creates a commit process.
    pub fn new(
        appender: Arc<dyn TransactionAppender>,
        storage: Arc<dyn StorageEngine>,
        id_store: Arc<dyn TransactionIdStore>,
    ) -> Self {
        Self {
            appender,
            storage,
            id_store,
        }
    }
}

impl TransactionCommitProcess for TransactionRepresentationCommitProcess {
    fn commit(
        &self,
        mut batch: Vec<TransactionToApply>,
        event: &mut CommitEvent,
        mode: TransactionApplicationMode,
    ) -> KernelResult<TransactionId> {
        event.batch_size = batch.len();
        if batch.is_empty() {
            return Ok(TransactionId::READ_ONLY);
        }

        let started = Instant::now();
        let last = self.appender.append(&mut batch)?;
        event.append_duration = started.elapsed();

        let started = Instant::now();
        if let Err(e) = self.storage.apply(&batch, mode) {
            let error = match e {
                e @ KernelError::ApplyFailed { .. } => e,
                source => KernelError::ApplyFailed {
                    tx_id: last,
                    source: Box::new(source),
                },
            };
            if let KernelError::ApplyFailed { tx_id: failed, .. } = &error {
                // Transactions ahead of the failed one were applied.
                for tx in batch.iter().filter(|tx| tx.tx_id() < *failed) {
                    self.id_store.transaction_closed(tx.tx_id());
                }
            }
            warn!(?mode, error = %error, "applying committed transactions failed");
            return Err(error);
        }
        event.apply_duration = started.elapsed();

        for tx in &batch {
            self.id_store.transaction_closed(tx.tx_id());
        }
        event.last_tx_id = last;
        debug!(tx_id = %last, batch = batch.len(), ?mode, "batch committed");
        Ok(last)
    }
}

impl std::fmt::Debug for TransactionRepresentationCommitProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionRepresentationCommitProcess")
            .field("last_closed", &self.id_store.last_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::{IdOrderingQueue, StorageCommand, TransactionRepresentation};
    use crate::commit::{BatchingTransactionAppender, InMemoryLogWriter, InMemoryTransactionIdStore};
    use crate::state::ExplicitIndexChange;
    use crate::storage::StorageReader;
    use crate::store::{GraphStore, MemoryStorageEngine};
    use crate::types::{EntityRef, NodeId, Value};

    struct Fixture {
        store: Arc<GraphStore>,
        ordering: Arc<IdOrderingQueue>,
        ids: Arc<InMemoryTransactionIdStore>,
        process: TransactionRepresentationCommitProcess,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(GraphStore::new());
        let ordering = Arc::new(IdOrderingQueue::new(8));
        let ids = Arc::new(InMemoryTransactionIdStore::new());
        let appender = Arc::new(BatchingTransactionAppender::new(
            Arc::new(InMemoryLogWriter::new()),
            ids.clone(),
            Arc::clone(&ordering),
        ));
        let storage = Arc::new(MemoryStorageEngine::new(
            Arc::clone(&store),
            Arc::clone(&ordering),
        ));
        Fixture {
            store,
            ordering,
            process: TransactionRepresentationCommitProcess::new(appender, storage, ids.clone()),
            ids,
        }
    }

    fn tx(command: StorageCommand) -> TransactionToApply {
        TransactionToApply::new(TransactionRepresentation {
            commands: vec![command],
            ..Default::default()
        })
    }

    #[test]
    fn applied_batches_are_closed() {
        let f = fixture();
        let mut event = CommitEvent::default();
        let batch = vec![
            tx(StorageCommand::NodeCreate { id: NodeId::new(1) }),
            tx(StorageCommand::NodeCreate { id: NodeId::new(2) }),
        ];

        let last = f
            .process
            .commit(batch, &mut event, TransactionApplicationMode::Internal)
            .unwrap();
        assert_eq!(last, TransactionId::new(2));
        assert_eq!(event.batch_size, 2);
        assert_eq!(event.last_tx_id, last);
        assert_eq!(f.ids.last_closed(), last);
        assert!(f.store.node_exists(NodeId::new(2)));
    }

    #[test]
    fn empty_batch_is_read_only() {
        let f = fixture();
        let id = f
            .process
            .commit(Vec::new(), &mut CommitEvent::default(), TransactionApplicationMode::Internal)
            .unwrap();
        assert_eq!(id, TransactionId::READ_ONLY);
        assert_eq!(f.ids.last_committed(), TransactionId::READ_ONLY);
    }

    #[test]
    fn apply_failure_leaves_the_id_committed_but_not_closed() {
        let f = fixture();
        let err = f
            .process
            .commit(
                vec![tx(StorageCommand::NodeDelete { id: NodeId::new(9) })],
                &mut CommitEvent::default(),
                TransactionApplicationMode::Internal,
            )
            .unwrap_err();

        assert!(matches!(
            err,
            KernelError::ApplyFailed { tx_id, .. } if tx_id == TransactionId::new(1)
        ));
        assert_eq!(f.ids.last_committed(), TransactionId::new(1));
        assert_eq!(f.ids.last_closed(), TransactionId::READ_ONLY);
    }

    #[test]
    fn failure_mid_batch_names_the_failed_transaction() {
        let f = fixture();
        let indexed = TransactionToApply::new(TransactionRepresentation {
            commands: vec![
                StorageCommand::NodeCreate { id: NodeId::new(3) },
                StorageCommand::ExplicitIndex(ExplicitIndexChange::Add {
                    index: "people".into(),
                    entity: EntityRef::Node(NodeId::new(3)),
                    key: "name".into(),
                    value: Value::from("ada"),
                }),
            ],
            ..Default::default()
        });
        let batch = vec![
            tx(StorageCommand::NodeCreate { id: NodeId::new(1) }),
            tx(StorageCommand::NodeDelete { id: NodeId::new(77) }),
            indexed,
        ];

        let err = f
            .process
            .commit(batch, &mut CommitEvent::default(), TransactionApplicationMode::External)
            .unwrap_err();

        assert!(matches!(
            err,
            KernelError::ApplyFailed { tx_id, .. } if tx_id == TransactionId::new(2)
        ));
        assert!(f.store.node_exists(NodeId::new(1)));
        assert!(!f.store.node_exists(NodeId::new(3)));
        assert!(f.ordering.is_empty());
        assert_eq!(f.ids.last_committed(), TransactionId::new(3));
        assert_eq!(f.ids.last_closed(), TransactionId::new(1));
    }
}
