//! [`StorageEngine`] over the in-memory [`GraphStore`].

use crate::apply::{
    apply_commands, ApplyLocks, BatchTransactionApplier, BatchTransactionApplierFacade,
    IdOrderingQueue, LockGroup, StorageCommand, TransactionApplicationMode, TransactionToApply,
};
use crate::error::{KernelError, KernelResult};
use crate::locking::{LockClient, NoopLockTracer, ResourceType};
use crate::state::TransactionState;
use crate::storage::{CommandCreationContext, StorageEngine, StorageReader};
use crate::store::appliers::{CountsApplier, ExplicitIndexApplier, StoreApplier};
use crate::store::extract::CommandExtractor;
use crate::store::graph::{GraphStore, StoreIdReservations};
use crate::types::TransactionId;
use std::sync::Arc;
use tracing::{trace, warn};

/// Lock id of the single schema resource.
const SCHEMA_LOCK_ID: u64 = 0;

/// Storage engine keeping everything in a shared [`GraphStore`].
pub struct MemoryStorageEngine {
    store: Arc<GraphStore>,
    apply_locks: ApplyLocks,
    ordering: Arc<IdOrderingQueue>,
}

impl MemoryStorageEngine {
    /// Creates an engine over `store`, using `ordering` to order explicit
    /// index changes of internally and externally committed transactions.
    #[must_use]
    pub fn new(store: Arc<GraphStore>, ordering: Arc<IdOrderingQueue>) -> Self {
        Self {
            store,
            apply_locks: ApplyLocks::new(),
            ordering,
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// Takes transactions that will not be applied out of the ordering
    /// queue, so later explicit index changes are not held up behind them.
    fn withdraw_unapplied(&self, unapplied: &[TransactionToApply]) {
        for tx in unapplied.iter().filter(|tx| tx.requires_ordering()) {
            if self.ordering.withdraw(tx.tx_id()) {
                warn!(tx_id = %tx.tx_id(), "withdrew unapplied transaction from the ordering queue");
            }
        }
    }

    /// The applier chain for one batch: explicit indexes, store, counts.
    fn appliers(&self, mode: TransactionApplicationMode) -> BatchTransactionApplierFacade {
        let ordering = (!mode.is_recovery()).then(|| Arc::clone(&self.ordering));
        BatchTransactionApplierFacade::new(vec![
            Arc::new(ExplicitIndexApplier::new(Arc::clone(&self.store), ordering))
                as Arc<dyn BatchTransactionApplier>,
            Arc::new(StoreApplier::new(
                Arc::clone(&self.store),
                self.apply_locks.clone(),
            )),
            Arc::new(CountsApplier::new(Arc::clone(&self.store))),
        ])
    }
}

impl StorageEngine for MemoryStorageEngine {
    fn new_reader(&self) -> Arc<dyn StorageReader> {
        Arc::clone(&self.store) as Arc<dyn StorageReader>
    }

    fn allocate_command_creation_context(&self) -> Box<dyn CommandCreationContext> {
        Box::new(StoreIdReservations::new(Arc::clone(&self.store)))
    }

    fn create_commands(
        &self,
        commands: &mut Vec<StorageCommand>,
        tx_state: &TransactionState,
        reader: &dyn StorageReader,
        locks: &dyn LockClient,
        last_committed: TransactionId,
    ) -> KernelResult<()> {
        if tx_state.has_schema_changes() {
            locks.acquire_exclusive(&NoopLockTracer, ResourceType::Schema, &[SCHEMA_LOCK_ID])?;
        }
        let before = commands.len();
        tx_state.accept(&mut CommandExtractor::new(commands, tx_state, reader))?;
        trace!(
            commands = commands.len() - before,
            %last_committed,
            "extracted commands"
        );
        Ok(())
    }

    fn apply(&self, batch: &[TransactionToApply], mode: TransactionApplicationMode) -> KernelResult<()> {
        let appliers = self.appliers(mode);
        let mut result = Ok(());
        for (at, tx) in batch.iter().enumerate() {
            let mut lock_group = LockGroup::new();
            let applied = appliers
                .start_tx_facade(tx, &mut lock_group)
                .and_then(|mut applier| apply_commands(&mut applier, tx));
            lock_group.close();
            if let Err(source) = applied {
                if !mode.is_recovery() {
                    self.withdraw_unapplied(&batch[at..]);
                }
                result = Err(KernelError::ApplyFailed {
                    tx_id: tx.tx_id(),
                    source: Box::new(source),
                });
                break;
            }
        }
        let closed = BatchTransactionApplier::close(&appliers);
        result.and(closed)
    }
}

impl std::fmt::Debug for MemoryStorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorageEngine")
            .field("nodes", &self.store.node_total())
            .field("relationships", &self.store.relationship_total())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::TransactionRepresentation;
    use crate::error::KernelError;
    use crate::locking::{LockManager, Locks};
    use crate::schema::{IndexDescriptor, SchemaDescriptor};
    use crate::state::{CountsKey, ExplicitIndexChange};
    use crate::types::{EntityRef, LabelId, NodeId, PropertyKeyId, RelationshipTypeId, Value};

    fn engine() -> MemoryStorageEngine {
        MemoryStorageEngine::new(Arc::new(GraphStore::new()), Arc::new(IdOrderingQueue::new(8)))
    }

    fn extract(engine: &MemoryStorageEngine, state: &TransactionState) -> KernelResult<Vec<StorageCommand>> {
        let locks = LockManager::default().new_client();
        let mut commands = Vec::new();
        let reader = engine.new_reader();
        engine.create_commands(&mut commands, state, &*reader, &*locks, TransactionId::READ_ONLY)?;
        locks.close();
        Ok(commands)
    }

    fn commit(engine: &MemoryStorageEngine, commands: Vec<StorageCommand>, id: u64) -> KernelResult<()> {
        let tx = TransactionToApply::with_id(
            TransactionRepresentation {
                commands,
                ..Default::default()
            },
            TransactionId::new(id),
        );
        engine.apply(&[tx], TransactionApplicationMode::Internal)
    }

    #[test]
    fn commands_follow_visit_order() {
        let engine = engine();
        let mut ids = engine.allocate_command_creation_context();
        let node = ids.reserve_node();
        let mut state = TransactionState::new();
        state.node_do_create(node);
        state.node_do_add_label(node, LabelId::new(1));
        state.node_do_set_property(node, PropertyKeyId::new(2), Value::from(7_i64), false);
        state.counts_mut().increment_node_count(None, 1);

        let commands = extract(&engine, &state).unwrap();
        assert!(matches!(commands[0], StorageCommand::NodeCreate { id } if id == node));
        assert!(matches!(commands[1], StorageCommand::NodeLabels { .. }));
        assert!(matches!(commands[2], StorageCommand::NodeProperties { .. }));
        assert!(matches!(commands.last(), Some(StorageCommand::Counts(_))));

        commit(&engine, commands, 1).unwrap();
        assert_eq!(engine.store().node_labels(node), vec![LabelId::new(1)]);
        assert_eq!(engine.store().node_count(None), 1);
    }

    #[test]
    fn relationship_to_node_deleted_in_same_tx_is_rejected() {
        let engine = engine();
        let store = engine.store();
        let node = store.reserve_node_id();
        store.apply(&StorageCommand::NodeCreate { id: node }).unwrap();

        let mut state = TransactionState::new();
        state.node_do_delete(node);
        state.relationship_do_create(
            store.reserve_relationship_id(),
            RelationshipTypeId::new(1),
            node,
            node,
        );
        let err = extract(&engine, &state).unwrap_err();
        assert!(matches!(err, KernelError::EntityNotFound { .. }));
    }

    #[test]
    fn schema_changes_take_the_schema_lock() {
        let engine = engine();
        let manager = LockManager::default();
        let locks = manager.new_client();
        let mut state = TransactionState::new();
        state.index_do_add(IndexDescriptor::general(
            engine.store().reserve_index_id(),
            SchemaDescriptor::for_label(LabelId::new(1), [PropertyKeyId::new(1)]),
        ));

        let mut commands = Vec::new();
        engine
            .create_commands(&mut commands, &state, &**engine.store(), &*locks, TransactionId::READ_ONLY)
            .unwrap();
        assert_eq!(locks.active_lock_count(), 1);
        assert!(matches!(commands[0], StorageCommand::IndexCreate(_)));
        locks.close();
    }

    #[test]
    fn recovery_skips_the_ordering_queue() {
        let engine = engine();
        let change = StorageCommand::ExplicitIndex(ExplicitIndexChange::Add {
            index: "people".into(),
            entity: EntityRef::Node(NodeId::new(1)),
            key: "name".into(),
            value: Value::from("ada"),
        });
        let tx = TransactionToApply::with_id(
            TransactionRepresentation {
                commands: vec![change],
                ..Default::default()
            },
            TransactionId::new(5),
        );
        engine.apply(&[tx], TransactionApplicationMode::Recovery).unwrap();
        assert_eq!(
            engine.store().explicit_index_get("people", "name", &Value::from("ada")).len(),
            1
        );
    }

    #[test]
    fn failed_transaction_stops_the_batch() {
        let engine = engine();
        let tx = |commands, id| {
            TransactionToApply::with_id(
                TransactionRepresentation {
                    commands,
                    ..Default::default()
                },
                TransactionId::new(id),
            )
        };
        let batch = [
            tx(vec![StorageCommand::Counts(vec![(CountsKey::node(None), 1)])], 1),
            tx(vec![StorageCommand::NodeDelete { id: NodeId::new(40) }], 2),
            tx(vec![StorageCommand::NodeCreate { id: NodeId::new(41) }], 3),
        ];
        let err = engine
            .apply(&batch, TransactionApplicationMode::Internal)
            .unwrap_err();
        assert!(matches!(err, KernelError::EntityNotFound { .. }));
        assert!(!engine.store().node_exists(NodeId::new(41)));
        // the batch is still closed, so earlier counts land
        assert_eq!(engine.store().node_count(None), 1);
    }
}
