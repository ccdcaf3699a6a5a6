//! Batch appliers of the reference store.

use crate::apply::{
    ApplyLocks, BatchTransactionApplier, IdOrderingQueue, LockGroup, StorageCommand,
    TransactionApplier, TransactionToApply,
};
use crate::error::KernelResult;
use crate::state::{CountsRecordState, ExplicitIndexChange};
use crate::store::graph::GraphStore;
use crate::types::{NodeId, TransactionId};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Applies record and schema commands to the [`GraphStore`].
///
/// Every node a transaction touches is apply-locked for the duration of
/// that transaction, in ascending id order.
pub struct StoreApplier {
    store: Arc<GraphStore>,
    locks: ApplyLocks,
}

impl StoreApplier {
    /// Creates an applier writing to `store`.
    #[must_use]
    pub fn new(store: Arc<GraphStore>, locks: ApplyLocks) -> Self {
        Self { store, locks }
    }
}

fn touched_nodes(tx: &TransactionToApply) -> BTreeSet<NodeId> {
    let mut nodes = BTreeSet::new();
    for command in &tx.representation().commands {
        match command {
            StorageCommand::NodeCreate { id }
            | StorageCommand::NodeDelete { id }
            | StorageCommand::NodeLabels { id, .. }
            | StorageCommand::NodeProperties { id, .. } => {
                nodes.insert(*id);
            }
            StorageCommand::RelationshipCreate { record, .. } => {
                nodes.insert(record.start);
                nodes.insert(record.end);
            }
            _ => {}
        }
    }
    nodes
}

impl BatchTransactionApplier for StoreApplier {
    fn start_tx<'a>(
        &'a self,
        tx: &TransactionToApply,
        lock_group: &mut LockGroup,
    ) -> KernelResult<Box<dyn TransactionApplier + 'a>> {
        for node in touched_nodes(tx) {
            lock_group.lock(&self.locks, node.as_u64());
        }
        Ok(Box::new(StoreTransactionApplier { store: &self.store }))
    }
}

struct StoreTransactionApplier<'a> {
    store: &'a GraphStore,
}

impl TransactionApplier for StoreTransactionApplier<'_> {
    fn visit_node_command(&mut self, command: &StorageCommand) -> KernelResult<()> {
        self.store.apply(command)
    }

    fn visit_relationship_command(&mut self, command: &StorageCommand) -> KernelResult<()> {
        self.store.apply(command)
    }

    fn visit_schema_command(&mut self, command: &StorageCommand) -> KernelResult<()> {
        self.store.apply(command)
    }
}

/// Accumulates count deltas over a whole batch and stores them when the
/// batch closes.
pub struct CountsApplier {
    store: Arc<GraphStore>,
    pending: Mutex<CountsRecordState>,
}

impl CountsApplier {
    /// Creates an applier writing to `store`.
    #[must_use]
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self {
            store,
            pending: Mutex::new(CountsRecordState::new()),
        }
    }
}

impl BatchTransactionApplier for CountsApplier {
    fn start_tx<'a>(
        &'a self,
        _tx: &TransactionToApply,
        _lock_group: &mut LockGroup,
    ) -> KernelResult<Box<dyn TransactionApplier + 'a>> {
        Ok(Box::new(CountsTransactionApplier {
            owner: self,
            deltas: CountsRecordState::new(),
        }))
    }

    fn close(&self) -> KernelResult<()> {
        let pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return Ok(());
        }
        self.store
            .apply(&StorageCommand::Counts(pending.iter().collect()))
    }
}

struct CountsTransactionApplier<'a> {
    owner: &'a CountsApplier,
    deltas: CountsRecordState,
}

impl TransactionApplier for CountsTransactionApplier<'_> {
    fn visit_counts_command(&mut self, command: &StorageCommand) -> KernelResult<()> {
        if let StorageCommand::Counts(deltas) = command {
            for (key, delta) in deltas {
                self.deltas.increment(*key, *delta);
            }
        }
        Ok(())
    }

    fn close(&mut self) -> KernelResult<()> {
        self.owner.pending.lock().add_all(&self.deltas);
        Ok(())
    }
}

/// Applies explicit index changes in commit order.
///
/// With an ordering queue, a transaction carrying explicit index changes
/// waits in `start_tx` until its id is at the head of the queue, and leaves
/// the queue when it closes. Without one (recovery) changes are applied in
/// the order transactions arrive.
pub struct ExplicitIndexApplier {
    store: Arc<GraphStore>,
    ordering: Option<Arc<IdOrderingQueue>>,
}

impl ExplicitIndexApplier {
    /// Creates an applier writing to `store`.
    #[must_use]
    pub fn new(store: Arc<GraphStore>, ordering: Option<Arc<IdOrderingQueue>>) -> Self {
        Self { store, ordering }
    }
}

impl BatchTransactionApplier for ExplicitIndexApplier {
    fn start_tx<'a>(
        &'a self,
        tx: &TransactionToApply,
        _lock_group: &mut LockGroup,
    ) -> KernelResult<Box<dyn TransactionApplier + 'a>> {
        let ordered = match &self.ordering {
            Some(queue) if tx.requires_ordering() => {
                queue.wait_for(tx.tx_id())?;
                Some(tx.tx_id())
            }
            _ => None,
        };
        Ok(Box::new(ExplicitIndexTransactionApplier {
            owner: self,
            ordered,
            changes: Vec::new(),
        }))
    }
}

struct ExplicitIndexTransactionApplier<'a> {
    owner: &'a ExplicitIndexApplier,
    ordered: Option<TransactionId>,
    changes: Vec<ExplicitIndexChange>,
}

impl TransactionApplier for ExplicitIndexTransactionApplier<'_> {
    fn visit_explicit_index_command(&mut self, command: &StorageCommand) -> KernelResult<()> {
        if let StorageCommand::ExplicitIndex(change) = command {
            self.changes.push(change.clone());
        }
        Ok(())
    }

    fn close(&mut self) -> KernelResult<()> {
        let mut result = Ok(());
        for change in self.changes.drain(..) {
            result = self.owner.store.apply(&StorageCommand::ExplicitIndex(change));
            if result.is_err() {
                break;
            }
        }
        if let (Some(id), Some(queue)) = (self.ordered.take(), &self.owner.ordering) {
            let removed = queue.remove_checked(id);
            if result.is_ok() {
                result = removed;
            }
        }
        result
    }
}
