//! Turns a [`TransactionState`] into storage commands.

use crate::apply::StorageCommand;
use crate::error::{KernelError, KernelResult};
use crate::schema::{ConstraintDescriptor, IndexDescriptor};
use crate::state::{
    CountsRecordState, ExplicitIndexChange, PropertyChanges, RelationshipRecord, TransactionState,
    TxStateVisitor,
};
use crate::storage::StorageReader;
use crate::types::{EntityRef, LabelId, NodeId, PropertyKeyId, RelationshipId, Value};

/// Emits one command per visited change, in visit order.
///
/// Also checks the record-level rules that only hold once the whole
/// transaction is known: relationship endpoints must exist at commit, and a
/// deleted node must not keep any relationship.
pub(crate) struct CommandExtractor<'a> {
    commands: &'a mut Vec<StorageCommand>,
    tx_state: &'a TransactionState,
    reader: &'a dyn StorageReader,
}

impl<'a> CommandExtractor<'a> {
    pub(crate) fn new(
        commands: &'a mut Vec<StorageCommand>,
        tx_state: &'a TransactionState,
        reader: &'a dyn StorageReader,
    ) -> Self {
        Self {
            commands,
            tx_state,
            reader,
        }
    }

    fn node_exists_at_commit(&self, id: NodeId) -> bool {
        if self.tx_state.node_is_deleted_in_this_tx(id) {
            return false;
        }
        self.tx_state.node_is_added_in_this_tx(id) || self.reader.node_exists(id)
    }
}

fn property_lists(changes: &PropertyChanges) -> (Vec<(PropertyKeyId, Value)>, Vec<PropertyKeyId>) {
    let set = changes
        .added()
        .chain(changes.changed())
        .map(|(key, value)| (key, value.clone()))
        .collect();
    (set, changes.removed().collect())
}

impl TxStateVisitor for CommandExtractor<'_> {
    fn visit_created_node(&mut self, id: NodeId) -> KernelResult<()> {
        self.commands.push(StorageCommand::NodeCreate { id });
        Ok(())
    }

    fn visit_node_label_changes(
        &mut self,
        id: NodeId,
        added: &[LabelId],
        removed: &[LabelId],
    ) -> KernelResult<()> {
        self.commands.push(StorageCommand::NodeLabels {
            id,
            added: added.to_vec(),
            removed: removed.to_vec(),
        });
        Ok(())
    }

    fn visit_node_property_changes(
        &mut self,
        id: NodeId,
        changes: &PropertyChanges,
    ) -> KernelResult<()> {
        let (set, removed) = property_lists(changes);
        self.commands
            .push(StorageCommand::NodeProperties { id, set, removed });
        Ok(())
    }

    fn visit_created_relationship(
        &mut self,
        id: RelationshipId,
        record: &RelationshipRecord,
    ) -> KernelResult<()> {
        for endpoint in [record.start, record.end] {
            if !self.node_exists_at_commit(endpoint) {
                return Err(KernelError::EntityNotFound {
                    entity: EntityRef::Node(endpoint),
                });
            }
        }
        self.commands.push(StorageCommand::RelationshipCreate {
            id,
            record: *record,
        });
        Ok(())
    }

    fn visit_relationship_property_changes(
        &mut self,
        id: RelationshipId,
        changes: &PropertyChanges,
    ) -> KernelResult<()> {
        let (set, removed) = property_lists(changes);
        self.commands
            .push(StorageCommand::RelationshipProperties { id, set, removed });
        Ok(())
    }

    fn visit_deleted_relationship(&mut self, id: RelationshipId) -> KernelResult<()> {
        self.commands.push(StorageCommand::RelationshipDelete { id });
        Ok(())
    }

    fn visit_deleted_node(&mut self, id: NodeId) -> KernelResult<()> {
        let committed = self
            .reader
            .node_relationships(id)
            .into_iter()
            .any(|rel| !self.tx_state.relationship_is_deleted_in_this_tx(rel));
        let created = self
            .tx_state
            .added_and_removed_relationships()
            .added()
            .filter_map(|rel| self.tx_state.created_relationship(*rel))
            .any(|record| record.start == id || record.end == id);
        if committed || created {
            return Err(KernelError::invalid_operation(format!(
                "cannot delete {id} because it still has relationships"
            )));
        }
        self.commands.push(StorageCommand::NodeDelete { id });
        Ok(())
    }

    fn visit_added_index(&mut self, index: &IndexDescriptor) -> KernelResult<()> {
        self.commands.push(StorageCommand::IndexCreate(index.clone()));
        Ok(())
    }

    fn visit_removed_index(&mut self, index: &IndexDescriptor) -> KernelResult<()> {
        self.commands.push(StorageCommand::IndexDrop(index.clone()));
        Ok(())
    }

    fn visit_added_constraint(&mut self, constraint: &ConstraintDescriptor) -> KernelResult<()> {
        self.commands
            .push(StorageCommand::ConstraintCreate(constraint.clone()));
        Ok(())
    }

    fn visit_removed_constraint(&mut self, constraint: &ConstraintDescriptor) -> KernelResult<()> {
        self.commands
            .push(StorageCommand::ConstraintDrop(constraint.clone()));
        Ok(())
    }

    fn visit_explicit_index_change(&mut self, change: &ExplicitIndexChange) -> KernelResult<()> {
        self.commands.push(StorageCommand::ExplicitIndex(change.clone()));
        Ok(())
    }

    fn visit_counts(&mut self, counts: &CountsRecordState) -> KernelResult<()> {
        self.commands
            .push(StorageCommand::Counts(counts.iter().collect()));
        Ok(())
    }
}
