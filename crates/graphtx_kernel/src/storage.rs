//! Interfaces to the storage layer.

use crate::apply::{StorageCommand, TransactionApplicationMode, TransactionToApply};
use crate::error::KernelResult;
use crate::locking::LockClient;
use crate::schema::{ConstraintDescriptor, IndexDescriptor, SchemaDescriptor};
use crate::state::{RelationshipRecord, TransactionState};
use crate::types::{
    EntityRef, IndexId, LabelId, NodeId, PropertyKeyId, RelationshipId, RelationshipTypeId,
    TransactionId, Value,
};
use std::sync::Arc;

/// Read access to committed data.
pub trait StorageReader: Send + Sync {
    /// Returns `true` if the node exists.
    fn node_exists(&self, id: NodeId) -> bool;

    /// Labels of a node; empty if it does not exist.
    fn node_labels(&self, id: NodeId) -> Vec<LabelId>;

    /// A node property value.
    fn node_property(&self, id: NodeId, key: PropertyKeyId) -> Option<Value>;

    /// All nodes, in id order.
    fn all_nodes(&self) -> Vec<NodeId>;

    /// Nodes carrying `label`, in id order.
    fn nodes_with_label(&self, label: LabelId) -> Vec<NodeId>;

    /// Relationships starting or ending at `node`.
    fn node_relationships(&self, node: NodeId) -> Vec<RelationshipId>;

    /// Type and endpoints of a relationship.
    fn relationship(&self, id: RelationshipId) -> Option<RelationshipRecord>;

    /// A relationship property value.
    fn relationship_property(&self, id: RelationshipId, key: PropertyKeyId) -> Option<Value>;

    /// All indexes, including constraint-backing ones.
    fn indexes(&self) -> Vec<IndexDescriptor>;

    /// All constraints.
    fn constraints(&self) -> Vec<ConstraintDescriptor>;

    /// The index over `schema`, if any.
    fn index_for_schema(&self, schema: &SchemaDescriptor) -> Option<IndexDescriptor> {
        self.indexes().into_iter().find(|i| &i.schema == schema)
    }

    /// Committed node count.
    fn node_count(&self, label: Option<LabelId>) -> i64;

    /// Committed relationship count.
    fn relationship_count(
        &self,
        start_label: Option<LabelId>,
        rel_type: Option<RelationshipTypeId>,
        end_label: Option<LabelId>,
    ) -> i64;

    /// Entities indexed under `key = value` in an explicit index.
    fn explicit_index_get(&self, index: &str, key: &str, value: &Value) -> Vec<EntityRef>;
}

/// Reserves ids for entities created by a transaction.
pub trait CommandCreationContext: Send {
    /// Reserves a node id.
    fn reserve_node(&mut self) -> NodeId;

    /// Reserves a relationship id.
    fn reserve_relationship(&mut self) -> RelationshipId;

    /// Reserves an index id.
    fn reserve_index(&mut self) -> IndexId;
}

/// The storage engine: turns transaction state into commands and applies
/// committed commands.
pub trait StorageEngine: Send + Sync {
    /// A reader over committed data.
    fn new_reader(&self) -> Arc<dyn StorageReader>;

    /// A context for reserving ids.
    fn allocate_command_creation_context(&self) -> Box<dyn CommandCreationContext>;

    /// Appends the commands that realise `tx_state` to `commands`.
    fn create_commands(
        &self,
        commands: &mut Vec<StorageCommand>,
        tx_state: &TransactionState,
        reader: &dyn StorageReader,
        locks: &dyn LockClient,
        last_committed: TransactionId,
    ) -> KernelResult<()>;

    /// Applies a batch of appended transactions.
    fn apply(&self, batch: &[TransactionToApply], mode: TransactionApplicationMode) -> KernelResult<()>;
}
