//! Per-transaction overlay of uncommitted changes.

use crate::error::KernelResult;
use crate::schema::{ConstraintDescriptor, IndexDescriptor};
use crate::state::counts::CountsRecordState;
use crate::state::diff_set::DiffSet;
use crate::types::{EntityRef, LabelId, NodeId, PropertyKeyId, RelationshipId, RelationshipTypeId, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Type and endpoints of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    /// Relationship type.
    pub rel_type: RelationshipTypeId,
    /// Start node.
    pub start: NodeId,
    /// End node.
    pub end: NodeId,
}

/// What the overlay says about one property.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyOverlay<'a> {
    /// Not touched by this transaction; read the base store.
    Unchanged,
    /// Set to this value by this transaction.
    Set(&'a Value),
    /// Removed by this transaction.
    Removed,
}

/// Property changes of one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyChanges {
    added: BTreeMap<PropertyKeyId, Value>,
    changed: BTreeMap<PropertyKeyId, Value>,
    removed: BTreeSet<PropertyKeyId>,
}

impl PropertyChanges {
    fn set(&mut self, key: PropertyKeyId, value: Value, existed_before: bool) {
        if existed_before || self.removed.remove(&key) {
            self.added.remove(&key);
            self.changed.insert(key, value);
        } else {
            self.added.insert(key, value);
        }
    }

    fn remove(&mut self, key: PropertyKeyId) {
        if self.added.remove(&key).is_none() {
            self.changed.remove(&key);
            self.removed.insert(key);
        }
    }

    /// Returns the overlay view of `key`.
    #[must_use]
    pub fn get(&self, key: PropertyKeyId) -> PropertyOverlay<'_> {
        if let Some(v) = self.added.get(&key).or_else(|| self.changed.get(&key)) {
            PropertyOverlay::Set(v)
        } else if self.removed.contains(&key) {
            PropertyOverlay::Removed
        } else {
            PropertyOverlay::Unchanged
        }
    }

    /// Properties that did not exist before this transaction.
    pub fn added(&self) -> impl Iterator<Item = (PropertyKeyId, &Value)> {
        self.added.iter().map(|(k, v)| (*k, v))
    }

    /// Properties whose existing value was overwritten.
    pub fn changed(&self) -> impl Iterator<Item = (PropertyKeyId, &Value)> {
        self.changed.iter().map(|(k, v)| (*k, v))
    }

    /// Properties that were removed.
    pub fn removed(&self) -> impl Iterator<Item = PropertyKeyId> + '_ {
        self.removed.iter().copied()
    }

    /// Returns `true` if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// A change to an explicit (manually maintained) index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExplicitIndexChange {
    /// Adds `entity` under `key = value`.
    Add {
        /// Index name.
        index: String,
        /// Indexed entity.
        entity: EntityRef,
        /// Entry key.
        key: String,
        /// Entry value.
        value: Value,
    },
    /// Removes every `key` entry of `entity`.
    Remove {
        /// Index name.
        index: String,
        /// Indexed entity.
        entity: EntityRef,
        /// Entry key.
        key: String,
    },
    /// Removes `entity` from the index entirely.
    RemoveEntity {
        /// Index name.
        index: String,
        /// Indexed entity.
        entity: EntityRef,
    },
}

impl ExplicitIndexChange {
    /// Name of the index this change targets.
    #[must_use]
    pub fn index(&self) -> &str {
        match self {
            Self::Add { index, .. } | Self::Remove { index, .. } | Self::RemoveEntity { index, .. } => {
                index
            }
        }
    }
}

/// Receives the changes of a [`TransactionState`] in a fixed order.
///
/// Every method defaults to doing nothing.
#[allow(unused_variables)]
pub trait TxStateVisitor {
    /// A node created by the transaction.
    fn visit_created_node(&mut self, id: NodeId) -> KernelResult<()> {
        Ok(())
    }

    /// Label changes of a node that survives the transaction.
    fn visit_node_label_changes(
        &mut self,
        id: NodeId,
        added: &[LabelId],
        removed: &[LabelId],
    ) -> KernelResult<()> {
        Ok(())
    }

    /// Property changes of a node that survives the transaction.
    fn visit_node_property_changes(
        &mut self,
        id: NodeId,
        changes: &PropertyChanges,
    ) -> KernelResult<()> {
        Ok(())
    }

    /// A relationship created by the transaction.
    fn visit_created_relationship(
        &mut self,
        id: RelationshipId,
        record: &RelationshipRecord,
    ) -> KernelResult<()> {
        Ok(())
    }

    /// Property changes of a relationship that survives the transaction.
    fn visit_relationship_property_changes(
        &mut self,
        id: RelationshipId,
        changes: &PropertyChanges,
    ) -> KernelResult<()> {
        Ok(())
    }

    /// A pre-existing relationship deleted by the transaction.
    fn visit_deleted_relationship(&mut self, id: RelationshipId) -> KernelResult<()> {
        Ok(())
    }

    /// A pre-existing node deleted by the transaction.
    fn visit_deleted_node(&mut self, id: NodeId) -> KernelResult<()> {
        Ok(())
    }

    /// An index created by the transaction.
    fn visit_added_index(&mut self, index: &IndexDescriptor) -> KernelResult<()> {
        Ok(())
    }

    /// An index dropped by the transaction.
    fn visit_removed_index(&mut self, index: &IndexDescriptor) -> KernelResult<()> {
        Ok(())
    }

    /// A constraint created by the transaction.
    fn visit_added_constraint(&mut self, constraint: &ConstraintDescriptor) -> KernelResult<()> {
        Ok(())
    }

    /// A constraint dropped by the transaction.
    fn visit_removed_constraint(&mut self, constraint: &ConstraintDescriptor) -> KernelResult<()> {
        Ok(())
    }

    /// An explicit index change.
    fn visit_explicit_index_change(&mut self, change: &ExplicitIndexChange) -> KernelResult<()> {
        Ok(())
    }

    /// Count deltas of the transaction.
    fn visit_counts(&mut self, counts: &CountsRecordState) -> KernelResult<()> {
        Ok(())
    }
}

/// All uncommitted changes of one transaction.
#[derive(Debug, Default)]
pub struct TransactionState {
    nodes: DiffSet<NodeId>,
    relationships: DiffSet<RelationshipId>,
    created_relationships: BTreeMap<RelationshipId, RelationshipRecord>,
    node_labels: BTreeMap<NodeId, DiffSet<LabelId>>,
    label_nodes: BTreeMap<LabelId, DiffSet<NodeId>>,
    type_relationships: BTreeMap<RelationshipTypeId, DiffSet<RelationshipId>>,
    node_properties: BTreeMap<NodeId, PropertyChanges>,
    relationship_properties: BTreeMap<RelationshipId, PropertyChanges>,
    indexes: DiffSet<IndexDescriptor>,
    constraints: DiffSet<ConstraintDescriptor>,
    explicit_index_changes: Vec<ExplicitIndexChange>,
    counts: CountsRecordState,
    data_revision: u64,
    schema_revision: u64,
}

impl TransactionState {
    /// Creates an empty transaction state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn data_changed(&mut self) {
        self.data_revision += 1;
    }

    fn schema_changed(&mut self) {
        self.schema_revision += 1;
    }

    // === Nodes ===

    /// Records creation of a node.
    pub fn node_do_create(&mut self, id: NodeId) {
        self.nodes.add(id);
        self.data_changed();
    }

    /// Records deletion of a node, dropping its pending label and property
    /// changes.
    pub fn node_do_delete(&mut self, id: NodeId) {
        self.nodes.remove(id);
        if let Some(labels) = self.node_labels.remove(&id) {
            for label in labels.added().chain(labels.removed()) {
                if let Some(nodes) = self.label_nodes.get_mut(label) {
                    nodes.remove_from_tracking(&id);
                }
            }
        }
        self.node_properties.remove(&id);
        self.data_changed();
    }

    /// Records adding `label` to `node`.
    pub fn node_do_add_label(&mut self, node: NodeId, label: LabelId) {
        self.node_labels.entry(node).or_default().add(label);
        self.label_nodes.entry(label).or_default().add(node);
        self.data_changed();
    }

    /// Records removing `label` from `node`.
    pub fn node_do_remove_label(&mut self, node: NodeId, label: LabelId) {
        self.node_labels.entry(node).or_default().remove(label);
        self.label_nodes.entry(label).or_default().remove(node);
        self.data_changed();
    }

    /// Records setting a node property. `existed_before` tells whether the
    /// base store had a value for the key.
    pub fn node_do_set_property(
        &mut self,
        node: NodeId,
        key: PropertyKeyId,
        value: Value,
        existed_before: bool,
    ) {
        self.node_properties
            .entry(node)
            .or_default()
            .set(key, value, existed_before);
        self.data_changed();
    }

    /// Records removing a node property.
    pub fn node_do_remove_property(&mut self, node: NodeId, key: PropertyKeyId) {
        self.node_properties.entry(node).or_default().remove(key);
        self.data_changed();
    }

    // === Relationships ===

    /// Records creation of a relationship.
    pub fn relationship_do_create(
        &mut self,
        id: RelationshipId,
        rel_type: RelationshipTypeId,
        start: NodeId,
        end: NodeId,
    ) {
        self.relationships.add(id);
        self.created_relationships.insert(
            id,
            RelationshipRecord {
                rel_type,
                start,
                end,
            },
        );
        self.type_relationships.entry(rel_type).or_default().add(id);
        self.data_changed();
    }

    /// Records deletion of a relationship of type `rel_type`.
    pub fn relationship_do_delete(&mut self, id: RelationshipId, rel_type: RelationshipTypeId) {
        self.relationships.remove(id);
        self.created_relationships.remove(&id);
        self.type_relationships.entry(rel_type).or_default().remove(id);
        self.relationship_properties.remove(&id);
        self.data_changed();
    }

    /// Records setting a relationship property.
    pub fn relationship_do_set_property(
        &mut self,
        rel: RelationshipId,
        key: PropertyKeyId,
        value: Value,
        existed_before: bool,
    ) {
        self.relationship_properties
            .entry(rel)
            .or_default()
            .set(key, value, existed_before);
        self.data_changed();
    }

    /// Records removing a relationship property.
    pub fn relationship_do_remove_property(&mut self, rel: RelationshipId, key: PropertyKeyId) {
        self.relationship_properties
            .entry(rel)
            .or_default()
            .remove(key);
        self.data_changed();
    }

    // === Schema ===

    /// Records creation of an index.
    pub fn index_do_add(&mut self, index: IndexDescriptor) {
        self.indexes.add(index);
        self.schema_changed();
    }

    /// Records dropping an index.
    pub fn index_do_drop(&mut self, index: IndexDescriptor) {
        self.indexes.remove(index);
        self.schema_changed();
    }

    /// Records creation of a constraint and its backing index.
    pub fn constraint_do_add(&mut self, constraint: ConstraintDescriptor) {
        self.indexes.add(constraint.backing_index());
        self.constraints.add(constraint);
        self.schema_changed();
    }

    /// Records dropping a constraint and its backing index.
    pub fn constraint_do_drop(&mut self, constraint: ConstraintDescriptor) {
        self.indexes.remove(constraint.backing_index());
        self.constraints.remove(constraint);
        self.schema_changed();
    }

    // === Explicit indexes and counts ===

    /// Records an explicit index change.
    pub fn explicit_index_do_change(&mut self, change: ExplicitIndexChange) {
        self.explicit_index_changes.push(change);
        self.data_changed();
    }

    /// Returns the count deltas for mutation.
    pub fn counts_mut(&mut self) -> &mut CountsRecordState {
        &mut self.counts
    }

    // === Reads ===

    /// Node existence changes.
    #[must_use]
    pub fn added_and_removed_nodes(&self) -> &DiffSet<NodeId> {
        &self.nodes
    }

    /// Relationship existence changes.
    #[must_use]
    pub fn added_and_removed_relationships(&self) -> &DiffSet<RelationshipId> {
        &self.relationships
    }

    /// Returns `true` if the node was created by this transaction.
    #[must_use]
    pub fn node_is_added_in_this_tx(&self, id: NodeId) -> bool {
        self.nodes.is_added(&id)
    }

    /// Returns `true` if the node existed before and was deleted.
    #[must_use]
    pub fn node_is_deleted_in_this_tx(&self, id: NodeId) -> bool {
        self.nodes.is_removed(&id)
    }

    /// Returns `true` if the relationship was created by this transaction.
    #[must_use]
    pub fn relationship_is_added_in_this_tx(&self, id: RelationshipId) -> bool {
        self.relationships.is_added(&id)
    }

    /// Returns `true` if the relationship existed before and was deleted.
    #[must_use]
    pub fn relationship_is_deleted_in_this_tx(&self, id: RelationshipId) -> bool {
        self.relationships.is_removed(&id)
    }

    /// Record of a relationship created by this transaction.
    #[must_use]
    pub fn created_relationship(&self, id: RelationshipId) -> Option<&RelationshipRecord> {
        self.created_relationships.get(&id)
    }

    /// Label changes of a node.
    #[must_use]
    pub fn node_label_diff(&self, node: NodeId) -> Option<&DiffSet<LabelId>> {
        self.node_labels.get(&node)
    }

    /// Nodes gaining or losing `label`.
    #[must_use]
    pub fn nodes_with_label_changed(&self, label: LabelId) -> Option<&DiffSet<NodeId>> {
        self.label_nodes.get(&label)
    }

    /// Relationships of `rel_type` created or deleted.
    #[must_use]
    pub fn relationships_of_type_changed(
        &self,
        rel_type: RelationshipTypeId,
    ) -> Option<&DiffSet<RelationshipId>> {
        self.type_relationships.get(&rel_type)
    }

    /// Overlay view of a node property.
    #[must_use]
    pub fn node_property(&self, node: NodeId, key: PropertyKeyId) -> PropertyOverlay<'_> {
        self.node_properties
            .get(&node)
            .map_or(PropertyOverlay::Unchanged, |c| c.get(key))
    }

    /// Overlay view of a relationship property.
    #[must_use]
    pub fn relationship_property(&self, rel: RelationshipId, key: PropertyKeyId) -> PropertyOverlay<'_> {
        self.relationship_properties
            .get(&rel)
            .map_or(PropertyOverlay::Unchanged, |c| c.get(key))
    }

    /// All property changes of a node.
    #[must_use]
    pub fn node_property_changes(&self, node: NodeId) -> Option<&PropertyChanges> {
        self.node_properties.get(&node)
    }

    /// All property changes of a relationship.
    #[must_use]
    pub fn relationship_property_changes(&self, rel: RelationshipId) -> Option<&PropertyChanges> {
        self.relationship_properties.get(&rel)
    }

    /// Index changes.
    #[must_use]
    pub fn index_diffs(&self) -> &DiffSet<IndexDescriptor> {
        &self.indexes
    }

    /// Constraint changes.
    #[must_use]
    pub fn constraint_diffs(&self) -> &DiffSet<ConstraintDescriptor> {
        &self.constraints
    }

    /// Explicit index changes in the order they were made.
    #[must_use]
    pub fn explicit_index_changes(&self) -> &[ExplicitIndexChange] {
        &self.explicit_index_changes
    }

    /// Count deltas.
    #[must_use]
    pub fn counts(&self) -> &CountsRecordState {
        &self.counts
    }

    /// Bumped on every data change.
    #[must_use]
    pub fn data_revision(&self) -> u64 {
        self.data_revision
    }

    /// Bumped on every schema change.
    #[must_use]
    pub fn schema_revision(&self) -> u64 {
        self.schema_revision
    }

    /// Returns `true` if any schema changes are pending.
    #[must_use]
    pub fn has_schema_changes(&self) -> bool {
        !self.indexes.is_empty() || !self.constraints.is_empty()
    }

    /// Returns `true` if any explicit index changes are pending.
    #[must_use]
    pub fn has_explicit_index_changes(&self) -> bool {
        !self.explicit_index_changes.is_empty()
    }

    /// Returns `true` if anything needs to be committed.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.nodes.is_empty()
            || !self.relationships.is_empty()
            || self.node_labels.values().any(|d| !d.is_empty())
            || self.node_properties.values().any(|c| !c.is_empty())
            || self.relationship_properties.values().any(|c| !c.is_empty())
            || self.has_schema_changes()
            || self.has_explicit_index_changes()
            || !self.counts.is_empty()
    }

    /// Forgets all changes.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Walks all changes in commit order.
    ///
    /// Entities created and deleted in this transaction are not visited.
    pub fn accept(&self, visitor: &mut dyn TxStateVisitor) -> KernelResult<()> {
        for &id in self.nodes.added() {
            visitor.visit_created_node(id)?;
        }

        for (&id, labels) in &self.node_labels {
            if self.nodes.is_removed(&id) || labels.is_empty() {
                continue;
            }
            let added: Vec<LabelId> = labels.added().copied().collect();
            let removed: Vec<LabelId> = labels.removed().copied().collect();
            visitor.visit_node_label_changes(id, &added, &removed)?;
        }
        for (&id, changes) in &self.node_properties {
            if !self.nodes.is_removed(&id) && !changes.is_empty() {
                visitor.visit_node_property_changes(id, changes)?;
            }
        }

        for (&id, record) in &self.created_relationships {
            visitor.visit_created_relationship(id, record)?;
        }
        for (&id, changes) in &self.relationship_properties {
            if !self.relationships.is_removed(&id) && !changes.is_empty() {
                visitor.visit_relationship_property_changes(id, changes)?;
            }
        }
        for &id in self.relationships.removed() {
            visitor.visit_deleted_relationship(id)?;
        }
        for &id in self.nodes.removed() {
            visitor.visit_deleted_node(id)?;
        }

        for index in self.indexes.added() {
            visitor.visit_added_index(index)?;
        }
        for index in self.indexes.removed() {
            visitor.visit_removed_index(index)?;
        }
        for constraint in self.constraints.added() {
            visitor.visit_added_constraint(constraint)?;
        }
        for constraint in self.constraints.removed() {
            visitor.visit_removed_constraint(constraint)?;
        }

        for change in &self.explicit_index_changes {
            visitor.visit_explicit_index_change(change)?;
        }

        if !self.counts.is_empty() {
            visitor.visit_counts(&self.counts)?;
        }
        Ok(())
    }
}
