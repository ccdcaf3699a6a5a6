//! In-memory committed graph.

use crate::apply::StorageCommand;
use crate::error::{KernelError, KernelResult};
use crate::schema::{ConstraintDescriptor, IndexDescriptor};
use crate::state::{CountsKey, CountsRecordState, Difference, ExplicitIndexChange, RelationshipRecord};
use crate::storage::{CommandCreationContext, StorageReader};
use crate::transaction::PageCursorTracer;
use crate::types::{
    EntityRef, IndexId, LabelId, NodeId, PropertyKeyId, RelationshipId, RelationshipTypeId, Value,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
struct NodeRecord {
    labels: BTreeSet<LabelId>,
    properties: BTreeMap<PropertyKeyId, Value>,
}

#[derive(Debug, Clone)]
struct RelationshipEntry {
    record: RelationshipRecord,
    properties: BTreeMap<PropertyKeyId, Value>,
}

#[derive(Debug, Clone)]
struct ExplicitEntry {
    entity: EntityRef,
    key: String,
    value: Value,
}

#[derive(Debug, Default)]
struct GraphData {
    nodes: BTreeMap<NodeId, NodeRecord>,
    relationships: BTreeMap<RelationshipId, RelationshipEntry>,
    indexes: BTreeMap<IndexId, IndexDescriptor>,
    constraints: Vec<ConstraintDescriptor>,
    explicit_indexes: BTreeMap<String, Vec<ExplicitEntry>>,
    counts: CountsRecordState,
}

impl GraphData {
    fn node_mut(&mut self, id: NodeId) -> KernelResult<&mut NodeRecord> {
        self.nodes.get_mut(&id).ok_or(KernelError::EntityNotFound {
            entity: EntityRef::Node(id),
        })
    }

    fn relationship_mut(&mut self, id: RelationshipId) -> KernelResult<&mut RelationshipEntry> {
        self.relationships
            .get_mut(&id)
            .ok_or(KernelError::EntityNotFound {
                entity: EntityRef::Relationship(id),
            })
    }

    fn has_relationships(&self, node: NodeId) -> bool {
        self.relationships
            .values()
            .any(|r| r.record.start == node || r.record.end == node)
    }

    fn apply_explicit(&mut self, change: &ExplicitIndexChange) {
        match change {
            ExplicitIndexChange::Add {
                index,
                entity,
                key,
                value,
            } => {
                let entries = self.explicit_indexes.entry(index.clone()).or_default();
                let present = entries
                    .iter()
                    .any(|e| e.entity == *entity && e.key == *key && e.value == *value);
                if !present {
                    entries.push(ExplicitEntry {
                        entity: *entity,
                        key: key.clone(),
                        value: value.clone(),
                    });
                }
            }
            ExplicitIndexChange::Remove { index, entity, key } => {
                if let Some(entries) = self.explicit_indexes.get_mut(index) {
                    entries.retain(|e| !(e.entity == *entity && e.key == *key));
                }
            }
            ExplicitIndexChange::RemoveEntity { index, entity } => {
                if let Some(entries) = self.explicit_indexes.get_mut(index) {
                    entries.retain(|e| e.entity != *entity);
                }
            }
        }
    }
}

fn apply_properties(
    properties: &mut BTreeMap<PropertyKeyId, Value>,
    set: &[(PropertyKeyId, Value)],
    removed: &[PropertyKeyId],
) {
    for (key, value) in set {
        properties.insert(*key, value.clone());
    }
    for key in removed {
        properties.remove(key);
    }
}

/// The committed graph: records, schema, explicit indexes and counts.
///
/// Reads see every applied command immediately. Also acts as the page
/// cursor tracer: record lookups that find something count as hits, misses
/// count as faults.
#[derive(Debug, Default)]
pub struct GraphStore {
    data: RwLock<GraphData>,
    next_node: AtomicU64,
    next_relationship: AtomicU64,
    next_index: AtomicU64,
    page_hits: AtomicU64,
    page_faults: AtomicU64,
}

impl GraphStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a node id.
    pub fn reserve_node_id(&self) -> NodeId {
        NodeId::new(self.next_node.fetch_add(1, Ordering::SeqCst))
    }

    /// Reserves a relationship id.
    pub fn reserve_relationship_id(&self) -> RelationshipId {
        RelationshipId::new(self.next_relationship.fetch_add(1, Ordering::SeqCst))
    }

    /// Reserves an index id.
    pub fn reserve_index_id(&self) -> IndexId {
        IndexId::new(self.next_index.fetch_add(1, Ordering::SeqCst))
    }

    fn trace<T>(&self, found: Option<T>) -> Option<T> {
        let counter = if found.is_some() {
            &self.page_hits
        } else {
            &self.page_faults
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Applies one command.
    ///
    /// Ids created by replayed commands also advance the id reservations.
    pub fn apply(&self, command: &StorageCommand) -> KernelResult<()> {
        let mut data = self.data.write();
        match command {
            StorageCommand::NodeCreate { id } => {
                self.next_node.fetch_max(id.as_u64() + 1, Ordering::SeqCst);
                data.nodes.insert(*id, NodeRecord::default());
            }
            StorageCommand::NodeDelete { id } => {
                if data.has_relationships(*id) {
                    return Err(KernelError::invalid_operation(format!(
                        "cannot delete {id} because it still has relationships"
                    )));
                }
                if data.nodes.remove(id).is_none() {
                    return Err(KernelError::EntityNotFound {
                        entity: EntityRef::Node(*id),
                    });
                }
            }
            StorageCommand::NodeLabels { id, added, removed } => {
                let node = data.node_mut(*id)?;
                node.labels.extend(added.iter().copied());
                for label in removed {
                    node.labels.remove(label);
                }
            }
            StorageCommand::NodeProperties { id, set, removed } => {
                apply_properties(&mut data.node_mut(*id)?.properties, set, removed);
            }
            StorageCommand::RelationshipCreate { id, record } => {
                for endpoint in [record.start, record.end] {
                    if !data.nodes.contains_key(&endpoint) {
                        return Err(KernelError::EntityNotFound {
                            entity: EntityRef::Node(endpoint),
                        });
                    }
                }
                self.next_relationship
                    .fetch_max(id.as_u64() + 1, Ordering::SeqCst);
                data.relationships.insert(
                    *id,
                    RelationshipEntry {
                        record: *record,
                        properties: BTreeMap::new(),
                    },
                );
            }
            StorageCommand::RelationshipDelete { id } => {
                if data.relationships.remove(id).is_none() {
                    return Err(KernelError::EntityNotFound {
                        entity: EntityRef::Relationship(*id),
                    });
                }
            }
            StorageCommand::RelationshipProperties { id, set, removed } => {
                apply_properties(&mut data.relationship_mut(*id)?.properties, set, removed);
            }
            StorageCommand::IndexCreate(index) => {
                self.next_index
                    .fetch_max(index.id.as_u64() + 1, Ordering::SeqCst);
                data.indexes.insert(index.id, index.clone());
            }
            StorageCommand::IndexDrop(index) => {
                data.indexes.remove(&index.id);
            }
            StorageCommand::ConstraintCreate(constraint) => {
                let backing = constraint.backing_index();
                self.next_index
                    .fetch_max(backing.id.as_u64() + 1, Ordering::SeqCst);
                data.indexes.insert(backing.id, backing);
                data.constraints.push(constraint.clone());
            }
            StorageCommand::ConstraintDrop(constraint) => {
                data.indexes.remove(&constraint.owned_index);
                data.constraints.retain(|c| c != constraint);
            }
            StorageCommand::ExplicitIndex(change) => data.apply_explicit(change),
            StorageCommand::Counts(deltas) => {
                for (key, delta) in deltas {
                    data.counts.increment(*key, *delta);
                }
            }
        }
        Ok(())
    }

    /// Number of committed nodes.
    #[must_use]
    pub fn node_total(&self) -> usize {
        self.data.read().nodes.len()
    }

    /// Number of committed relationships.
    #[must_use]
    pub fn relationship_total(&self) -> usize {
        self.data.read().relationships.len()
    }

    /// The stored counts.
    #[must_use]
    pub fn counts(&self) -> CountsRecordState {
        self.data.read().counts.clone()
    }

    /// Counts computed from the records themselves.
    #[must_use]
    pub fn recount(&self) -> CountsRecordState {
        let data = self.data.read();
        let mut counts = CountsRecordState::new();
        for node in data.nodes.values() {
            counts.increment_node_count(None, 1);
            for &label in &node.labels {
                counts.increment_node_count(Some(label), 1);
            }
        }
        let labels_of = |id: NodeId| -> Vec<LabelId> {
            data.nodes
                .get(&id)
                .map(|n| n.labels.iter().copied().collect())
                .unwrap_or_default()
        };
        for rel in data.relationships.values() {
            let record = rel.record;
            counts.increment_relationship(
                record.rel_type,
                &labels_of(record.start),
                &labels_of(record.end),
                1,
            );
        }
        counts
    }

    /// Compares the stored counts with a recount.
    ///
    /// The recount is the expected side of each [`Difference`].
    #[must_use]
    pub fn verify_counts(&self) -> Vec<Difference> {
        self.recount().verify(&self.counts())
    }
}

impl StorageReader for GraphStore {
    fn node_exists(&self, id: NodeId) -> bool {
        self.trace(self.data.read().nodes.get(&id).map(|_| ()))
            .is_some()
    }

    fn node_labels(&self, id: NodeId) -> Vec<LabelId> {
        self.trace(
            self.data
                .read()
                .nodes
                .get(&id)
                .map(|n| n.labels.iter().copied().collect()),
        )
        .unwrap_or_default()
    }

    fn node_property(&self, id: NodeId, key: PropertyKeyId) -> Option<Value> {
        let data = self.data.read();
        let node = self.trace(data.nodes.get(&id))?;
        node.properties.get(&key).cloned()
    }

    fn all_nodes(&self) -> Vec<NodeId> {
        self.data.read().nodes.keys().copied().collect()
    }

    fn nodes_with_label(&self, label: LabelId) -> Vec<NodeId> {
        self.data
            .read()
            .nodes
            .iter()
            .filter(|(_, n)| n.labels.contains(&label))
            .map(|(id, _)| *id)
            .collect()
    }

    fn node_relationships(&self, node: NodeId) -> Vec<RelationshipId> {
        self.data
            .read()
            .relationships
            .iter()
            .filter(|(_, r)| r.record.start == node || r.record.end == node)
            .map(|(id, _)| *id)
            .collect()
    }

    fn relationship(&self, id: RelationshipId) -> Option<RelationshipRecord> {
        self.trace(self.data.read().relationships.get(&id).map(|r| r.record))
    }

    fn relationship_property(&self, id: RelationshipId, key: PropertyKeyId) -> Option<Value> {
        let data = self.data.read();
        let rel = self.trace(data.relationships.get(&id))?;
        rel.properties.get(&key).cloned()
    }

    fn indexes(&self) -> Vec<IndexDescriptor> {
        self.data.read().indexes.values().cloned().collect()
    }

    fn constraints(&self) -> Vec<ConstraintDescriptor> {
        self.data.read().constraints.clone()
    }

    fn node_count(&self, label: Option<LabelId>) -> i64 {
        self.data.read().counts.node_count(label)
    }

    fn relationship_count(
        &self,
        start_label: Option<LabelId>,
        rel_type: Option<RelationshipTypeId>,
        end_label: Option<LabelId>,
    ) -> i64 {
        self.data
            .read()
            .counts
            .get(&CountsKey::relationship(start_label, rel_type, end_label))
    }

    fn explicit_index_get(&self, index: &str, key: &str, value: &Value) -> Vec<EntityRef> {
        let data = self.data.read();
        let mut hits = Vec::new();
        for entry in data.explicit_indexes.get(index).into_iter().flatten() {
            if entry.key == key && entry.value == *value && !hits.contains(&entry.entity) {
                hits.push(entry.entity);
            }
        }
        hits
    }
}

impl PageCursorTracer for GraphStore {
    fn hits(&self) -> u64 {
        self.page_hits.load(Ordering::Relaxed)
    }

    fn faults(&self) -> u64 {
        self.page_faults.load(Ordering::Relaxed)
    }
}

/// Reserves ids from a shared [`GraphStore`].
#[derive(Debug, Clone)]
pub struct StoreIdReservations {
    store: Arc<GraphStore>,
}

impl StoreIdReservations {
    /// Reserves from `store`.
    #[must_use]
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self { store }
    }
}

impl CommandCreationContext for StoreIdReservations {
    fn reserve_node(&mut self) -> NodeId {
        self.store.reserve_node_id()
    }

    fn reserve_relationship(&mut self) -> RelationshipId {
        self.store.reserve_relationship_id()
    }

    fn reserve_index(&mut self) -> IndexId {
        self.store.reserve_index_id()
    }
}
