//! The innermost statement layer: reads merge committed data with the
//! transaction state, writes go into the transaction state.

use crate::error::{KernelError, KernelResult};
use crate::schema::{ConstraintDescriptor, IndexDescriptor, SchemaDescriptor};
use crate::state::{ExplicitIndexChange, PropertyOverlay, RelationshipRecord};
use crate::statement::operation::{Operation, Outcome};
use crate::statement::pipeline::StatementContext;
use crate::types::{
    EntityRef, LabelId, NodeId, PropertyKeyId, RelationshipId, Value,
};

/// Runs `op` against the transaction state.
pub(crate) fn execute(ctx: &mut StatementContext<'_>, op: &Operation) -> KernelResult<Outcome> {
    match op {
        Operation::NodeExists(node) => Ok(Outcome::Bool(node_exists(ctx, *node))),
        Operation::NodeGetLabels(node) => {
            require_node(ctx, *node)?;
            Ok(Outcome::Labels(node_labels(ctx, *node)))
        }
        Operation::NodeHasLabel { node, label } => {
            require_node(ctx, *node)?;
            Ok(Outcome::Bool(node_labels(ctx, *node).contains(label)))
        }
        Operation::NodeGetProperty { node, key } => {
            require_node(ctx, *node)?;
            Ok(Outcome::Property(node_property(ctx, *node, *key)))
        }
        Operation::NodesGetAll => {
            let nodes = ctx
                .tx_state
                .added_and_removed_nodes()
                .apply(ctx.reader.all_nodes())
                .collect();
            Ok(Outcome::Nodes(nodes))
        }
        Operation::NodesGetForLabel(label) => Ok(Outcome::Nodes(nodes_with_label(ctx, *label))),
        Operation::NodeGetRelationships(node) => {
            require_node(ctx, *node)?;
            Ok(Outcome::Relationships(node_relationships(ctx, *node)))
        }
        Operation::RelationshipGetProperty { rel, key } => {
            require_relationship(ctx, *rel)?;
            Ok(Outcome::Property(relationship_property(ctx, *rel, *key)))
        }
        Operation::IndexGetForSchema(schema) => {
            Ok(Outcome::MaybeIndex(index_for_schema(ctx, schema)))
        }
        Operation::IndexesGetAll => Ok(Outcome::Indexes(
            ctx.tx_state
                .index_diffs()
                .apply(ctx.reader.indexes())
                .collect(),
        )),
        Operation::ConstraintsGetAll => Ok(Outcome::Constraints(
            ctx.tx_state
                .constraint_diffs()
                .apply(ctx.reader.constraints())
                .collect(),
        )),
        Operation::CountsForNode(label) => Ok(Outcome::Count(
            ctx.reader.node_count(*label) + ctx.tx_state.counts().node_count(*label),
        )),
        Operation::CountsForRelationship {
            start_label,
            rel_type,
            end_label,
        } => Ok(Outcome::Count(
            ctx.reader
                .relationship_count(*start_label, *rel_type, *end_label)
                + ctx
                    .tx_state
                    .counts()
                    .relationship_count(*start_label, *rel_type, *end_label),
        )),
        Operation::ExplicitIndexGet { index, key, value } => {
            Ok(Outcome::Entities(explicit_index_get(ctx, index, key, value)))
        }

        Operation::NodeCreate => {
            let id = ctx.ids.reserve_node();
            ctx.tx_state.node_do_create(id);
            ctx.tx_state.counts_mut().increment_node_count(None, 1);
            Ok(Outcome::Node(id))
        }
        Operation::NodeDelete(node) => node_delete(ctx, *node).map(|()| Outcome::Unit),
        Operation::NodeAddLabel { node, label } => {
            node_change_label(ctx, *node, *label, true).map(Outcome::Bool)
        }
        Operation::NodeRemoveLabel { node, label } => {
            node_change_label(ctx, *node, *label, false).map(Outcome::Bool)
        }
        Operation::NodeSetProperty { node, key, value } => {
            require_node(ctx, *node)?;
            let previous = node_property(ctx, *node, *key);
            let existed_before = !ctx.tx_state.node_is_added_in_this_tx(*node)
                && ctx.reader.node_property(*node, *key).is_some();
            ctx.tx_state
                .node_do_set_property(*node, *key, value.clone(), existed_before);
            Ok(Outcome::Property(previous))
        }
        Operation::NodeRemoveProperty { node, key } => {
            require_node(ctx, *node)?;
            let previous = node_property(ctx, *node, *key);
            if previous.is_some() {
                ctx.tx_state.node_do_remove_property(*node, *key);
            }
            Ok(Outcome::Property(previous))
        }
        Operation::RelationshipCreate {
            rel_type,
            start,
            end,
        } => {
            require_node(ctx, *start)?;
            require_node(ctx, *end)?;
            let id = ctx.ids.reserve_relationship();
            ctx.tx_state
                .relationship_do_create(id, *rel_type, *start, *end);
            let record = RelationshipRecord {
                rel_type: *rel_type,
                start: *start,
                end: *end,
            };
            adjust_relationship_counts(ctx, &record, 1);
            Ok(Outcome::Relationship(id))
        }
        Operation::RelationshipDelete(rel) => {
            let record = require_relationship(ctx, *rel)?;
            adjust_relationship_counts(ctx, &record, -1);
            ctx.tx_state.relationship_do_delete(*rel, record.rel_type);
            Ok(Outcome::Unit)
        }
        Operation::RelationshipSetProperty { rel, key, value } => {
            require_relationship(ctx, *rel)?;
            let previous = relationship_property(ctx, *rel, *key);
            let existed_before = !ctx.tx_state.relationship_is_added_in_this_tx(*rel)
                && ctx.reader.relationship_property(*rel, *key).is_some();
            ctx.tx_state
                .relationship_do_set_property(*rel, *key, value.clone(), existed_before);
            Ok(Outcome::Property(previous))
        }
        Operation::RelationshipRemoveProperty { rel, key } => {
            require_relationship(ctx, *rel)?;
            let previous = relationship_property(ctx, *rel, *key);
            if previous.is_some() {
                ctx.tx_state.relationship_do_remove_property(*rel, *key);
            }
            Ok(Outcome::Property(previous))
        }
        Operation::NodeExplicitIndexAdd {
            index,
            node,
            key,
            value,
        } => {
            require_node(ctx, *node)?;
            ctx.tx_state
                .explicit_index_do_change(ExplicitIndexChange::Add {
                    index: index.clone(),
                    entity: EntityRef::Node(*node),
                    key: key.clone(),
                    value: value.clone(),
                });
            Ok(Outcome::Unit)
        }
        Operation::NodeExplicitIndexRemove { index, node, key } => {
            require_node(ctx, *node)?;
            ctx.tx_state
                .explicit_index_do_change(ExplicitIndexChange::Remove {
                    index: index.clone(),
                    entity: EntityRef::Node(*node),
                    key: key.clone(),
                });
            Ok(Outcome::Unit)
        }

        Operation::LabelGetOrCreate(name) => {
            ctx.tokens.label_get_or_create(name).map(Outcome::Label)
        }
        Operation::PropertyKeyGetOrCreate(name) => ctx
            .tokens
            .property_key_get_or_create(name)
            .map(Outcome::PropertyKey),
        Operation::RelationshipTypeGetOrCreate(name) => ctx
            .tokens
            .relationship_type_get_or_create(name)
            .map(Outcome::RelationshipType),

        Operation::IndexCreate(schema) => {
            let index = IndexDescriptor::general(ctx.ids.reserve_index(), schema.clone());
            ctx.tx_state.index_do_add(index.clone());
            Ok(Outcome::Index(index))
        }
        Operation::IndexDrop(schema) => {
            let index = index_for_schema(ctx, schema).ok_or_else(|| KernelError::NoSuchIndex {
                schema: schema.clone(),
            })?;
            ctx.tx_state.index_do_drop(index);
            Ok(Outcome::Unit)
        }
        Operation::UniquenessConstraintCreate(schema) => {
            let constraint =
                ConstraintDescriptor::uniqueness(schema.clone(), ctx.ids.reserve_index());
            ctx.tx_state.constraint_do_add(constraint.clone());
            Ok(Outcome::Constraint(constraint))
        }
        Operation::ConstraintDrop(schema) => {
            let constraint =
                constraint_for_schema(ctx, schema).ok_or_else(|| KernelError::NoSuchConstraint {
                    schema: schema.clone(),
                })?;
            ctx.tx_state.constraint_do_drop(constraint);
            Ok(Outcome::Unit)
        }
    }
}

// === Reads ===

fn node_exists(ctx: &StatementContext<'_>, node: NodeId) -> bool {
    let tx = &*ctx.tx_state;
    if tx.node_is_added_in_this_tx(node) {
        return true;
    }
    !tx.node_is_deleted_in_this_tx(node) && ctx.reader.node_exists(node)
}

fn require_node(ctx: &StatementContext<'_>, node: NodeId) -> KernelResult<()> {
    if node_exists(ctx, node) {
        Ok(())
    } else {
        Err(KernelError::EntityNotFound {
            entity: EntityRef::Node(node),
        })
    }
}

fn relationship_record(ctx: &StatementContext<'_>, rel: RelationshipId) -> Option<RelationshipRecord> {
    let tx = &*ctx.tx_state;
    if tx.relationship_is_deleted_in_this_tx(rel) {
        return None;
    }
    tx.created_relationship(rel)
        .copied()
        .or_else(|| ctx.reader.relationship(rel))
}

fn require_relationship(
    ctx: &StatementContext<'_>,
    rel: RelationshipId,
) -> KernelResult<RelationshipRecord> {
    relationship_record(ctx, rel).ok_or(KernelError::EntityNotFound {
        entity: EntityRef::Relationship(rel),
    })
}

fn node_labels(ctx: &StatementContext<'_>, node: NodeId) -> Vec<LabelId> {
    let base = if ctx.tx_state.node_is_added_in_this_tx(node) {
        Vec::new()
    } else {
        ctx.reader.node_labels(node)
    };
    match ctx.tx_state.node_label_diff(node) {
        Some(diff) => diff.apply(base).collect(),
        None => base,
    }
}

fn node_property(ctx: &StatementContext<'_>, node: NodeId, key: PropertyKeyId) -> Option<Value> {
    match ctx.tx_state.node_property(node, key) {
        PropertyOverlay::Set(value) => Some(value.clone()),
        PropertyOverlay::Removed => None,
        PropertyOverlay::Unchanged if ctx.tx_state.node_is_added_in_this_tx(node) => None,
        PropertyOverlay::Unchanged => ctx.reader.node_property(node, key),
    }
}

fn relationship_property(
    ctx: &StatementContext<'_>,
    rel: RelationshipId,
    key: PropertyKeyId,
) -> Option<Value> {
    match ctx.tx_state.relationship_property(rel, key) {
        PropertyOverlay::Set(value) => Some(value.clone()),
        PropertyOverlay::Removed => None,
        PropertyOverlay::Unchanged if ctx.tx_state.relationship_is_added_in_this_tx(rel) => None,
        PropertyOverlay::Unchanged => ctx.reader.relationship_property(rel, key),
    }
}

fn nodes_with_label(ctx: &StatementContext<'_>, label: LabelId) -> Vec<NodeId> {
    let tx = &*ctx.tx_state;
    let base = ctx
        .reader
        .nodes_with_label(label)
        .into_iter()
        .filter(|n| !tx.node_is_deleted_in_this_tx(*n));
    match tx.nodes_with_label_changed(label) {
        Some(diff) => diff.apply(base).collect(),
        None => base.collect(),
    }
}

fn node_relationships(ctx: &StatementContext<'_>, node: NodeId) -> Vec<RelationshipId> {
    let tx = &*ctx.tx_state;
    let base = if tx.node_is_added_in_this_tx(node) {
        Vec::new()
    } else {
        ctx.reader.node_relationships(node)
    };
    let mut rels: Vec<RelationshipId> = base
        .into_iter()
        .filter(|r| !tx.relationship_is_deleted_in_this_tx(*r))
        .collect();
    rels.extend(
        tx.added_and_removed_relationships()
            .added()
            .copied()
            .filter(|r| {
                tx.created_relationship(*r)
                    .is_some_and(|rec| rec.start == node || rec.end == node)
            }),
    );
    rels
}

/// The index over `schema` as seen by this transaction.
pub(crate) fn index_for_schema(
    ctx: &StatementContext<'_>,
    schema: &SchemaDescriptor,
) -> Option<IndexDescriptor> {
    let diffs = ctx.tx_state.index_diffs();
    if let Some(added) = diffs.added().find(|i| &i.schema == schema) {
        return Some(added.clone());
    }
    ctx.reader
        .index_for_schema(schema)
        .filter(|i| !diffs.is_removed(i))
}

/// The constraint over `schema` as seen by this transaction.
pub(crate) fn constraint_for_schema(
    ctx: &StatementContext<'_>,
    schema: &SchemaDescriptor,
) -> Option<ConstraintDescriptor> {
    ctx.tx_state
        .constraint_diffs()
        .apply(ctx.reader.constraints())
        .find(|c| &c.schema == schema)
}

fn explicit_index_get(
    ctx: &StatementContext<'_>,
    index: &str,
    key: &str,
    value: &Value,
) -> Vec<EntityRef> {
    let mut hits = ctx.reader.explicit_index_get(index, key, value);
    for change in ctx.tx_state.explicit_index_changes() {
        if change.index() != index {
            continue;
        }
        match change {
            ExplicitIndexChange::Add {
                entity,
                key: k,
                value: v,
                ..
            } if k == key && v == value => {
                if !hits.contains(entity) {
                    hits.push(*entity);
                }
            }
            ExplicitIndexChange::Remove { entity, key: k, .. } if k == key => {
                hits.retain(|e| e != entity);
            }
            ExplicitIndexChange::RemoveEntity { entity, .. } => hits.retain(|e| e != entity),
            _ => {}
        }
    }
    let tx = &*ctx.tx_state;
    hits.retain(|e| match e {
        EntityRef::Node(n) => !tx.node_is_deleted_in_this_tx(*n),
        EntityRef::Relationship(r) => !tx.relationship_is_deleted_in_this_tx(*r),
    });
    hits
}

// === Writes ===

fn node_delete(ctx: &mut StatementContext<'_>, node: NodeId) -> KernelResult<()> {
    require_node(ctx, node)?;
    if !node_relationships(ctx, node).is_empty() {
        return Err(KernelError::invalid_operation(format!(
            "cannot delete {node} because it still has relationships"
        )));
    }
    let labels = node_labels(ctx, node);
    let counts = ctx.tx_state.counts_mut();
    counts.increment_node_count(None, -1);
    for label in labels {
        counts.increment_node_count(Some(label), -1);
    }
    ctx.tx_state.node_do_delete(node);
    Ok(())
}

fn node_change_label(
    ctx: &mut StatementContext<'_>,
    node: NodeId,
    label: LabelId,
    add: bool,
) -> KernelResult<bool> {
    require_node(ctx, node)?;
    let has_label = node_labels(ctx, node).contains(&label);
    if has_label == add {
        return Ok(false);
    }
    let delta = if add { 1 } else { -1 };
    let rels: Vec<RelationshipRecord> = node_relationships(ctx, node)
        .into_iter()
        .filter_map(|r| relationship_record(ctx, r))
        .collect();
    if add {
        ctx.tx_state.node_do_add_label(node, label);
    } else {
        ctx.tx_state.node_do_remove_label(node, label);
    }
    let counts = ctx.tx_state.counts_mut();
    counts.increment_node_count(Some(label), delta);
    for rec in rels {
        if rec.start == node {
            counts.increment_relationship_count(Some(label), Some(rec.rel_type), None, delta);
            counts.increment_relationship_count(Some(label), None, None, delta);
        }
        if rec.end == node {
            counts.increment_relationship_count(None, Some(rec.rel_type), Some(label), delta);
            counts.increment_relationship_count(None, None, Some(label), delta);
        }
    }
    Ok(true)
}

fn adjust_relationship_counts(ctx: &mut StatementContext<'_>, rec: &RelationshipRecord, delta: i64) {
    let start_labels = node_labels(ctx, rec.start);
    let end_labels = node_labels(ctx, rec.end);
    ctx.tx_state
        .counts_mut()
        .increment_relationship(rec.rel_type, &start_labels, &end_labels, delta);
}
