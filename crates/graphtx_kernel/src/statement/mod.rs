//! Statements and the layered operations they run.
//!
//! Every read or write goes through a [`Statement`] borrowed from an open
//! [`KernelTransaction`]. The statement checks the transaction's status and
//! access mode, then hands the [`Operation`] to the
//! [`StatementPipeline`], whose layers (caching, locking, validation and
//! auto-indexing) wrap the state-handling core.

mod layers;
mod operation;
mod pipeline;
mod state_handling;

pub use layers::{
    AutoIndexLayer, CachingLayer, LockingLayer, ValidationLayer, NODE_AUTO_INDEX,
};
pub use operation::{Operation, OperationKind, Outcome};
pub use pipeline::{Next, StatementCache, StatementContext, StatementLayer, StatementPipeline};

use crate::error::{KernelError, KernelResult};
use crate::locking::LockClient;
use crate::schema::{ConstraintDescriptor, IndexDescriptor, SchemaDescriptor};
use crate::transaction::kernel_transaction::{TxInner, WriteState};
use crate::transaction::KernelTransaction;
use crate::types::{
    EntityRef, LabelId, NodeId, PropertyKeyId, RelationshipId, RelationshipTypeId, Value,
};
use parking_lot::MutexGuard;
use std::sync::Arc;
use tracing::debug;

/// An open statement on a transaction.
///
/// Holds the transaction's statement lock until dropped or closed, so a
/// transaction cannot be closed while a statement is open.
pub struct Statement<'t> {
    tx: &'t KernelTransaction,
    inner: MutexGuard<'t, TxInner>,
    locks: Arc<dyn LockClient>,
    closed: bool,
}

impl<'t> Statement<'t> {
    pub(crate) fn new(
        tx: &'t KernelTransaction,
        inner: MutexGuard<'t, TxInner>,
        locks: Arc<dyn LockClient>,
    ) -> Self {
        Self {
            tx,
            inner,
            locks,
            closed: false,
        }
    }

    /// Runs one operation.
    pub fn execute(&mut self, op: &Operation) -> KernelResult<Outcome> {
        let kind = op.kind();
        self.tx.assert_open()?;
        self.check_access(op, kind)?;
        self.upgrade_write_state(kind)?;

        let services = self.tx.services();
        let inner = &mut *self.inner;
        let mut ctx = StatementContext {
            tx_state: &mut inner.tx_state,
            reader: &*inner.reader,
            locks: &*self.locks,
            tracer: self.tx.lock_tracer(),
            tokens: &services.deps.tokens,
            ids: &mut *inner.ids,
            cache: &mut inner.cache,
        };
        match services.pipeline.execute(&mut ctx, op) {
            Ok(outcome) => {
                if kind.is_write() {
                    self.tx.mark_written();
                }
                Ok(outcome)
            }
            Err(err) => Err(self.tx.translate_error(err)),
        }
    }

    fn check_access(&self, op: &Operation, kind: OperationKind) -> KernelResult<()> {
        let mode = self.tx.access_mode();
        let allowed = match kind {
            OperationKind::Read => true,
            OperationKind::Write => mode.allows_writes(),
            OperationKind::SchemaWrite => mode.allows_schema_writes(),
            OperationKind::Token => mode.allows_token_creates() || self.token_exists(op),
        };
        if allowed {
            Ok(())
        } else {
            Err(KernelError::AccessModeViolation {
                mode,
                operation: op.name(),
            })
        }
    }

    fn token_exists(&self, op: &Operation) -> bool {
        let tokens = &self.tx.services().deps.tokens;
        match op {
            Operation::LabelGetOrCreate(name) => tokens.label(name).is_some(),
            Operation::PropertyKeyGetOrCreate(name) => tokens.property_key(name).is_some(),
            Operation::RelationshipTypeGetOrCreate(name) => {
                tokens.relationship_type(name).is_some()
            }
            _ => false,
        }
    }

    fn upgrade_write_state(&mut self, kind: OperationKind) -> KernelResult<()> {
        let state = &mut self.inner.write_state;
        match (kind, *state) {
            (OperationKind::Write, WriteState::Schema) => Err(KernelError::invalid_transaction_type(
                "cannot perform data updates in a transaction that has performed schema updates",
            )),
            (OperationKind::SchemaWrite, WriteState::Data) => {
                Err(KernelError::invalid_transaction_type(
                    "cannot perform schema updates in a transaction that has performed data updates",
                ))
            }
            (OperationKind::Write, _) => {
                *state = WriteState::Data;
                Ok(())
            }
            (OperationKind::SchemaWrite, _) => {
                *state = WriteState::Schema;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Returns `true` if the transaction has uncommitted changes.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.inner.tx_state.has_changes()
    }

    /// Number of schema lookups served from the statement cache.
    #[must_use]
    pub fn cache_hits(&self) -> u64 {
        self.inner.cache.hits()
    }

    /// Runs the close hooks and releases the statement.
    pub fn close(mut self) -> KernelResult<()> {
        self.run_close()
    }

    fn run_close(&mut self) -> KernelResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let services = self.tx.services();
        let inner = &mut *self.inner;
        let mut ctx = StatementContext {
            tx_state: &mut inner.tx_state,
            reader: &*inner.reader,
            locks: &*self.locks,
            tracer: self.tx.lock_tracer(),
            tokens: &services.deps.tokens,
            ids: &mut *inner.ids,
            cache: &mut inner.cache,
        };
        services.pipeline.close(&mut ctx)
    }

    // === Reads ===

    /// See [`Operation::NodeExists`].
    pub fn node_exists(&mut self, node: NodeId) -> KernelResult<bool> {
        self.execute(&Operation::NodeExists(node))?.into_bool()
    }

    /// See [`Operation::NodeGetLabels`].
    pub fn node_labels(&mut self, node: NodeId) -> KernelResult<Vec<LabelId>> {
        self.execute(&Operation::NodeGetLabels(node))?.into_labels()
    }

    /// See [`Operation::NodeHasLabel`].
    pub fn node_has_label(&mut self, node: NodeId, label: LabelId) -> KernelResult<bool> {
        self.execute(&Operation::NodeHasLabel { node, label })?
            .into_bool()
    }

    /// See [`Operation::NodeGetProperty`].
    pub fn node_property(&mut self, node: NodeId, key: PropertyKeyId) -> KernelResult<Option<Value>> {
        self.execute(&Operation::NodeGetProperty { node, key })?
            .into_property()
    }

    /// See [`Operation::NodesGetAll`].
    pub fn nodes(&mut self) -> KernelResult<Vec<NodeId>> {
        self.execute(&Operation::NodesGetAll)?.into_nodes()
    }

    /// See [`Operation::NodesGetForLabel`].
    pub fn nodes_with_label(&mut self, label: LabelId) -> KernelResult<Vec<NodeId>> {
        self.execute(&Operation::NodesGetForLabel(label))?
            .into_nodes()
    }

    /// See [`Operation::NodeGetRelationships`].
    pub fn node_relationships(&mut self, node: NodeId) -> KernelResult<Vec<RelationshipId>> {
        self.execute(&Operation::NodeGetRelationships(node))?
            .into_relationships()
    }

    /// See [`Operation::RelationshipGetProperty`].
    pub fn relationship_property(
        &mut self,
        rel: RelationshipId,
        key: PropertyKeyId,
    ) -> KernelResult<Option<Value>> {
        self.execute(&Operation::RelationshipGetProperty { rel, key })?
            .into_property()
    }

    /// See [`Operation::IndexGetForSchema`].
    pub fn index_for_schema(
        &mut self,
        schema: &SchemaDescriptor,
    ) -> KernelResult<Option<IndexDescriptor>> {
        self.execute(&Operation::IndexGetForSchema(schema.clone()))?
            .into_maybe_index()
    }

    /// See [`Operation::IndexesGetAll`].
    pub fn indexes(&mut self) -> KernelResult<Vec<IndexDescriptor>> {
        self.execute(&Operation::IndexesGetAll)?.into_indexes()
    }

    /// See [`Operation::ConstraintsGetAll`].
    pub fn constraints(&mut self) -> KernelResult<Vec<ConstraintDescriptor>> {
        self.execute(&Operation::ConstraintsGetAll)?
            .into_constraints()
    }

    /// See [`Operation::CountsForNode`].
    pub fn count_nodes(&mut self, label: Option<LabelId>) -> KernelResult<i64> {
        self.execute(&Operation::CountsForNode(label))?.into_count()
    }

    /// See [`Operation::CountsForRelationship`].
    pub fn count_relationships(
        &mut self,
        start_label: Option<LabelId>,
        rel_type: Option<RelationshipTypeId>,
        end_label: Option<LabelId>,
    ) -> KernelResult<i64> {
        self.execute(&Operation::CountsForRelationship {
            start_label,
            rel_type,
            end_label,
        })?
        .into_count()
    }

    /// See [`Operation::ExplicitIndexGet`].
    pub fn explicit_index_get(
        &mut self,
        index: &str,
        key: &str,
        value: impl Into<Value>,
    ) -> KernelResult<Vec<EntityRef>> {
        self.execute(&Operation::ExplicitIndexGet {
            index: index.to_string(),
            key: key.to_string(),
            value: value.into(),
        })?
        .into_entities()
    }

    // === Data writes ===

    /// See [`Operation::NodeCreate`].
    pub fn node_create(&mut self) -> KernelResult<NodeId> {
        self.execute(&Operation::NodeCreate)?.into_node()
    }

    /// See [`Operation::NodeDelete`].
    pub fn node_delete(&mut self, node: NodeId) -> KernelResult<()> {
        self.execute(&Operation::NodeDelete(node))?.into_unit()
    }

    /// See [`Operation::NodeAddLabel`]. Returns `false` if already present.
    pub fn node_add_label(&mut self, node: NodeId, label: LabelId) -> KernelResult<bool> {
        self.execute(&Operation::NodeAddLabel { node, label })?
            .into_bool()
    }

    /// See [`Operation::NodeRemoveLabel`]. Returns `false` if absent.
    pub fn node_remove_label(&mut self, node: NodeId, label: LabelId) -> KernelResult<bool> {
        self.execute(&Operation::NodeRemoveLabel { node, label })?
            .into_bool()
    }

    /// See [`Operation::NodeSetProperty`]. Returns the previous value.
    pub fn node_set_property(
        &mut self,
        node: NodeId,
        key: PropertyKeyId,
        value: impl Into<Value>,
    ) -> KernelResult<Option<Value>> {
        self.execute(&Operation::NodeSetProperty {
            node,
            key,
            value: value.into(),
        })?
        .into_property()
    }

    /// See [`Operation::NodeRemoveProperty`]. Returns the previous value.
    pub fn node_remove_property(
        &mut self,
        node: NodeId,
        key: PropertyKeyId,
    ) -> KernelResult<Option<Value>> {
        self.execute(&Operation::NodeRemoveProperty { node, key })?
            .into_property()
    }

    /// See [`Operation::RelationshipCreate`].
    pub fn relationship_create(
        &mut self,
        rel_type: RelationshipTypeId,
        start: NodeId,
        end: NodeId,
    ) -> KernelResult<RelationshipId> {
        self.execute(&Operation::RelationshipCreate {
            rel_type,
            start,
            end,
        })?
        .into_relationship()
    }

    /// See [`Operation::RelationshipDelete`].
    pub fn relationship_delete(&mut self, rel: RelationshipId) -> KernelResult<()> {
        self.execute(&Operation::RelationshipDelete(rel))?
            .into_unit()
    }

    /// See [`Operation::RelationshipSetProperty`]. Returns the previous value.
    pub fn relationship_set_property(
        &mut self,
        rel: RelationshipId,
        key: PropertyKeyId,
        value: impl Into<Value>,
    ) -> KernelResult<Option<Value>> {
        self.execute(&Operation::RelationshipSetProperty {
            rel,
            key,
            value: value.into(),
        })?
        .into_property()
    }

    /// See [`Operation::RelationshipRemoveProperty`]. Returns the previous
    /// value.
    pub fn relationship_remove_property(
        &mut self,
        rel: RelationshipId,
        key: PropertyKeyId,
    ) -> KernelResult<Option<Value>> {
        self.execute(&Operation::RelationshipRemoveProperty { rel, key })?
            .into_property()
    }

    /// See [`Operation::NodeExplicitIndexAdd`].
    pub fn node_explicit_index_add(
        &mut self,
        index: &str,
        node: NodeId,
        key: &str,
        value: impl Into<Value>,
    ) -> KernelResult<()> {
        self.execute(&Operation::NodeExplicitIndexAdd {
            index: index.to_string(),
            node,
            key: key.to_string(),
            value: value.into(),
        })?
        .into_unit()
    }

    /// See [`Operation::NodeExplicitIndexRemove`].
    pub fn node_explicit_index_remove(
        &mut self,
        index: &str,
        node: NodeId,
        key: &str,
    ) -> KernelResult<()> {
        self.execute(&Operation::NodeExplicitIndexRemove {
            index: index.to_string(),
            node,
            key: key.to_string(),
        })?
        .into_unit()
    }

    // === Tokens ===

    /// See [`Operation::LabelGetOrCreate`].
    pub fn label_get_or_create(&mut self, name: &str) -> KernelResult<LabelId> {
        self.execute(&Operation::LabelGetOrCreate(name.to_string()))?
            .into_label()
    }

    /// See [`Operation::PropertyKeyGetOrCreate`].
    pub fn property_key_get_or_create(&mut self, name: &str) -> KernelResult<PropertyKeyId> {
        self.execute(&Operation::PropertyKeyGetOrCreate(name.to_string()))?
            .into_property_key()
    }

    /// See [`Operation::RelationshipTypeGetOrCreate`].
    pub fn relationship_type_get_or_create(
        &mut self,
        name: &str,
    ) -> KernelResult<RelationshipTypeId> {
        self.execute(&Operation::RelationshipTypeGetOrCreate(name.to_string()))?
            .into_relationship_type()
    }

    // === Schema writes ===

    /// See [`Operation::IndexCreate`].
    pub fn index_create(&mut self, schema: SchemaDescriptor) -> KernelResult<IndexDescriptor> {
        self.execute(&Operation::IndexCreate(schema))?.into_index()
    }

    /// See [`Operation::IndexDrop`].
    pub fn index_drop(&mut self, schema: SchemaDescriptor) -> KernelResult<()> {
        self.execute(&Operation::IndexDrop(schema))?.into_unit()
    }

    /// See [`Operation::UniquenessConstraintCreate`].
    pub fn uniqueness_constraint_create(
        &mut self,
        schema: SchemaDescriptor,
    ) -> KernelResult<ConstraintDescriptor> {
        self.execute(&Operation::UniquenessConstraintCreate(schema))?
            .into_constraint()
    }

    /// See [`Operation::ConstraintDrop`].
    pub fn constraint_drop(&mut self, schema: SchemaDescriptor) -> KernelResult<()> {
        self.execute(&Operation::ConstraintDrop(schema))?
            .into_unit()
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.run_close() {
            debug!(error = %err, "statement close hook failed");
        }
    }
}
