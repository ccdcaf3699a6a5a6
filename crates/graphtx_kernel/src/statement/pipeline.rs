//! Statement layers and the pipeline that runs them.

use crate::config::KernelConfig;
use crate::error::KernelResult;
use crate::locking::{LockClient, LockTracer};
use crate::schema::{IndexDescriptor, SchemaDescriptor};
use crate::state::TransactionState;
use crate::statement::layers::{AutoIndexLayer, CachingLayer, LockingLayer, ValidationLayer};
use crate::statement::operation::{Operation, OperationKind, Outcome};
use crate::statement::state_handling;
use crate::storage::{CommandCreationContext, StorageReader};
use crate::tokens::TokenRegistry;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-transaction cache of schema lookups.
///
/// Cleared on schema writes and when the statement closes.
#[derive(Debug, Default)]
pub struct StatementCache {
    indexes: HashMap<SchemaDescriptor, Option<IndexDescriptor>>,
    hits: u64,
}

impl StatementCache {
    /// Cached index lookup for `schema`.
    pub fn index(&mut self, schema: &SchemaDescriptor) -> Option<Option<IndexDescriptor>> {
        let cached = self.indexes.get(schema).cloned();
        if cached.is_some() {
            self.hits += 1;
        }
        cached
    }

    /// Caches an index lookup.
    pub fn put_index(&mut self, schema: SchemaDescriptor, index: Option<IndexDescriptor>) {
        self.indexes.insert(schema, index);
    }

    /// Number of lookups answered from the cache.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Drops every cached entry.
    pub fn clear(&mut self) {
        self.indexes.clear();
    }
}

/// Everything an operation may touch.
pub struct StatementContext<'a> {
    /// The transaction's uncommitted changes.
    pub tx_state: &'a mut TransactionState,
    /// Committed data.
    pub reader: &'a dyn StorageReader,
    /// The transaction's lock client.
    pub locks: &'a dyn LockClient,
    /// Receives lock waits.
    pub tracer: &'a dyn LockTracer,
    /// Shared token registry.
    pub tokens: &'a TokenRegistry,
    /// Id reservation.
    pub ids: &'a mut dyn CommandCreationContext,
    /// Schema lookup cache.
    pub cache: &'a mut StatementCache,
}

/// Middleware around statement operations.
///
/// For every operation a layer runs, in order: `before_operation`,
/// `before_read_or_write`, `around` (which calls into the next layer),
/// `after_read_or_write` and `after_operation`. The after hooks run even if
/// the inner call fails. Closing a statement runs only `before_operation`,
/// `on_close` and `after_operation`.
#[allow(unused_variables)]
pub trait StatementLayer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Called first.
    fn before_operation(&self, ctx: &mut StatementContext<'_>) -> KernelResult<()> {
        Ok(())
    }

    /// Called before a read or write of `kind`.
    fn before_read_or_write(
        &self,
        ctx: &mut StatementContext<'_>,
        kind: OperationKind,
    ) -> KernelResult<()> {
        Ok(())
    }

    /// Runs the operation, delegating to `next`.
    fn around(
        &self,
        ctx: &mut StatementContext<'_>,
        op: &Operation,
        next: Next<'_>,
    ) -> KernelResult<Outcome> {
        next.run(ctx, op)
    }

    /// Called after a read or write of `kind`.
    fn after_read_or_write(&self, ctx: &mut StatementContext<'_>, kind: OperationKind) {}

    /// Called last.
    fn after_operation(&self, ctx: &mut StatementContext<'_>) {}

    /// Called when the statement closes.
    fn on_close(&self, ctx: &mut StatementContext<'_>) {}
}

/// The rest of the pipeline below the current layer.
pub struct Next<'p> {
    layers: &'p [Arc<dyn StatementLayer>],
}

impl Next<'_> {
    /// Runs `op` through the remaining layers and the core.
    pub fn run(self, ctx: &mut StatementContext<'_>, op: &Operation) -> KernelResult<Outcome> {
        match self.layers.split_first() {
            Some((layer, rest)) => bracket(&**layer, ctx, op, Next { layers: rest }),
            None => state_handling::execute(ctx, op),
        }
    }

    fn close(self, ctx: &mut StatementContext<'_>) -> KernelResult<()> {
        if let Some((layer, rest)) = self.layers.split_first() {
            layer.before_operation(ctx)?;
            layer.on_close(ctx);
            let result = Next { layers: rest }.close(ctx);
            layer.after_operation(ctx);
            result?;
        }
        Ok(())
    }
}

fn bracket(
    layer: &dyn StatementLayer,
    ctx: &mut StatementContext<'_>,
    op: &Operation,
    next: Next<'_>,
) -> KernelResult<Outcome> {
    let kind = op.kind();
    layer.before_operation(ctx)?;
    let result = match layer.before_read_or_write(ctx, kind) {
        Ok(()) => {
            let result = layer.around(ctx, op, next);
            layer.after_read_or_write(ctx, kind);
            result
        }
        Err(e) => Err(e),
    };
    layer.after_operation(ctx);
    result
}

/// An ordered stack of layers over the state-handling core.
///
/// The first layer is outermost. The order is fixed at construction.
#[derive(Clone, Default)]
pub struct StatementPipeline {
    layers: Vec<Arc<dyn StatementLayer>>,
}

impl StatementPipeline {
    /// Creates a pipeline from layers, outermost first.
    #[must_use]
    pub fn new(layers: Vec<Arc<dyn StatementLayer>>) -> Self {
        Self { layers }
    }

    /// The standard stack: caching, locking, validation, then auto-indexing
    /// when enabled.
    #[must_use]
    pub fn standard(config: &KernelConfig) -> Self {
        let mut layers: Vec<Arc<dyn StatementLayer>> = vec![
            Arc::new(CachingLayer),
            Arc::new(LockingLayer),
            Arc::new(ValidationLayer),
        ];
        if config.node_auto_indexing {
            layers.push(Arc::new(AutoIndexLayer::new(
                config.node_auto_index_keys.iter().copied(),
            )));
        }
        Self::new(layers)
    }

    /// Layer names, outermost first.
    #[must_use]
    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    /// Runs one operation.
    pub fn execute(&self, ctx: &mut StatementContext<'_>, op: &Operation) -> KernelResult<Outcome> {
        Next {
            layers: &self.layers,
        }
        .run(ctx, op)
    }

    /// Runs the close hooks of every layer.
    pub fn close(&self, ctx: &mut StatementContext<'_>) -> KernelResult<()> {
        Next {
            layers: &self.layers,
        }
        .close(ctx)
    }
}
