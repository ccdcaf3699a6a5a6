//! Shared fixtures for statement-level unit tests.

use crate::apply::StorageCommand;
use crate::locking::{LockClient, LockManager, Locks, NoopLockTracer};
use crate::schema::{IndexDescriptor, SchemaDescriptor};
use crate::state::TransactionState;
use crate::statement::{StatementCache, StatementContext};
use crate::storage::CommandCreationContext;
use crate::store::{GraphStore, StoreIdReservations};
use crate::tokens::TokenRegistry;
use crate::types::NodeId;
use std::sync::Arc;

/// A transaction's worth of statement context over an in-memory store.
pub(crate) struct Harness {
    pub(crate) store: Arc<GraphStore>,
    pub(crate) tx_state: TransactionState,
    pub(crate) locks: Arc<dyn LockClient>,
    pub(crate) tokens: TokenRegistry,
    pub(crate) ids: Box<dyn CommandCreationContext>,
    pub(crate) cache: StatementCache,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let store = Arc::new(GraphStore::new());
        Self {
            ids: Box::new(StoreIdReservations::new(Arc::clone(&store))),
            store,
            tx_state: TransactionState::new(),
            locks: LockManager::default().new_client(),
            tokens: TokenRegistry::new(),
            cache: StatementCache::default(),
        }
    }

    pub(crate) fn ctx(&mut self) -> StatementContext<'_> {
        StatementContext {
            tx_state: &mut self.tx_state,
            reader: &*self.store,
            locks: &*self.locks,
            tracer: &NoopLockTracer,
            tokens: &self.tokens,
            ids: &mut *self.ids,
            cache: &mut self.cache,
        }
    }

    /// Creates a node directly in the committed store.
    pub(crate) fn committed_node(&mut self) -> NodeId {
        let id = self.store.reserve_node_id();
        self.store
            .apply(&StorageCommand::NodeCreate { id })
            .expect("node create");
        id
    }

    /// Creates an index directly in the committed store.
    pub(crate) fn committed_index(&mut self, schema: SchemaDescriptor) -> IndexDescriptor {
        let index = IndexDescriptor::general(self.store.reserve_index_id(), schema);
        self.store
            .apply(&StorageCommand::IndexCreate(index.clone()))
            .expect("index create");
        index
    }
}
