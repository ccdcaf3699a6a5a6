//! # graphtx kernel
//!
//! Transaction-management kernel for the graphtx embedded graph database.
//!
//! This crate provides:
//! - Per-transaction state: diff sets, property overlays and count deltas
//! - Pooled kernel transactions with cross-thread termination and timeouts
//! - Statements running operations through locking, validation, caching and
//!   auto-indexing layers
//! - A batched commit pipeline: log append, ordered explicit-index
//!   application and per-subsystem appliers
//! - An in-memory reference store wiring it all together behind [`Kernel`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use graphtx_kernel::{AccessMode, Kernel, KernelConfig};
//!
//! let kernel = Kernel::in_memory(KernelConfig::default());
//! let tx = kernel.begin_transaction(AccessMode::Write)?;
//! {
//!     let mut stmt = tx.acquire_statement()?;
//!     let node = stmt.node_create()?;
//!     let name = stmt.property_key_get_or_create("name")?;
//!     stmt.node_set_property(node, name, "ada")?;
//!     stmt.close()?;
//! }
//! tx.commit()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod apply;
pub mod commit;
pub mod config;
pub mod error;
pub mod kernel;
pub mod locking;
pub mod schema;
pub mod state;
pub mod statement;
pub mod storage;
pub mod store;
pub mod tokens;
pub mod transaction;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::KernelConfig;
pub use error::{KernelError, KernelResult};
pub use kernel::Kernel;
pub use schema::{ConstraintDescriptor, IndexDescriptor, SchemaDescriptor};
pub use state::{CountsKey, CountsRecordState, DiffSet, TransactionState};
pub use statement::{Operation, Statement};
pub use transaction::{
    AccessMode, CloseOutcome, KernelTransaction, KernelTransactionHandle, KernelTransactions,
    TerminationReason,
};
pub use types::{
    EntityRef, IndexId, LabelId, NodeId, PropertyKeyId, RelationshipId, RelationshipTypeId,
    TransactionId, Value,
};
