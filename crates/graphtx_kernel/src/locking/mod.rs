//! Lock service abstraction.
//!
//! A [`Locks`] service is shared by every transaction. Each transaction use
//! gets its own [`LockClient`], which holds that transaction's locks until it
//! is closed. Stopping a client makes every pending and future acquisition on
//! it fail with [`KernelError::LockClientStopped`](crate::KernelError), which
//! is how termination reaches a transaction blocked on a lock.

mod manager;

pub use manager::LockManager;

use crate::error::KernelResult;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Resource id used for the single schema lock.
pub const SCHEMA_RESOURCE_ID: u64 = 0;

/// Kind of resource a lock protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceType {
    /// A node, by id.
    Node,
    /// A relationship, by id.
    Relationship,
    /// The whole schema.
    Schema,
    /// An explicit index, by a hash of its name.
    ExplicitIndex,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node => write!(f, "NODE"),
            Self::Relationship => write!(f, "RELATIONSHIP"),
            Self::Schema => write!(f, "SCHEMA"),
            Self::ExplicitIndex => write!(f, "EXPLICIT_INDEX"),
        }
    }
}

/// Shared or exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Many holders.
    Shared,
    /// One holder.
    Exclusive,
}

/// Observes lock waits.
pub trait LockTracer: Send + Sync {
    /// Called after a lock was granted following a wait.
    fn lock_waited(&self, resource: ResourceType, mode: LockMode, waited: Duration);
}

/// A tracer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLockTracer;

impl LockTracer for NoopLockTracer {
    fn lock_waited(&self, _resource: ResourceType, _mode: LockMode, _waited: Duration) {}
}

/// Locks held on behalf of one transaction use.
///
/// Acquisition of several ids happens in ascending id order.
pub trait LockClient: Send + Sync {
    /// Blocks until shared locks on all `ids` are held.
    fn acquire_shared(
        &self,
        tracer: &dyn LockTracer,
        resource: ResourceType,
        ids: &[u64],
    ) -> KernelResult<()>;

    /// Blocks until exclusive locks on all `ids` are held.
    fn acquire_exclusive(
        &self,
        tracer: &dyn LockTracer,
        resource: ResourceType,
        ids: &[u64],
    ) -> KernelResult<()>;

    /// Releases one shared hold on each of `ids`.
    fn release_shared(&self, resource: ResourceType, ids: &[u64]);

    /// Releases one exclusive hold on each of `ids`.
    fn release_exclusive(&self, resource: ResourceType, ids: &[u64]);

    /// Fails pending and future acquisitions. Held locks stay held.
    fn stop(&self);

    /// Releases every held lock. The client cannot be used afterwards.
    fn close(&self);

    /// Number of distinct locks currently held.
    fn active_lock_count(&self) -> usize;
}

/// The shared lock service.
pub trait Locks: Send + Sync {
    /// Creates a client for one transaction use.
    fn new_client(&self) -> Arc<dyn LockClient>;
}
