//! Takes transaction locks before delegating.

use crate::error::KernelResult;
use crate::locking::{ResourceType, SCHEMA_RESOURCE_ID};
use crate::statement::operation::{Operation, Outcome};
use crate::statement::pipeline::{Next, StatementContext, StatementLayer};

/// Acquires the locks an operation needs, then delegates.
///
/// Entity and schema-write locks are taken before the schema read lock.
/// Locks are held until the transaction closes.
#[derive(Debug, Default, Clone, Copy)]
pub struct LockingLayer;

/// Resource id of an explicit index lock.
#[must_use]
pub fn explicit_index_resource_id(index: &str) -> u64 {
    u64::from(crc32fast::hash(index.as_bytes()))
}

impl LockingLayer {
    fn exclusive(ctx: &StatementContext<'_>, resource: ResourceType, ids: &[u64]) -> KernelResult<()> {
        ctx.locks.acquire_exclusive(ctx.tracer, resource, ids)
    }

    fn schema_shared(ctx: &StatementContext<'_>) -> KernelResult<()> {
        ctx.locks
            .acquire_shared(ctx.tracer, ResourceType::Schema, &[SCHEMA_RESOURCE_ID])
    }

    fn lock_for(ctx: &StatementContext<'_>, op: &Operation) -> KernelResult<()> {
        match op {
            Operation::NodeAddLabel { node, .. }
            | Operation::NodeRemoveLabel { node, .. }
            | Operation::NodeSetProperty { node, .. }
            | Operation::NodeRemoveProperty { node, .. } => {
                Self::exclusive(ctx, ResourceType::Node, &[node.as_u64()])?;
                Self::schema_shared(ctx)
            }
            Operation::NodeDelete(node) => {
                Self::exclusive(ctx, ResourceType::Node, &[node.as_u64()])
            }
            Operation::RelationshipCreate { start, end, .. } => Self::exclusive(
                ctx,
                ResourceType::Node,
                &[start.as_u64(), end.as_u64()],
            ),
            Operation::RelationshipDelete(rel)
            | Operation::RelationshipSetProperty { rel, .. }
            | Operation::RelationshipRemoveProperty { rel, .. } => {
                Self::exclusive(ctx, ResourceType::Relationship, &[rel.as_u64()])
            }
            Operation::NodeExplicitIndexAdd { index, node, .. }
            | Operation::NodeExplicitIndexRemove { index, node, .. } => {
                Self::exclusive(ctx, ResourceType::Node, &[node.as_u64()])?;
                Self::exclusive(
                    ctx,
                    ResourceType::ExplicitIndex,
                    &[explicit_index_resource_id(index)],
                )
            }
            Operation::IndexCreate(_)
            | Operation::IndexDrop(_)
            | Operation::UniquenessConstraintCreate(_)
            | Operation::ConstraintDrop(_) => {
                Self::exclusive(ctx, ResourceType::Schema, &[SCHEMA_RESOURCE_ID])
            }
            Operation::IndexGetForSchema(_)
            | Operation::IndexesGetAll
            | Operation::ConstraintsGetAll => Self::schema_shared(ctx),
            _ => Ok(()),
        }
    }
}

impl StatementLayer for LockingLayer {
    fn name(&self) -> &'static str {
        "locking"
    }

    fn around(
        &self,
        ctx: &mut StatementContext<'_>,
        op: &Operation,
        next: Next<'_>,
    ) -> KernelResult<Outcome> {
        Self::lock_for(ctx, op)?;
        next.run(ctx, op)
    }
}
