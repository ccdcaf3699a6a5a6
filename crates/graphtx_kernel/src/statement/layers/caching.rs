//! Caches schema lookups for the life of a statement.

use crate::error::KernelResult;
use crate::statement::operation::{Operation, OperationKind, Outcome};
use crate::statement::pipeline::{Next, StatementContext, StatementLayer};

/// Answers repeated `IndexGetForSchema` lookups from the statement cache.
///
/// Any schema write invalidates the cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct CachingLayer;

impl StatementLayer for CachingLayer {
    fn name(&self) -> &'static str {
        "caching"
    }

    fn around(
        &self,
        ctx: &mut StatementContext<'_>,
        op: &Operation,
        next: Next<'_>,
    ) -> KernelResult<Outcome> {
        let Operation::IndexGetForSchema(schema) = op else {
            return next.run(ctx, op);
        };
        if let Some(cached) = ctx.cache.index(schema) {
            return Ok(Outcome::MaybeIndex(cached));
        }
        let outcome = next.run(ctx, op)?;
        if let Outcome::MaybeIndex(found) = &outcome {
            ctx.cache.put_index(schema.clone(), found.clone());
        }
        Ok(outcome)
    }

    fn after_read_or_write(&self, ctx: &mut StatementContext<'_>, kind: OperationKind) {
        if kind == OperationKind::SchemaWrite {
            ctx.cache.clear();
        }
    }

    fn on_close(&self, ctx: &mut StatementContext<'_>) {
        ctx.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaDescriptor;
    use crate::statement::pipeline::StatementPipeline;
    use crate::test_support::Harness;
    use crate::types::{LabelId, PropertyKeyId};
    use std::sync::Arc;

    fn schema() -> SchemaDescriptor {
        SchemaDescriptor::for_label(LabelId::new(1), [PropertyKeyId::new(1)])
    }

    #[test]
    fn repeated_lookup_is_served_from_cache() {
        let pipeline = StatementPipeline::new(vec![Arc::new(CachingLayer)]);
        let mut harness = Harness::new();
        let lookup = Operation::IndexGetForSchema(schema());

        let first = pipeline.execute(&mut harness.ctx(), &lookup).unwrap();
        let second = pipeline.execute(&mut harness.ctx(), &lookup).unwrap();
        assert_eq!(first, second);
        assert_eq!(harness.cache.hits(), 1);
    }

    #[test]
    fn schema_write_invalidates_cache() {
        let pipeline = StatementPipeline::new(vec![Arc::new(CachingLayer)]);
        let mut harness = Harness::new();
        let lookup = Operation::IndexGetForSchema(schema());

        let before = pipeline
            .execute(&mut harness.ctx(), &lookup)
            .unwrap()
            .into_maybe_index()
            .unwrap();
        assert!(before.is_none());

        let created = pipeline
            .execute(&mut harness.ctx(), &Operation::IndexCreate(schema()))
            .unwrap()
            .into_index()
            .unwrap();
        assert!(harness.cache.is_empty());

        let after = pipeline
            .execute(&mut harness.ctx(), &lookup)
            .unwrap()
            .into_maybe_index()
            .unwrap();
        assert_eq!(after, Some(created));
    }
}
