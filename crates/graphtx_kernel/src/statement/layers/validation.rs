//! Rejects schema and token operations that would break integrity.

use crate::error::{KernelError, KernelResult};
use crate::schema::SchemaDescriptor;
use crate::statement::operation::{Operation, Outcome};
use crate::statement::pipeline::{Next, StatementContext, StatementLayer};
use crate::statement::state_handling::{constraint_for_schema, index_for_schema};
use crate::tokens::check_token_name;

/// Validates schema writes and token names before delegating.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValidationLayer;

impl ValidationLayer {
    fn check_index_create(ctx: &StatementContext<'_>, schema: &SchemaDescriptor) -> KernelResult<()> {
        schema.validate()?;
        match index_for_schema(ctx, schema) {
            Some(existing) if existing.is_constraint_backing() => {
                Err(KernelError::AlreadyConstrained {
                    schema: schema.clone(),
                })
            }
            Some(_) => Err(KernelError::AlreadyIndexed {
                schema: schema.clone(),
            }),
            None => Ok(()),
        }
    }

    fn check_index_drop(ctx: &StatementContext<'_>, schema: &SchemaDescriptor) -> KernelResult<()> {
        match index_for_schema(ctx, schema) {
            None => Err(KernelError::NoSuchIndex {
                schema: schema.clone(),
            }),
            Some(existing) if existing.is_constraint_backing() => {
                Err(KernelError::IndexBelongsToConstraint {
                    schema: schema.clone(),
                })
            }
            Some(_) => Ok(()),
        }
    }

    fn check_constraint_create(
        ctx: &StatementContext<'_>,
        schema: &SchemaDescriptor,
    ) -> KernelResult<()> {
        schema.validate()?;
        if constraint_for_schema(ctx, schema).is_some() {
            return Err(KernelError::AlreadyConstrained {
                schema: schema.clone(),
            });
        }
        if index_for_schema(ctx, schema).is_some() {
            return Err(KernelError::AlreadyIndexed {
                schema: schema.clone(),
            });
        }
        Ok(())
    }

    fn check(ctx: &StatementContext<'_>, op: &Operation) -> KernelResult<()> {
        match op {
            Operation::IndexCreate(schema) => Self::check_index_create(ctx, schema),
            Operation::IndexDrop(schema) => Self::check_index_drop(ctx, schema),
            Operation::UniquenessConstraintCreate(schema) => {
                Self::check_constraint_create(ctx, schema)
            }
            Operation::ConstraintDrop(schema) => match constraint_for_schema(ctx, schema) {
                Some(_) => Ok(()),
                None => Err(KernelError::NoSuchConstraint {
                    schema: schema.clone(),
                }),
            },
            Operation::LabelGetOrCreate(name)
            | Operation::PropertyKeyGetOrCreate(name)
            | Operation::RelationshipTypeGetOrCreate(name) => check_token_name(name),
            _ => Ok(()),
        }
    }
}

impl StatementLayer for ValidationLayer {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn around(
        &self,
        ctx: &mut StatementContext<'_>,
        op: &Operation,
        next: Next<'_>,
    ) -> KernelResult<Outcome> {
        Self::check(ctx, op)?;
        next.run(ctx, op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::pipeline::StatementPipeline;
    use crate::test_support::Harness;
    use crate::types::{LabelId, PropertyKeyId};
    use std::sync::Arc;

    fn schema(props: &[u64]) -> SchemaDescriptor {
        SchemaDescriptor::for_label(LabelId::new(1), props.iter().map(|p| PropertyKeyId::new(*p)))
    }

    fn run(harness: &mut Harness, op: Operation) -> KernelResult<Outcome> {
        StatementPipeline::new(vec![Arc::new(ValidationLayer)]).execute(&mut harness.ctx(), &op)
    }

    #[test]
    fn duplicate_index_is_rejected() {
        let mut harness = Harness::new();
        run(&mut harness, Operation::IndexCreate(schema(&[1]))).unwrap();
        let err = run(&mut harness, Operation::IndexCreate(schema(&[1]))).unwrap_err();
        assert!(matches!(err, KernelError::AlreadyIndexed { .. }));
    }

    #[test]
    fn index_over_constrained_schema_is_rejected() {
        let mut harness = Harness::new();
        run(&mut harness, Operation::UniquenessConstraintCreate(schema(&[1]))).unwrap();
        let err = run(&mut harness, Operation::IndexCreate(schema(&[1]))).unwrap_err();
        assert!(matches!(err, KernelError::AlreadyConstrained { .. }));
    }

    #[test]
    fn constraint_over_indexed_schema_is_rejected() {
        let mut harness = Harness::new();
        run(&mut harness, Operation::IndexCreate(schema(&[1]))).unwrap();
        let err = run(&mut harness, Operation::UniquenessConstraintCreate(schema(&[1]))).unwrap_err();
        assert!(matches!(err, KernelError::AlreadyIndexed { .. }));
    }

    #[test]
    fn dropping_missing_or_owned_index_is_rejected() {
        let mut harness = Harness::new();
        let err = run(&mut harness, Operation::IndexDrop(schema(&[1]))).unwrap_err();
        assert!(matches!(err, KernelError::NoSuchIndex { .. }));

        run(&mut harness, Operation::UniquenessConstraintCreate(schema(&[2]))).unwrap();
        let err = run(&mut harness, Operation::IndexDrop(schema(&[2]))).unwrap_err();
        assert!(matches!(err, KernelError::IndexBelongsToConstraint { .. }));
    }

    #[test]
    fn dropping_missing_constraint_is_rejected() {
        let mut harness = Harness::new();
        let err = run(&mut harness, Operation::ConstraintDrop(schema(&[1]))).unwrap_err();
        assert!(matches!(err, KernelError::NoSuchConstraint { .. }));
    }

    #[test]
    fn repeated_composite_property_is_rejected() {
        let mut harness = Harness::new();
        let err = run(&mut harness, Operation::IndexCreate(schema(&[1, 2, 1]))).unwrap_err();
        assert!(matches!(
            err,
            KernelError::RepeatedPropertyInCompositeSchema { property, .. } if property == PropertyKeyId::new(1)
        ));
        assert!(!harness.tx_state.has_schema_changes());
    }

    #[test]
    fn illegal_token_names_are_rejected() {
        let mut harness = Harness::new();
        for name in ["", "bad\0name"] {
            let err = run(&mut harness, Operation::LabelGetOrCreate(name.into())).unwrap_err();
            assert!(matches!(err, KernelError::IllegalTokenName { .. }));
        }
        assert!(run(&mut harness, Operation::LabelGetOrCreate("Person".into())).is_ok());
    }

    #[test]
    fn committed_schema_is_seen() {
        let mut harness = Harness::new();
        harness.committed_index(schema(&[3]));
        let err = run(&mut harness, Operation::IndexCreate(schema(&[3]))).unwrap_err();
        assert!(err.is_schema_violation());

        run(&mut harness, Operation::IndexDrop(schema(&[3]))).unwrap();
        run(&mut harness, Operation::IndexCreate(schema(&[3]))).unwrap();
    }
}
