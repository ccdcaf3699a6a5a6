//! Maintains the node auto-index.

use crate::error::KernelResult;
use crate::state::ExplicitIndexChange;
use crate::statement::operation::{Operation, Outcome};
use crate::statement::pipeline::{Next, StatementContext, StatementLayer};
use crate::types::{EntityRef, NodeId, PropertyKeyId};
use std::collections::BTreeSet;

/// Name of the explicit index maintained by [`AutoIndexLayer`].
pub const NODE_AUTO_INDEX: &str = "node_auto_index";

/// Mirrors writes of selected node properties into [`NODE_AUTO_INDEX`].
///
/// Updates are recorded only after the inner operation succeeded.
#[derive(Debug, Clone, Default)]
pub struct AutoIndexLayer {
    keys: BTreeSet<PropertyKeyId>,
}

impl AutoIndexLayer {
    /// Auto-indexes the given property keys.
    pub fn new(keys: impl IntoIterator<Item = PropertyKeyId>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    fn key_name(ctx: &StatementContext<'_>, key: PropertyKeyId) -> String {
        ctx.tokens
            .property_key_name(key)
            .unwrap_or_else(|| key.to_string())
    }

    fn remove(ctx: &mut StatementContext<'_>, node: NodeId, key: String) {
        ctx.tx_state
            .explicit_index_do_change(ExplicitIndexChange::Remove {
                index: NODE_AUTO_INDEX.to_string(),
                entity: EntityRef::Node(node),
                key,
            });
    }
}

impl StatementLayer for AutoIndexLayer {
    fn name(&self) -> &'static str {
        "auto_index"
    }

    fn around(
        &self,
        ctx: &mut StatementContext<'_>,
        op: &Operation,
        next: Next<'_>,
    ) -> KernelResult<Outcome> {
        let outcome = next.run(ctx, op)?;
        match op {
            Operation::NodeSetProperty { node, key, value } if self.keys.contains(key) => {
                let name = Self::key_name(ctx, *key);
                Self::remove(ctx, *node, name.clone());
                ctx.tx_state
                    .explicit_index_do_change(ExplicitIndexChange::Add {
                        index: NODE_AUTO_INDEX.to_string(),
                        entity: EntityRef::Node(*node),
                        key: name,
                        value: value.clone(),
                    });
            }
            Operation::NodeRemoveProperty { node, key } if self.keys.contains(key) => {
                if matches!(outcome, Outcome::Property(Some(_))) {
                    let name = Self::key_name(ctx, *key);
                    Self::remove(ctx, *node, name);
                }
            }
            Operation::NodeDelete(node) if !self.keys.is_empty() => {
                ctx.tx_state
                    .explicit_index_do_change(ExplicitIndexChange::RemoveEntity {
                        index: NODE_AUTO_INDEX.to_string(),
                        entity: EntityRef::Node(*node),
                    });
            }
            _ => {}
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::pipeline::StatementPipeline;
    use crate::test_support::Harness;
    use crate::types::Value;
    use std::sync::Arc;

    #[test]
    fn configured_key_writes_are_mirrored() {
        let mut harness = Harness::new();
        let name = harness.tokens.property_key_get_or_create("name").unwrap();
        let age = harness.tokens.property_key_get_or_create("age").unwrap();
        let node = harness.committed_node();
        let pipeline = StatementPipeline::new(vec![Arc::new(AutoIndexLayer::new([name]))]);

        for (key, value) in [(name, "ada"), (age, "36")] {
            pipeline
                .execute(
                    &mut harness.ctx(),
                    &Operation::NodeSetProperty {
                        node,
                        key,
                        value: Value::from(value),
                    },
                )
                .unwrap();
        }

        assert_eq!(
            harness.tx_state.explicit_index_changes(),
            [
                ExplicitIndexChange::Remove {
                    index: NODE_AUTO_INDEX.into(),
                    entity: EntityRef::Node(node),
                    key: "name".into(),
                },
                ExplicitIndexChange::Add {
                    index: NODE_AUTO_INDEX.into(),
                    entity: EntityRef::Node(node),
                    key: "name".into(),
                    value: Value::from("ada"),
                },
            ]
        );
    }

    #[test]
    fn node_delete_removes_entity() {
        let mut harness = Harness::new();
        let node = harness.committed_node();
        let pipeline =
            StatementPipeline::new(vec![Arc::new(AutoIndexLayer::new([PropertyKeyId::new(9)]))]);

        pipeline
            .execute(&mut harness.ctx(), &Operation::NodeDelete(node))
            .unwrap();

        assert!(matches!(
            harness.tx_state.explicit_index_changes(),
            [ExplicitIndexChange::RemoveEntity { .. }]
        ));
    }

    #[test]
    fn failed_write_records_nothing() {
        let mut harness = Harness::new();
        let key = PropertyKeyId::new(1);
        let pipeline = StatementPipeline::new(vec![Arc::new(AutoIndexLayer::new([key]))]);

        let missing = NodeId::new(77);
        assert!(pipeline
            .execute(
                &mut harness.ctx(),
                &Operation::NodeSetProperty {
                    node: missing,
                    key,
                    value: Value::Int(1),
                },
            )
            .is_err());
        assert!(!harness.tx_state.has_explicit_index_changes());
    }
}
