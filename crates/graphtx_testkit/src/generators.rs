//! Property-based test generators using proptest.
//!
//! Provides strategies for diff-set edits and for random graph workloads,
//! plus a driver that runs a workload against a kernel.

use graphtx_kernel::{AccessMode, Kernel, KernelResult, NodeId, RelationshipId, Statement};
use proptest::prelude::*;

/// One edit of a diff set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOp {
    /// Add an element
    Add(u8),
    /// Remove an element
    Remove(u8),
}

/// Strategy for diff-set edits over a small element domain, so adds and
/// removes of the same element collide often.
pub fn diff_op_strategy() -> impl Strategy<Value = DiffOp> {
    prop_oneof![
        (0u8..16).prop_map(DiffOp::Add),
        (0u8..16).prop_map(DiffOp::Remove),
    ]
}

/// Strategy for a sequence of diff-set edits.
pub fn diff_op_sequence_strategy(max_ops: usize) -> impl Strategy<Value = Vec<DiffOp>> {
    prop::collection::vec(diff_op_strategy(), 0..max_ops)
}

/// One step of a graph workload.
///
/// Node and relationship operands index into the entities committed so far,
/// modulo their count; steps with no such entity are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphOp {
    /// Create a node, optionally labelled
    CreateNode {
        /// Label index
        label: Option<u8>,
    },
    /// Delete a node
    DeleteNode {
        /// Node index
        node: usize,
    },
    /// Add a label
    AddLabel {
        /// Node index
        node: usize,
        /// Label index
        label: u8,
    },
    /// Remove a label
    RemoveLabel {
        /// Node index
        node: usize,
        /// Label index
        label: u8,
    },
    /// Set a property
    SetProperty {
        /// Node index
        node: usize,
        /// Property key index
        key: u8,
        /// Value
        value: i64,
    },
    /// Create a relationship
    CreateRelationship {
        /// Start node index
        start: usize,
        /// End node index
        end: usize,
        /// Relationship type index
        rel_type: u8,
    },
    /// Delete a relationship
    DeleteRelationship {
        /// Relationship index
        rel: usize,
    },
}

/// Strategy for graph workload steps over three labels, two types and
/// two property keys.
pub fn graph_op_strategy() -> impl Strategy<Value = GraphOp> {
    prop_oneof![
        4 => prop::option::of(0u8..3).prop_map(|label| GraphOp::CreateNode { label }),
        1 => any::<usize>().prop_map(|node| GraphOp::DeleteNode { node }),
        3 => (any::<usize>(), 0u8..3).prop_map(|(node, label)| GraphOp::AddLabel { node, label }),
        1 => (any::<usize>(), 0u8..3)
            .prop_map(|(node, label)| GraphOp::RemoveLabel { node, label }),
        2 => (any::<usize>(), 0u8..2, any::<i64>())
            .prop_map(|(node, key, value)| GraphOp::SetProperty { node, key, value }),
        3 => (any::<usize>(), any::<usize>(), 0u8..2).prop_map(|(start, end, rel_type)| {
            GraphOp::CreateRelationship {
                start,
                end,
                rel_type,
            }
        }),
        1 => any::<usize>().prop_map(|rel| GraphOp::DeleteRelationship { rel }),
    ]
}

/// Strategy for a workload split into transactions of up to `max_tx_len`
/// steps.
pub fn graph_workload_strategy(
    max_txs: usize,
    max_tx_len: usize,
) -> impl Strategy<Value = Vec<Vec<GraphOp>>> {
    prop::collection::vec(
        prop::collection::vec(graph_op_strategy(), 1..max_tx_len),
        1..max_txs,
    )
}

/// Outcome of [`run_graph_workload`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadReport {
    /// Transactions that committed.
    pub committed: usize,
    /// Transactions rolled back because a step or the commit failed.
    pub rolled_back: usize,
}

#[derive(Default)]
struct Known {
    nodes: Vec<NodeId>,
    relationships: Vec<RelationshipId>,
}

fn pick<T: Copy>(items: &[T], index: usize) -> Option<T> {
    (!items.is_empty()).then(|| items[index % items.len()])
}

fn run_step(stmt: &mut Statement<'_>, known: &Known, created: &mut Known, op: GraphOp) -> KernelResult<()> {
    match op {
        GraphOp::CreateNode { label } => {
            let node = stmt.node_create()?;
            if let Some(label) = label {
                let label = stmt.label_get_or_create(&format!("L{label}"))?;
                stmt.node_add_label(node, label)?;
            }
            created.nodes.push(node);
        }
        GraphOp::DeleteNode { node } => {
            if let Some(node) = pick(&known.nodes, node) {
                stmt.node_delete(node)?;
            }
        }
        GraphOp::AddLabel { node, label } => {
            if let Some(node) = pick(&known.nodes, node) {
                let label = stmt.label_get_or_create(&format!("L{label}"))?;
                stmt.node_add_label(node, label)?;
            }
        }
        GraphOp::RemoveLabel { node, label } => {
            if let Some(node) = pick(&known.nodes, node) {
                let label = stmt.label_get_or_create(&format!("L{label}"))?;
                stmt.node_remove_label(node, label)?;
            }
        }
        GraphOp::SetProperty { node, key, value } => {
            if let Some(node) = pick(&known.nodes, node) {
                let key = stmt.property_key_get_or_create(&format!("k{key}"))?;
                stmt.node_set_property(node, key, value)?;
            }
        }
        GraphOp::CreateRelationship {
            start,
            end,
            rel_type,
        } => {
            if let (Some(start), Some(end)) = (pick(&known.nodes, start), pick(&known.nodes, end)) {
                let rel_type = stmt.relationship_type_get_or_create(&format!("T{rel_type}"))?;
                let rel = stmt.relationship_create(rel_type, start, end)?;
                created.relationships.push(rel);
            }
        }
        GraphOp::DeleteRelationship { rel } => {
            if let Some(rel) = pick(&known.relationships, rel) {
                stmt.relationship_delete(rel)?;
            }
        }
    }
    Ok(())
}

/// Runs `workload` against `kernel`, one transaction per inner vector.
///
/// A transaction whose step or commit fails is rolled back and the
/// workload continues. Steps refer only to entities committed by earlier
/// transactions.
pub fn run_graph_workload(kernel: &Kernel, workload: &[Vec<GraphOp>]) -> WorkloadReport {
    let mut known = Known::default();
    let mut report = WorkloadReport::default();
    for ops in workload {
        let result = kernel.transaction(AccessMode::Write, |stmt| {
            let mut created = Known::default();
            for op in ops {
                run_step(stmt, &known, &mut created, *op)?;
            }
            Ok(created)
        });
        match result {
            Ok(created) => {
                known.nodes.extend(created.nodes);
                known.relationships.extend(created.relationships);
                report.committed += 1;
            }
            Err(_) => report.rolled_back += 1,
        }
    }
    report
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
