//! The closed set of statement operations and their results.

use crate::error::{KernelError, KernelResult};
use crate::schema::{ConstraintDescriptor, IndexDescriptor, SchemaDescriptor};
use crate::types::{
    EntityRef, LabelId, NodeId, PropertyKeyId, RelationshipId, RelationshipTypeId, Value,
};

/// Broad category of an operation, passed to the read/write hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Reads data or schema.
    Read,
    /// Writes data.
    Write,
    /// Creates or drops indexes and constraints.
    SchemaWrite,
    /// Looks up or creates a token.
    Token,
}

impl OperationKind {
    /// Returns `true` for data and schema writes.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Write | Self::SchemaWrite)
    }
}

/// One statement operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    // === Reads ===
    /// Does the node exist?
    NodeExists(NodeId),
    /// Labels of a node.
    NodeGetLabels(NodeId),
    /// Does the node carry the label?
    NodeHasLabel {
        /// The node.
        node: NodeId,
        /// The label.
        label: LabelId,
    },
    /// A node property.
    NodeGetProperty {
        /// The node.
        node: NodeId,
        /// The property key.
        key: PropertyKeyId,
    },
    /// Every node.
    NodesGetAll,
    /// Nodes carrying a label.
    NodesGetForLabel(LabelId),
    /// Relationships attached to a node.
    NodeGetRelationships(NodeId),
    /// A relationship property.
    RelationshipGetProperty {
        /// The relationship.
        rel: RelationshipId,
        /// The property key.
        key: PropertyKeyId,
    },
    /// The index over a schema.
    IndexGetForSchema(SchemaDescriptor),
    /// Every index.
    IndexesGetAll,
    /// Every constraint.
    ConstraintsGetAll,
    /// Node count, optionally restricted to a label.
    CountsForNode(Option<LabelId>),
    /// Relationship count by start label, type and end label.
    CountsForRelationship {
        /// Start node label.
        start_label: Option<LabelId>,
        /// Relationship type.
        rel_type: Option<RelationshipTypeId>,
        /// End node label.
        end_label: Option<LabelId>,
    },
    /// Explicit index lookup.
    ExplicitIndexGet {
        /// Index name.
        index: String,
        /// Entry key.
        key: String,
        /// Entry value.
        value: Value,
    },

    // === Data writes ===
    /// Creates a node.
    NodeCreate,
    /// Deletes a node without relationships.
    NodeDelete(NodeId),
    /// Adds a label to a node.
    NodeAddLabel {
        /// The node.
        node: NodeId,
        /// The label.
        label: LabelId,
    },
    /// Removes a label from a node.
    NodeRemoveLabel {
        /// The node.
        node: NodeId,
        /// The label.
        label: LabelId,
    },
    /// Sets a node property.
    NodeSetProperty {
        /// The node.
        node: NodeId,
        /// The property key.
        key: PropertyKeyId,
        /// The new value.
        value: Value,
    },
    /// Removes a node property.
    NodeRemoveProperty {
        /// The node.
        node: NodeId,
        /// The property key.
        key: PropertyKeyId,
    },
    /// Creates a relationship.
    RelationshipCreate {
        /// Relationship type.
        rel_type: RelationshipTypeId,
        /// Start node.
        start: NodeId,
        /// End node.
        end: NodeId,
    },
    /// Deletes a relationship.
    RelationshipDelete(RelationshipId),
    /// Sets a relationship property.
    RelationshipSetProperty {
        /// The relationship.
        rel: RelationshipId,
        /// The property key.
        key: PropertyKeyId,
        /// The new value.
        value: Value,
    },
    /// Removes a relationship property.
    RelationshipRemoveProperty {
        /// The relationship.
        rel: RelationshipId,
        /// The property key.
        key: PropertyKeyId,
    },
    /// Adds a node to an explicit index.
    NodeExplicitIndexAdd {
        /// Index name.
        index: String,
        /// The node.
        node: NodeId,
        /// Entry key.
        key: String,
        /// Entry value.
        value: Value,
    },
    /// Removes a node's entries for a key from an explicit index.
    NodeExplicitIndexRemove {
        /// Index name.
        index: String,
        /// The node.
        node: NodeId,
        /// Entry key.
        key: String,
    },

    // === Tokens ===
    /// Looks up or creates a label.
    LabelGetOrCreate(String),
    /// Looks up or creates a property key.
    PropertyKeyGetOrCreate(String),
    /// Looks up or creates a relationship type.
    RelationshipTypeGetOrCreate(String),

    // === Schema writes ===
    /// Creates an index.
    IndexCreate(SchemaDescriptor),
    /// Drops an index.
    IndexDrop(SchemaDescriptor),
    /// Creates a uniqueness constraint.
    UniquenessConstraintCreate(SchemaDescriptor),
    /// Drops a constraint.
    ConstraintDrop(SchemaDescriptor),
}

impl Operation {
    /// Category of this operation.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::NodeExists(_)
            | Self::NodeGetLabels(_)
            | Self::NodeHasLabel { .. }
            | Self::NodeGetProperty { .. }
            | Self::NodesGetAll
            | Self::NodesGetForLabel(_)
            | Self::NodeGetRelationships(_)
            | Self::RelationshipGetProperty { .. }
            | Self::IndexGetForSchema(_)
            | Self::IndexesGetAll
            | Self::ConstraintsGetAll
            | Self::CountsForNode(_)
            | Self::CountsForRelationship { .. }
            | Self::ExplicitIndexGet { .. } => OperationKind::Read,
            Self::NodeCreate
            | Self::NodeDelete(_)
            | Self::NodeAddLabel { .. }
            | Self::NodeRemoveLabel { .. }
            | Self::NodeSetProperty { .. }
            | Self::NodeRemoveProperty { .. }
            | Self::RelationshipCreate { .. }
            | Self::RelationshipDelete(_)
            | Self::RelationshipSetProperty { .. }
            | Self::RelationshipRemoveProperty { .. }
            | Self::NodeExplicitIndexAdd { .. }
            | Self::NodeExplicitIndexRemove { .. } => OperationKind::Write,
            Self::LabelGetOrCreate(_)
            | Self::PropertyKeyGetOrCreate(_)
            | Self::RelationshipTypeGetOrCreate(_) => OperationKind::Token,
            Self::IndexCreate(_)
            | Self::IndexDrop(_)
            | Self::UniquenessConstraintCreate(_)
            | Self::ConstraintDrop(_) => OperationKind::SchemaWrite,
        }
    }

    /// Short name used in error messages and logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NodeExists(_) => "node_exists",
            Self::NodeGetLabels(_) => "node_get_labels",
            Self::NodeHasLabel { .. } => "node_has_label",
            Self::NodeGetProperty { .. } => "node_get_property",
            Self::NodesGetAll => "nodes_get_all",
            Self::NodesGetForLabel(_) => "nodes_get_for_label",
            Self::NodeGetRelationships(_) => "node_get_relationships",
            Self::RelationshipGetProperty { .. } => "relationship_get_property",
            Self::IndexGetForSchema(_) => "index_get_for_schema",
            Self::IndexesGetAll => "indexes_get_all",
            Self::ConstraintsGetAll => "constraints_get_all",
            Self::CountsForNode(_) => "counts_for_node",
            Self::CountsForRelationship { .. } => "counts_for_relationship",
            Self::ExplicitIndexGet { .. } => "explicit_index_get",
            Self::NodeCreate => "node_create",
            Self::NodeDelete(_) => "node_delete",
            Self::NodeAddLabel { .. } => "node_add_label",
            Self::NodeRemoveLabel { .. } => "node_remove_label",
            Self::NodeSetProperty { .. } => "node_set_property",
            Self::NodeRemoveProperty { .. } => "node_remove_property",
            Self::RelationshipCreate { .. } => "relationship_create",
            Self::RelationshipDelete(_) => "relationship_delete",
            Self::RelationshipSetProperty { .. } => "relationship_set_property",
            Self::RelationshipRemoveProperty { .. } => "relationship_remove_property",
            Self::NodeExplicitIndexAdd { .. } => "node_explicit_index_add",
            Self::NodeExplicitIndexRemove { .. } => "node_explicit_index_remove",
            Self::LabelGetOrCreate(_) => "label_get_or_create",
            Self::PropertyKeyGetOrCreate(_) => "property_key_get_or_create",
            Self::RelationshipTypeGetOrCreate(_) => "relationship_type_get_or_create",
            Self::IndexCreate(_) => "index_create",
            Self::IndexDrop(_) => "index_drop",
            Self::UniquenessConstraintCreate(_) => "uniqueness_constraint_create",
            Self::ConstraintDrop(_) => "constraint_drop",
        }
    }

    /// One operation of every variant, for exhaustive hook tests.
    ///
    /// Ids refer to node 1, relationship 1, label 1, type 1 and key 1.
    #[must_use]
    pub fn samples() -> Vec<Operation> {
        let node = NodeId::new(1);
        let rel = RelationshipId::new(1);
        let label = LabelId::new(1);
        let rel_type = RelationshipTypeId::new(1);
        let key = PropertyKeyId::new(1);
        let schema = SchemaDescriptor::for_label(label, [key]);
        vec![
            Self::NodeExists(node),
            Self::NodeGetLabels(node),
            Self::NodeHasLabel { node, label },
            Self::NodeGetProperty { node, key },
            Self::NodesGetAll,
            Self::NodesGetForLabel(label),
            Self::NodeGetRelationships(node),
            Self::RelationshipGetProperty { rel, key },
            Self::IndexGetForSchema(schema.clone()),
            Self::IndexesGetAll,
            Self::ConstraintsGetAll,
            Self::CountsForNode(Some(label)),
            Self::CountsForRelationship {
                start_label: None,
                rel_type: Some(rel_type),
                end_label: None,
            },
            Self::ExplicitIndexGet {
                index: "people".into(),
                key: "name".into(),
                value: Value::from("ada"),
            },
            Self::NodeCreate,
            Self::NodeDelete(node),
            Self::NodeAddLabel { node, label },
            Self::NodeRemoveLabel { node, label },
            Self::NodeSetProperty {
                node,
                key,
                value: Value::Int(1),
            },
            Self::NodeRemoveProperty { node, key },
            Self::RelationshipCreate {
                rel_type,
                start: node,
                end: node,
            },
            Self::RelationshipDelete(rel),
            Self::RelationshipSetProperty {
                rel,
                key,
                value: Value::Int(1),
            },
            Self::RelationshipRemoveProperty { rel, key },
            Self::NodeExplicitIndexAdd {
                index: "people".into(),
                node,
                key: "name".into(),
                value: Value::from("ada"),
            },
            Self::NodeExplicitIndexRemove {
                index: "people".into(),
                node,
                key: "name".into(),
            },
            Self::LabelGetOrCreate("Person".into()),
            Self::PropertyKeyGetOrCreate("name".into()),
            Self::RelationshipTypeGetOrCreate("KNOWS".into()),
            Self::IndexCreate(schema.clone()),
            Self::IndexDrop(schema.clone()),
            Self::UniquenessConstraintCreate(schema.clone()),
            Self::ConstraintDrop(schema),
        ]
    }
}

/// Result of an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Nothing to return.
    Unit,
    /// A yes/no answer.
    Bool(bool),
    /// A node id.
    Node(NodeId),
    /// Node ids.
    Nodes(Vec<NodeId>),
    /// A relationship id.
    Relationship(RelationshipId),
    /// Relationship ids.
    Relationships(Vec<RelationshipId>),
    /// Label ids.
    Labels(Vec<LabelId>),
    /// A label id.
    Label(LabelId),
    /// A property key id.
    PropertyKey(PropertyKeyId),
    /// A relationship type id.
    RelationshipType(RelationshipTypeId),
    /// A property value, or the previous value for writes.
    Property(Option<Value>),
    /// A created index.
    Index(IndexDescriptor),
    /// An index lookup result.
    MaybeIndex(Option<IndexDescriptor>),
    /// Indexes.
    Indexes(Vec<IndexDescriptor>),
    /// A created constraint.
    Constraint(ConstraintDescriptor),
    /// Constraints.
    Constraints(Vec<ConstraintDescriptor>),
    /// A count.
    Count(i64),
    /// Explicit index hits.
    Entities(Vec<EntityRef>),
}

fn mismatch(expected: &str, actual: &Outcome) -> KernelError {
    KernelError::invalid_operation(format!("expected {expected} outcome, got {actual:?}"))
}

macro_rules! outcome_accessor {
    ($(#[$doc:meta])* $name:ident, $variant:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $name(self) -> KernelResult<$ty> {
            match self {
                Self::$variant(v) => Ok(v),
                other => Err(mismatch(stringify!($variant), &other)),
            }
        }
    };
}

impl Outcome {
    /// Expects [`Outcome::Unit`].
    pub fn into_unit(self) -> KernelResult<()> {
        match self {
            Self::Unit => Ok(()),
            other => Err(mismatch("Unit", &other)),
        }
    }

    outcome_accessor!(
        /// Expects [`Outcome::Bool`].
        into_bool, Bool, bool
    );
    outcome_accessor!(
        /// Expects [`Outcome::Node`].
        into_node, Node, NodeId
    );
    outcome_accessor!(
        /// Expects [`Outcome::Nodes`].
        into_nodes, Nodes, Vec<NodeId>
    );
    outcome_accessor!(
        /// Expects [`Outcome::Relationship`].
        into_relationship, Relationship, RelationshipId
    );
    outcome_accessor!(
        /// Expects [`Outcome::Relationships`].
        into_relationships, Relationships, Vec<RelationshipId>
    );
    outcome_accessor!(
        /// Expects [`Outcome::Labels`].
        into_labels, Labels, Vec<LabelId>
    );
    outcome_accessor!(
        /// Expects [`Outcome::Label`].
        into_label, Label, LabelId
    );
    outcome_accessor!(
        /// Expects [`Outcome::PropertyKey`].
        into_property_key, PropertyKey, PropertyKeyId
    );
    outcome_accessor!(
        /// Expects [`Outcome::RelationshipType`].
        into_relationship_type, RelationshipType, RelationshipTypeId
    );
    outcome_accessor!(
        /// Expects [`Outcome::Property`].
        into_property, Property, Option<Value>
    );
    outcome_accessor!(
        /// Expects [`Outcome::Index`].
        into_index, Index, IndexDescriptor
    );
    outcome_accessor!(
        /// Expects [`Outcome::MaybeIndex`].
        into_maybe_index, MaybeIndex, Option<IndexDescriptor>
    );
    outcome_accessor!(
        /// Expects [`Outcome::Indexes`].
        into_indexes, Indexes, Vec<IndexDescriptor>
    );
    outcome_accessor!(
        /// Expects [`Outcome::Constraint`].
        into_constraint, Constraint, ConstraintDescriptor
    );
    outcome_accessor!(
        /// Expects [`Outcome::Constraints`].
        into_constraints, Constraints, Vec<ConstraintDescriptor>
    );
    outcome_accessor!(
        /// Expects [`Outcome::Count`].
        into_count, Count, i64
    );
    outcome_accessor!(
        /// Expects [`Outcome::Entities`].
        into_entities, Entities, Vec<EntityRef>
    );
}
