//! Storage commands and the transaction representations carrying them.

use crate::schema::{ConstraintDescriptor, IndexDescriptor};
use crate::state::{CountsKey, ExplicitIndexChange, RelationshipRecord};
use crate::types::{LabelId, NodeId, PropertyKeyId, RelationshipId, TransactionId, Value};
use serde::{Deserialize, Serialize};

/// A physical change to storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StorageCommand {
    /// Create a node record.
    NodeCreate {
        /// Node id.
        id: NodeId,
    },
    /// Delete a node record.
    NodeDelete {
        /// Node id.
        id: NodeId,
    },
    /// Change the labels of a node.
    NodeLabels {
        /// Node id.
        id: NodeId,
        /// Labels to add.
        added: Vec<LabelId>,
        /// Labels to remove.
        removed: Vec<LabelId>,
    },
    /// Change the properties of a node.
    NodeProperties {
        /// Node id.
        id: NodeId,
        /// Properties to set.
        set: Vec<(PropertyKeyId, Value)>,
        /// Properties to remove.
        removed: Vec<PropertyKeyId>,
    },
    /// Create a relationship record.
    RelationshipCreate {
        /// Relationship id.
        id: RelationshipId,
        /// Type and endpoints.
        record: RelationshipRecord,
    },
    /// Delete a relationship record.
    RelationshipDelete {
        /// Relationship id.
        id: RelationshipId,
    },
    /// Change the properties of a relationship.
    RelationshipProperties {
        /// Relationship id.
        id: RelationshipId,
        /// Properties to set.
        set: Vec<(PropertyKeyId, Value)>,
        /// Properties to remove.
        removed: Vec<PropertyKeyId>,
    },
    /// Create an index.
    IndexCreate(IndexDescriptor),
    /// Drop an index.
    IndexDrop(IndexDescriptor),
    /// Create a constraint.
    ConstraintCreate(ConstraintDescriptor),
    /// Drop a constraint.
    ConstraintDrop(ConstraintDescriptor),
    /// Change an explicit index.
    ExplicitIndex(ExplicitIndexChange),
    /// Adjust counts.
    Counts(Vec<(CountsKey, i64)>),
}

/// Coarse grouping of commands, used for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Node records, labels and properties.
    Node,
    /// Relationship records and properties.
    Relationship,
    /// Indexes and constraints.
    Schema,
    /// Explicit indexes.
    ExplicitIndex,
    /// Count deltas.
    Counts,
}

impl StorageCommand {
    /// Returns the group this command belongs to.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::NodeCreate { .. }
            | Self::NodeDelete { .. }
            | Self::NodeLabels { .. }
            | Self::NodeProperties { .. } => CommandKind::Node,
            Self::RelationshipCreate { .. }
            | Self::RelationshipDelete { .. }
            | Self::RelationshipProperties { .. } => CommandKind::Relationship,
            Self::IndexCreate(_)
            | Self::IndexDrop(_)
            | Self::ConstraintCreate(_)
            | Self::ConstraintDrop(_) => CommandKind::Schema,
            Self::ExplicitIndex(_) => CommandKind::ExplicitIndex,
            Self::Counts(_) => CommandKind::Counts,
        }
    }
}

/// Metadata written with every transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionHeader {
    /// When the transaction started, in milliseconds.
    pub start_millis: u64,
    /// When the transaction committed, in milliseconds.
    pub commit_millis: u64,
    /// Last committed transaction when commands were created.
    pub last_committed_at_start: TransactionId,
}

/// The commands of one transaction plus its header.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransactionRepresentation {
    /// Header fields.
    pub header: TransactionHeader,
    /// Commands in application order.
    pub commands: Vec<StorageCommand>,
}

impl TransactionRepresentation {
    /// Creates a representation.
    #[must_use]
    pub fn new(commands: Vec<StorageCommand>, header: TransactionHeader) -> Self {
        Self { header, commands }
    }

    /// Returns `true` if explicit index commands must be applied in order.
    #[must_use]
    pub fn has_explicit_index_commands(&self) -> bool {
        self.commands
            .iter()
            .any(|c| c.kind() == CommandKind::ExplicitIndex)
    }
}

/// A transaction on its way through append and apply.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionToApply {
    representation: TransactionRepresentation,
    tx_id: TransactionId,
}

impl TransactionToApply {
    /// Wraps a representation; the id is assigned at append time.
    #[must_use]
    pub fn new(representation: TransactionRepresentation) -> Self {
        Self {
            representation,
            tx_id: TransactionId::READ_ONLY,
        }
    }

    /// Wraps a representation that already has an id.
    #[must_use]
    pub fn with_id(representation: TransactionRepresentation, tx_id: TransactionId) -> Self {
        Self {
            representation,
            tx_id,
        }
    }

    /// The transaction's commands and header.
    #[must_use]
    pub fn representation(&self) -> &TransactionRepresentation {
        &self.representation
    }

    /// Assigned id; [`TransactionId::READ_ONLY`] before append.
    #[must_use]
    pub fn tx_id(&self) -> TransactionId {
        self.tx_id
    }

    pub(crate) fn set_tx_id(&mut self, tx_id: TransactionId) {
        self.tx_id = tx_id;
    }

    /// Returns `true` if this transaction takes part in commit ordering.
    #[must_use]
    pub fn requires_ordering(&self) -> bool {
        self.representation.has_explicit_index_commands()
    }
}
