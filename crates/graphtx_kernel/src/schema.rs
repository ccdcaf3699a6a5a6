//! Schema descriptors for indexes and constraints.

use crate::error::{KernelError, KernelResult};
use crate::types::{IndexId, LabelId, PropertyKeyId, RelationshipTypeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The entity token a schema rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SchemaTarget {
    /// Nodes carrying the label.
    Label(LabelId),
    /// Relationships of the type.
    RelationshipType(RelationshipTypeId),
}

/// A label or relationship type plus an ordered list of property keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    target: SchemaTarget,
    properties: Vec<PropertyKeyId>,
}

impl SchemaDescriptor {
    /// Creates a descriptor over nodes with `label`.
    pub fn for_label(label: LabelId, properties: impl IntoIterator<Item = PropertyKeyId>) -> Self {
        Self {
            target: SchemaTarget::Label(label),
            properties: properties.into_iter().collect(),
        }
    }

    /// Creates a descriptor over relationships of `rel_type`.
    pub fn for_relationship_type(
        rel_type: RelationshipTypeId,
        properties: impl IntoIterator<Item = PropertyKeyId>,
    ) -> Self {
        Self {
            target: SchemaTarget::RelationshipType(rel_type),
            properties: properties.into_iter().collect(),
        }
    }

    /// Returns the schema target.
    #[must_use]
    pub fn target(&self) -> SchemaTarget {
        self.target
    }

    /// Returns the label if this is a node schema.
    #[must_use]
    pub fn label(&self) -> Option<LabelId> {
        match self.target {
            SchemaTarget::Label(label) => Some(label),
            SchemaTarget::RelationshipType(_) => None,
        }
    }

    /// Returns the property keys in declaration order.
    #[must_use]
    pub fn properties(&self) -> &[PropertyKeyId] {
        &self.properties
    }

    /// Returns `true` if the schema covers more than one property.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        self.properties.len() > 1
    }

    /// Checks that no property appears twice.
    pub fn validate(&self) -> KernelResult<()> {
        let mut seen = BTreeSet::new();
        for &property in &self.properties {
            if !seen.insert(property) {
                return Err(KernelError::RepeatedPropertyInCompositeSchema {
                    schema: self.clone(),
                    property,
                });
            }
        }
        if self.properties.is_empty() {
            return Err(KernelError::invalid_operation(
                "schema descriptor must name at least one property",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            SchemaTarget::Label(label) => write!(f, "(:{label}")?,
            SchemaTarget::RelationshipType(t) => write!(f, "[:{t}")?,
        }
        write!(f, " {{")?;
        for (i, p) in self.properties.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, "}}")?;
        match self.target {
            SchemaTarget::Label(_) => write!(f, ")"),
            SchemaTarget::RelationshipType(_) => write!(f, "]"),
        }
    }
}

/// Kind of a schema index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    /// A plain index created by the user.
    General,
    /// An index owned by a uniqueness constraint.
    UniquenessBacking,
}

/// A schema index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Index id.
    pub id: IndexId,
    /// Indexed schema.
    pub schema: SchemaDescriptor,
    /// General or constraint-backing.
    pub kind: IndexKind,
}

impl IndexDescriptor {
    /// Creates a general index descriptor.
    pub fn general(id: IndexId, schema: SchemaDescriptor) -> Self {
        Self {
            id,
            schema,
            kind: IndexKind::General,
        }
    }

    /// Creates a constraint-backing index descriptor.
    pub fn uniqueness_backing(id: IndexId, schema: SchemaDescriptor) -> Self {
        Self {
            id,
            schema,
            kind: IndexKind::UniquenessBacking,
        }
    }

    /// Returns `true` if the index is owned by a constraint.
    #[must_use]
    pub fn is_constraint_backing(&self) -> bool {
        self.kind == IndexKind::UniquenessBacking
    }
}

impl PartialOrd for IndexDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexDescriptor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id
            .cmp(&other.id)
            .then_with(|| self.schema.cmp(&other.schema))
    }
}

/// A uniqueness constraint and the index that backs it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConstraintDescriptor {
    /// Constrained schema.
    pub schema: SchemaDescriptor,
    /// Id of the owned backing index.
    pub owned_index: IndexId,
}

impl ConstraintDescriptor {
    /// Creates a uniqueness constraint descriptor.
    pub fn uniqueness(schema: SchemaDescriptor, owned_index: IndexId) -> Self {
        Self {
            schema,
            owned_index,
        }
    }

    /// Returns the descriptor of the backing index.
    #[must_use]
    pub fn backing_index(&self) -> IndexDescriptor {
        IndexDescriptor::uniqueness_backing(self.owned_index, self.schema.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(ids: &[u64]) -> Vec<PropertyKeyId> {
        ids.iter().copied().map(PropertyKeyId::new).collect()
    }

    #[test]
    fn composite_schema_with_repeated_property_is_rejected() {
        let schema = SchemaDescriptor::for_label(LabelId::new(1), keys(&[2, 3, 2]));
        let err = schema.validate().unwrap_err();
        assert!(matches!(
            err,
            KernelError::RepeatedPropertyInCompositeSchema { property, .. } if property == PropertyKeyId::new(2)
        ));
    }

    #[test]
    fn composite_schema_without_repeats_is_valid() {
        let schema = SchemaDescriptor::for_label(LabelId::new(1), keys(&[2, 3]));
        assert!(schema.is_composite());
        schema.validate().unwrap();
    }

    #[test]
    fn display_shows_target_and_properties() {
        let schema = SchemaDescriptor::for_label(LabelId::new(1), keys(&[2, 3]));
        assert_eq!(schema.to_string(), "(:label:1 {key:2, key:3})");
    }

    #[test]
    fn constraint_backing_index_shares_schema() {
        let schema = SchemaDescriptor::for_label(LabelId::new(1), keys(&[2]));
        let constraint = ConstraintDescriptor::uniqueness(schema.clone(), IndexId::new(5));
        let index = constraint.backing_index();
        assert!(index.is_constraint_backing());
        assert_eq!(index.schema, schema);
    }
}
