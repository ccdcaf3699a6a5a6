//! Name to id registries for labels, relationship types and property keys.

use crate::error::{KernelError, KernelResult};
use crate::types::{LabelId, PropertyKeyId, RelationshipTypeId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Checks a token name, returning the reason it is illegal.
pub fn check_token_name(name: &str) -> KernelResult<()> {
    let reason = if name.is_empty() {
        "name must not be empty"
    } else if name.contains('\0') {
        "name must not contain NUL characters"
    } else {
        return Ok(());
    };
    Err(KernelError::IllegalTokenName {
        name: name.to_owned(),
        reason,
    })
}

#[derive(Debug, Default)]
struct Registry {
    by_name: HashMap<String, u64>,
    names: Vec<String>,
}

impl Registry {
    fn get_or_create(&mut self, name: &str) -> u64 {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = self.names.len() as u64;
        self.names.push(name.to_owned());
        self.by_name.insert(name.to_owned(), id);
        id
    }
}

/// Shared token registries.
///
/// Token ids are dense and never reused. Token creation is not
/// transactional: a token created by a rolled-back transaction stays.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    labels: RwLock<Registry>,
    relationship_types: RwLock<Registry>,
    property_keys: RwLock<Registry>,
}

impl TokenRegistry {
    /// Creates empty registries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a label id by name.
    pub fn label(&self, name: &str) -> Option<LabelId> {
        self.labels.read().by_name.get(name).copied().map(LabelId::new)
    }

    /// Returns the id of the label, creating it if needed.
    pub fn label_get_or_create(&self, name: &str) -> KernelResult<LabelId> {
        check_token_name(name)?;
        if let Some(id) = self.label(name) {
            return Ok(id);
        }
        Ok(LabelId::new(self.labels.write().get_or_create(name)))
    }

    /// Returns the name of a label.
    pub fn label_name(&self, id: LabelId) -> Option<String> {
        self.labels.read().names.get(id.as_u64() as usize).cloned()
    }

    /// Looks up a relationship type id by name.
    pub fn relationship_type(&self, name: &str) -> Option<RelationshipTypeId> {
        self.relationship_types
            .read()
            .by_name
            .get(name)
            .copied()
            .map(RelationshipTypeId::new)
    }

    /// Returns the id of the relationship type, creating it if needed.
    pub fn relationship_type_get_or_create(&self, name: &str) -> KernelResult<RelationshipTypeId> {
        check_token_name(name)?;
        if let Some(id) = self.relationship_type(name) {
            return Ok(id);
        }
        Ok(RelationshipTypeId::new(
            self.relationship_types.write().get_or_create(name),
        ))
    }

    /// Looks up a property key id by name.
    pub fn property_key(&self, name: &str) -> Option<PropertyKeyId> {
        self.property_keys
            .read()
            .by_name
            .get(name)
            .copied()
            .map(PropertyKeyId::new)
    }

    /// Returns the id of the property key, creating it if needed.
    pub fn property_key_get_or_create(&self, name: &str) -> KernelResult<PropertyKeyId> {
        check_token_name(name)?;
        if let Some(id) = self.property_key(name) {
            return Ok(id);
        }
        Ok(PropertyKeyId::new(
            self.property_keys.write().get_or_create(name),
        ))
    }

    /// Returns the name of a property key.
    pub fn property_key_name(&self, id: PropertyKeyId) -> Option<String> {
        self.property_keys
            .read()
            .names
            .get(id.as_u64() as usize)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent() {
        let tokens = TokenRegistry::new();
        let a = tokens.label_get_or_create("Person").unwrap();
        let b = tokens.label_get_or_create("Person").unwrap();
        let c = tokens.label_get_or_create("City").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(tokens.label_name(c).as_deref(), Some("City"));
    }

    #[test]
    fn namespaces_are_separate() {
        let tokens = TokenRegistry::new();
        let label = tokens.label_get_or_create("name").unwrap();
        let key = tokens.property_key_get_or_create("name").unwrap();
        assert_eq!(label.as_u64(), key.as_u64());
        assert!(tokens.relationship_type("name").is_none());
    }

    #[test]
    fn illegal_names_are_rejected() {
        let tokens = TokenRegistry::new();
        let empty = tokens.property_key_get_or_create("").unwrap_err();
        assert!(matches!(empty, KernelError::IllegalTokenName { .. }));
        let nul = tokens.relationship_type_get_or_create("a\0b").unwrap_err();
        assert!(nul.is_schema_violation());
    }
}
