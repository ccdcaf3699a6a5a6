//! Core type definitions for the graphtx kernel.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
            Deserialize,
        )]
        pub struct $name(pub u64);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the raw identifier value.
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a committed transaction.
    ///
    /// Transaction ids are assigned at append time, are monotonically
    /// increasing and never reused. Id `0` is reserved for "nothing was
    /// committed" (read-only transactions).
    TransactionId,
    "tx"
);

id_type!(
    /// Identifier of a node.
    NodeId,
    "node"
);

id_type!(
    /// Identifier of a relationship.
    RelationshipId,
    "rel"
);

id_type!(
    /// Token id of a node label.
    LabelId,
    "label"
);

id_type!(
    /// Token id of a relationship type.
    RelationshipTypeId,
    "type"
);

id_type!(
    /// Token id of a property key.
    PropertyKeyId,
    "key"
);

id_type!(
    /// Identifier of a schema index.
    IndexId,
    "index"
);

impl TransactionId {
    /// Id returned by transactions that committed nothing.
    pub const READ_ONLY: Self = Self(0);

    /// Id of the first transaction ever committed.
    pub const FIRST: Self = Self(1);

    /// Returns the next transaction id.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// An entity that can carry properties and appear in explicit indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    /// A node.
    Node(NodeId),
    /// A relationship.
    Relationship(RelationshipId),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => id.fmt(f),
            Self::Relationship(id) => id.fmt(f),
        }
    }
}

/// A property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Bytes(v) => write!(f, "bytes[{}]", v.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_ordering() {
        let t1 = TransactionId::new(1);
        let t2 = t1.next();
        assert!(t1 < t2);
        assert_eq!(t2.as_u64(), 2);
    }

    #[test]
    fn read_only_id_precedes_first() {
        assert!(TransactionId::READ_ONLY < TransactionId::FIRST);
    }

    #[test]
    fn display_prefixes() {
        assert_eq!(format!("{}", NodeId::new(42)), "node:42");
        assert_eq!(format!("{}", LabelId::new(3)), "label:3");
        assert_eq!(
            format!("{}", EntityRef::Relationship(RelationshipId::new(7))),
            "rel:7"
        );
    }

    #[test]
    fn value_conversions() {
        assert_eq!(Value::from(5_i64), Value::Int(5));
        assert_eq!(Value::from("a"), Value::String("a".into()));
        assert_eq!(format!("{}", Value::from("a")), "\"a\"");
    }
}
