//! Relationship descriptors

use crate::yes_no;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How many objects a relationship may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    ExactlyOne,
    ZeroOrOne,
    OneOrMany,
    ZeroOrMany,
}

impl Cardinality {
    /// Derive the cardinality from the two schema flags
    pub fn from_flags(can_be_null: bool, is_multi_value: bool) -> Self {
        match (can_be_null, is_multi_value) {
            (false, false) => Cardinality::ExactlyOne,
            (true, false) => Cardinality::ZeroOrOne,
            (false, true) => Cardinality::OneOrMany,
            (true, true) => Cardinality::ZeroOrMany,
        }
    }

    pub fn can_be_null(self) -> bool {
        matches!(self, Cardinality::ZeroOrOne | Cardinality::ZeroOrMany)
    }

    pub fn is_multi_value(self) -> bool {
        matches!(self, Cardinality::OneOrMany | Cardinality::ZeroOrMany)
    }

    /// Whether `count` referenced objects satisfy this cardinality
    pub fn admits(self, count: usize) -> bool {
        match self {
            Cardinality::ExactlyOne => count == 1,
            Cardinality::ZeroOrOne => count <= 1,
            Cardinality::OneOrMany => count >= 1,
            Cardinality::ZeroOrMany => true,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Cardinality::ExactlyOne => "one",
            Cardinality::ZeroOrOne => "zero or one",
            Cardinality::OneOrMany => "one or many",
            Cardinality::ZeroOrMany => "zero or many",
        })
    }
}

/// Describes one relationship of a class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipSpec {
    name: String,
    class_type: String,
    cardinality: Cardinality,
    is_aggregation: bool,
    description: String,
}

impl RelationshipSpec {
    pub fn new(
        name: impl Into<String>,
        class_type: impl Into<String>,
        can_be_null: bool,
        is_multi_value: bool,
        is_aggregation: bool,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            class_type: class_type.into(),
            cardinality: Cardinality::from_flags(can_be_null, is_multi_value),
            is_aggregation,
            description: description.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the class the relationship points to
    pub fn class_type(&self) -> &str {
        &self.class_type
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// True for composite (owning) relationships, false for weak references
    pub fn is_aggregation(&self) -> bool {
        self.is_aggregation
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn write_prefixed(&self, f: &mut fmt::Formatter<'_>, prefix: &str) -> fmt::Result {
        writeln!(f, "{prefix}relationship '{}'", self.name)?;
        writeln!(f, "{prefix}  class type: '{}'", self.class_type)?;
        writeln!(f, "{prefix}  cardinality: '{}'", self.cardinality)?;
        writeln!(f, "{prefix}  is aggregation: '{}'", yes_no(self.is_aggregation))?;
        write!(f, "{prefix}  description: '{}'", self.description)
    }
}

impl fmt::Display for RelationshipSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_prefixed(f, "")
    }
}
