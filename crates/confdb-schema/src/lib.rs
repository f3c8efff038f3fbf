//! Confdb Schema - Descriptors for the configuration object model
//!
//! This crate holds the immutable value types returned by schema
//! introspection and the typed attribute values stored on objects:
//! - `AttributeSpec`: name, primitive type, range, radix, flags, default
//! - `RelationshipSpec`: target class, cardinality, aggregation flag
//! - `ClassSpec`: one class with its super/subclasses, attributes and relationships
//! - `Value`: a typed attribute value (single or multi-value)
//!
//! Nothing in here talks to a backend. Malformed schemas are rejected by the
//! schema registry in `confdb-core` when a database is loaded.

mod attribute;
mod class;
mod range;
mod relationship;
mod value;

pub use attribute::{AttributeSpec, AttributeType, IntFormat};
pub use class::ClassSpec;
pub use range::{Range, RangeItem};
pub use relationship::{Cardinality, RelationshipSpec};
pub use value::{ParseValueError, Value};

pub(crate) fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
