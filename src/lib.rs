//! confdb - A schema-driven, versioned object-graph configuration database
//!
//! This is the root workspace crate that provides integration tests.
//! The actual implementation is in the workspace member crates.

// Re-export main crates for convenience
pub use confdb_core as core;
pub use confdb_schema as schema;
pub use confdb_storage as storage;

pub use confdb_core::{
    Change, ConfigObject, Configuration, Error, ErrorKind, Query, Result, SubscriptionCriteria,
};
pub use confdb_storage::{connect, open};
