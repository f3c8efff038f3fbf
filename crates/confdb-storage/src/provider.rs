//! Storage unit provider interface

use crate::{Result, UnitData};
use confdb_core::Version;
use std::collections::BTreeMap;

/// Pluggable persistence for storage units and the commit history
///
/// A provider knows nothing about schemas or objects: it stores whole units
/// and appends commit records. The object store above it does the rest.
pub trait UnitStore: Send + Sync + 'static {
    // ========== Units ==========

    fn exists(&self, unit: &str) -> Result<bool>;

    /// Read a unit; `UnitNotFound` if it does not exist
    fn load(&self, unit: &str) -> Result<UnitData>;

    /// Revision of a unit without reading its objects
    fn revision(&self, unit: &str) -> Result<Option<String>> {
        Ok(self.load(unit)?.revision)
    }

    /// Write a new unit; `UnitExists` if the name is taken
    fn create(&self, unit: &str, data: &UnitData) -> Result<()>;

    /// Delete a unit; `UnitNotFound` if it does not exist
    fn remove(&self, unit: &str) -> Result<()>;

    fn is_writable(&self, unit: &str) -> Result<bool>;

    /// Names of all units known to the provider
    fn list(&self) -> Result<Vec<String>>;

    // ========== Commits ==========

    /// Write the given units and record the commit that wrote them
    fn save(&self, units: &[(String, UnitData)], version: &Version) -> Result<()>;

    /// All recorded commits, oldest first
    fn history(&self) -> Result<Vec<Version>>;

    fn tag(&self, tag: &str, version_id: &str) -> Result<()>;

    /// Tag name to version id
    fn tags(&self) -> Result<BTreeMap<String, String>>;

    /// Short description for logs
    fn describe(&self) -> String;
}
