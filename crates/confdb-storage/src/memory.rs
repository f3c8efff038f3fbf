//! In-memory storage implementation
//!
//! Non-persistent, primarily for tests and short-lived tools. Clones share
//! the same data, so several backends over one `InMemoryStorage` observe
//! each other's commits the way processes sharing a repository would.

use crate::{Result, StorageError, UnitData, UnitStore};
use confdb_core::Version;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    units: BTreeMap<String, UnitData>,
    read_only: BTreeSet<String>,
    history: Vec<Version>,
    tags: BTreeMap<String, String>,
}

#[derive(Clone, Default)]
pub struct InMemoryStorage {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a unit read-only (or writable again)
    pub fn set_read_only(&self, unit: &str, read_only: bool) {
        let mut inner = self.inner.write();
        if read_only {
            inner.read_only.insert(unit.to_string());
        } else {
            inner.read_only.remove(unit);
        }
    }
}

impl UnitStore for InMemoryStorage {
    fn exists(&self, unit: &str) -> Result<bool> {
        Ok(self.inner.read().units.contains_key(unit))
    }

    fn load(&self, unit: &str) -> Result<UnitData> {
        self.inner
            .read()
            .units
            .get(unit)
            .cloned()
            .ok_or_else(|| StorageError::UnitNotFound(unit.to_string()))
    }

    fn revision(&self, unit: &str) -> Result<Option<String>> {
        self.inner
            .read()
            .units
            .get(unit)
            .map(|data| data.revision.clone())
            .ok_or_else(|| StorageError::UnitNotFound(unit.to_string()))
    }

    fn create(&self, unit: &str, data: &UnitData) -> Result<()> {
        if unit.is_empty() {
            return Err(StorageError::InvalidName(unit.to_string()));
        }
        let mut inner = self.inner.write();
        if inner.units.contains_key(unit) {
            return Err(StorageError::UnitExists(unit.to_string()));
        }
        inner.units.insert(unit.to_string(), data.clone());
        Ok(())
    }

    fn remove(&self, unit: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner.read_only.remove(unit);
        inner
            .units
            .remove(unit)
            .map(|_| ())
            .ok_or_else(|| StorageError::UnitNotFound(unit.to_string()))
    }

    fn is_writable(&self, unit: &str) -> Result<bool> {
        let inner = self.inner.read();
        if !inner.units.contains_key(unit) {
            return Err(StorageError::UnitNotFound(unit.to_string()));
        }
        Ok(!inner.read_only.contains(unit))
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().units.keys().cloned().collect())
    }

    fn save(&self, units: &[(String, UnitData)], version: &Version) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some((name, _)) = units.iter().find(|(name, _)| inner.read_only.contains(name)) {
            return Err(StorageError::ReadOnly(name.clone()));
        }
        for (name, data) in units {
            inner.units.insert(name.clone(), data.clone());
        }
        inner.history.push(version.clone());
        Ok(())
    }

    fn history(&self) -> Result<Vec<Version>> {
        Ok(self.inner.read().history.clone())
    }

    fn tag(&self, tag: &str, version_id: &str) -> Result<()> {
        self.inner
            .write()
            .tags
            .insert(tag.to_string(), version_id.to_string());
        Ok(())
    }

    fn tags(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.inner.read().tags.clone())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_load() {
        let storage = InMemoryStorage::new();
        storage.create("a", &UnitData::with_includes(["b"])).unwrap();
        assert!(storage.exists("a").unwrap());
        assert_eq!(storage.load("a").unwrap().includes, vec!["b".to_string()]);
        assert!(matches!(
            storage.create("a", &UnitData::new()),
            Err(StorageError::UnitExists(_))
        ));
        assert!(matches!(storage.load("b"), Err(StorageError::UnitNotFound(_))));
    }

    #[test]
    fn test_read_only_save_is_refused_whole() {
        let storage = InMemoryStorage::new();
        storage.create("a", &UnitData::new()).unwrap();
        storage.create("b", &UnitData::new()).unwrap();
        storage.set_read_only("b", true);
        assert!(!storage.is_writable("b").unwrap());

        let mut data = UnitData::new();
        data.revision = Some("r1".into());
        let version = Version::new("r1", "alice", 0, "", vec!["a".into(), "b".into()]);
        let units = vec![("a".to_string(), data.clone()), ("b".to_string(), data)];
        assert!(matches!(storage.save(&units, &version), Err(StorageError::ReadOnly(_))));
        assert_eq!(storage.revision("a").unwrap(), None);
        assert!(storage.history().unwrap().is_empty());
    }

    #[test]
    fn test_clones_share_data() {
        let storage = InMemoryStorage::new();
        let other = storage.clone();
        storage.create("a", &UnitData::new()).unwrap();
        other.tag("v1", "abc").unwrap();
        assert!(other.exists("a").unwrap());
        assert_eq!(storage.tags().unwrap()["v1"], "abc");
    }
}
