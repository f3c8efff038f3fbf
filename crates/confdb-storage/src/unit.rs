//! Persisted form of a storage unit

use confdb_core::ObjectId;
use confdb_schema::{ClassSpec, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One object as written to a storage unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub class_name: String,
    pub uid: String,
    pub attributes: BTreeMap<String, Value>,
    pub relationships: BTreeMap<String, Vec<ObjectId>>,
}

impl StoredObject {
    pub fn new(class_name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            uid: uid.into(),
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        ObjectId::new(self.class_name.clone(), self.uid.clone())
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_relationship(mut self, name: impl Into<String>, targets: Vec<ObjectId>) -> Self {
        self.relationships.insert(name.into(), targets);
        self
    }

    /// Drop every reference to `target`; returns whether anything was removed
    pub(crate) fn unlink(&mut self, target: &ObjectId) -> bool {
        let mut removed = false;
        for targets in self.relationships.values_mut() {
            let before = targets.len();
            targets.retain(|t| t != target);
            removed |= targets.len() != before;
        }
        removed
    }

    /// Point every reference to `from` at `to`; returns whether anything changed
    pub(crate) fn relink(&mut self, from: &ObjectId, to: &ObjectId) -> bool {
        let mut changed = false;
        for target in self.relationships.values_mut().flat_map(|t| t.iter_mut()) {
            if target == from {
                *target = to.clone();
                changed = true;
            }
        }
        changed
    }
}

/// Everything a storage unit holds: includes, schema fragment and objects
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitData {
    pub includes: Vec<String>,
    pub classes: Vec<ClassSpec>,
    pub objects: Vec<StoredObject>,
    /// Id of the commit that last wrote the unit
    pub revision: Option<String>,
}

impl UnitData {
    pub fn new() -> Self {
        Self::default()
    }

    /// A unit that only carries includes
    pub fn with_includes(includes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            includes: includes.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// A schema unit holding class definitions
    pub fn with_classes(classes: impl IntoIterator<Item = ClassSpec>) -> Self {
        Self {
            classes: classes.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_object(mut self, object: StoredObject) -> Self {
        self.objects.push(object);
        self
    }
}
