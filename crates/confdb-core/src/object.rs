//! Object identities and handles
//!
//! A handle is a (class, uid) key resolved through the backend on every
//! access; it owns no object state. Relationship cycles therefore never
//! turn into ownership cycles, and staleness after a reload surfaces as a
//! `NotValid` error instead of stale data.

use crate::{ConfigurationImpl, Query, ReferenceFilter, Result, Session};
use confdb_schema::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identity of an object: class name plus uid unique within the class
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    class_name: String,
    uid: String,
}

impl ObjectId {
    pub fn new(class_name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            uid: uid.into(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}@{}'", self.uid, self.class_name)
    }
}

/// An identity together with the backend incarnation it was resolved at
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    id: ObjectId,
    incarnation: u64,
}

impl ObjectRef {
    pub fn new(id: ObjectId, incarnation: u64) -> Self {
        Self { id, incarnation }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn class_name(&self) -> &str {
        self.id.class_name()
    }

    pub fn uid(&self) -> &str {
        self.id.uid()
    }

    pub fn incarnation(&self) -> u64 {
        self.incarnation
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}

/// Handle to one persisted object.
///
/// Equality and hashing use the (class, uid) identity only.
#[derive(Clone)]
pub struct ConfigObject {
    obj: ObjectRef,
    backend: Arc<dyn ConfigurationImpl>,
    session: Arc<Session>,
}

impl ConfigObject {
    pub fn new(obj: ObjectRef, backend: Arc<dyn ConfigurationImpl>, session: Arc<Session>) -> Self {
        Self {
            obj,
            backend,
            session,
        }
    }

    pub fn class_name(&self) -> &str {
        self.obj.class_name()
    }

    pub fn uid(&self) -> &str {
        self.obj.uid()
    }

    pub fn id(&self) -> &ObjectId {
        self.obj.id()
    }

    pub fn object_ref(&self) -> &ObjectRef {
        &self.obj
    }

    /// True while the handle matches the live object
    pub fn is_valid(&self) -> bool {
        self.backend.validate(&self.obj).is_ok()
    }

    /// Typed value of an attribute; a list for multi-value attributes
    pub fn get(&self, attribute: &str) -> Result<Value> {
        self.backend.get_attribute(&self.obj, attribute)
    }

    pub fn get_relationship(&self, relationship: &str) -> Result<Vec<ConfigObject>> {
        let targets = self.backend.get_relationship(&self.obj, relationship)?;
        Ok(self.wrap_all(targets))
    }

    /// Objects referencing this one through `relationship` (or `*` for any)
    pub fn referenced_by(&self, relationship: &str, include_subclasses: bool) -> Result<Vec<ConfigObject>> {
        let filter = ReferenceFilter::new(relationship, include_subclasses);
        let sources = self.backend.referenced_by(&self.obj, &filter)?;
        Ok(self.wrap_all(sources))
    }

    /// Objects holding this one through an aggregation
    pub fn composite_parents(&self) -> Result<Vec<ConfigObject>> {
        let sources = self
            .backend
            .referenced_by(&self.obj, &ReferenceFilter::composite_parents())?;
        Ok(self.wrap_all(sources))
    }

    /// Objects reachable along a relationship path
    pub fn get_path(&self, query: &Query) -> Result<Vec<ConfigObject>> {
        let found = self.backend.get_path(&self.obj, query)?;
        Ok(self.wrap_all(found))
    }

    /// Stage a new attribute value; validated before it is accepted
    pub fn set(&self, attribute: &str, value: impl Into<Value>) -> Result<()> {
        self.backend
            .set_attribute(&self.session, &self.obj, attribute, value.into())
    }

    pub fn set_relationship(&self, relationship: &str, targets: &[&ConfigObject]) -> Result<()> {
        let refs: Vec<ObjectRef> = targets.iter().map(|t| t.obj.clone()).collect();
        self.backend
            .set_relationship(&self.session, &self.obj, relationship, &refs)
    }

    /// Storage unit holding the object
    pub fn contained_in(&self) -> Result<String> {
        self.backend.contained_in(&self.obj)
    }

    /// Re-resolve a stale handle against the live object
    pub fn revalidate(&mut self) -> Result<()> {
        self.obj = self
            .backend
            .get_object(self.obj.class_name(), self.obj.uid())?;
        Ok(())
    }

    /// Change the uid; other handles to the old identity become stale
    pub fn rename(&mut self, new_uid: &str) -> Result<()> {
        self.obj = self.backend.rename(&self.session, &self.obj, new_uid)?;
        Ok(())
    }

    pub fn move_to(&mut self, db: &str) -> Result<()> {
        self.obj = self.backend.move_object(&self.session, &self.obj, db)?;
        Ok(())
    }

    pub fn destroy(&self) -> Result<()> {
        self.backend.destroy(&self.session, self.obj.id())
    }

    fn wrap_all(&self, refs: Vec<ObjectRef>) -> Vec<ConfigObject> {
        refs.into_iter()
            .map(|obj| ConfigObject::new(obj, Arc::clone(&self.backend), Arc::clone(&self.session)))
            .collect()
    }
}

impl PartialEq for ConfigObject {
    fn eq(&self, other: &Self) -> bool {
        self.obj.id() == other.obj.id()
    }
}

impl Eq for ConfigObject {}

impl Hash for ConfigObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.obj.id().hash(state);
    }
}

impl fmt::Display for ConfigObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.obj.id().fmt(f)
    }
}

impl fmt::Debug for ConfigObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigObject")
            .field("class_name", &self.class_name())
            .field("uid", &self.uid())
            .field("incarnation", &self.obj.incarnation())
            .finish()
    }
}
