//! The pluggable backend contract
//!
//! Every storage engine implements [`ConfigurationImpl`]. The facade holds
//! one backend behind `Arc<dyn ConfigurationImpl>` and never downcasts.
//!
//! Objects are addressed through [`ObjectRef`]: the (class, uid) identity
//! plus the incarnation the backend handed out. A backend reports
//! `NotValid` when an object reference no longer matches the live object
//! (destroyed, moved, renamed or reloaded since it was obtained).

use crate::{
    Error, ObjectId, ObjectRef, Query, Result, Session, SubscriptionCriteria, Version,
    VersionQueryType,
};
use confdb_schema::{ClassSpec, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Which inverse edges `referenced_by` reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceFilter {
    /// Relationship name, or `*` for any relationship
    pub relationship: String,
    /// Also count relationships declared for a superclass of the object's class
    pub include_subclasses: bool,
    /// Only count aggregation (owning) relationships
    pub composite_only: bool,
}

impl ReferenceFilter {
    pub fn new(relationship: impl Into<String>, include_subclasses: bool) -> Self {
        Self {
            relationship: relationship.into(),
            include_subclasses,
            composite_only: false,
        }
    }

    /// Owners of an object: any aggregation, any declared class
    pub fn composite_parents() -> Self {
        Self {
            relationship: "*".to_string(),
            include_subclasses: true,
            composite_only: true,
        }
    }

    pub fn matches_name(&self, relationship: &str) -> bool {
        self.relationship == "*" || self.relationship == relationship
    }
}

/// Storage engine capability set
pub trait ConfigurationImpl: Send + Sync {
    // ========== Lifecycle ==========

    /// Load a database and everything it includes
    fn open_db(&self, session: &Session, db: &str) -> Result<()>;

    /// Unload the database; every outstanding object reference becomes stale
    fn close_db(&self, session: &Session) -> Result<()>;

    fn loaded(&self) -> bool;

    // ========== Storage units ==========

    /// Create a storage unit on a remote server.
    ///
    /// Backends without a server notion report `NotAllowed`.
    fn create_db_on_server(
        &self,
        _session: &Session,
        server: &str,
        db: &str,
        _includes: &[String],
    ) -> Result<()> {
        Err(Error::not_allowed(format!(
            "cannot create '{db}' on server '{server}': backend has no server support"
        )))
    }

    /// Create a new storage unit with the given includes and add it to the loaded set
    fn create_db(&self, session: &Session, db: &str, includes: &[String]) -> Result<()>;

    fn is_writable(&self, db: &str) -> Result<bool>;

    fn add_include(&self, session: &Session, db: &str, include: &str) -> Result<()>;

    fn remove_include(&self, session: &Session, db: &str, include: &str) -> Result<()>;

    /// Direct includes of a loaded unit
    fn get_includes(&self, db: &str) -> Result<Vec<String>>;

    /// Units with uncommitted changes
    fn get_updated_dbs(&self) -> Result<Vec<String>>;

    // ========== Transactions ==========

    fn set_commit_credentials(&self, session: &Session, user: &str, password: &str) -> Result<()>;

    /// Make staged changes durable; returns whether anything was written
    fn commit(&self, session: &Session, reason: &str) -> Result<bool>;

    /// Discard staged changes
    fn abort(&self, session: &Session) -> Result<()>;

    // ========== Schema ==========

    /// Class name to all superclass names of the loaded schema
    fn get_superclasses(&self) -> Result<BTreeMap<String, Vec<String>>>;

    fn get_class(&self, class: &str, direct_only: bool) -> Result<ClassSpec>;

    // ========== Objects ==========

    fn get_object(&self, class: &str, uid: &str) -> Result<ObjectRef>;

    /// Instances of a class and of its subclasses matching the query
    fn get_objects(&self, class: &str, query: &Query) -> Result<Vec<ObjectRef>>;

    /// Objects reachable from `from` along the query's relationship path
    fn get_path(&self, from: &ObjectRef, query: &Query) -> Result<Vec<ObjectRef>>;

    /// Syntax pre-check of query text; backends without one accept everything
    fn check_query(&self, _text: &str) -> Result<()> {
        Ok(())
    }

    /// Create an object in the given storage unit
    fn create_object(&self, session: &Session, db: &str, class: &str, uid: &str) -> Result<ObjectRef>;

    /// Create an object in the storage unit holding `at`
    fn create_object_at(
        &self,
        session: &Session,
        at: &ObjectRef,
        class: &str,
        uid: &str,
    ) -> Result<ObjectRef> {
        let db = self.contained_in(at)?;
        self.create_object(session, &db, class, uid)
    }

    /// Remove an object by identity; `NotFound` if it does not exist
    fn destroy(&self, session: &Session, id: &ObjectId) -> Result<()>;

    /// Relocate an object to another storage unit, keeping its identity
    fn move_object(&self, session: &Session, obj: &ObjectRef, db: &str) -> Result<ObjectRef>;

    /// Change the uid of an object, rewriting references to it
    fn rename(&self, session: &Session, obj: &ObjectRef, new_uid: &str) -> Result<ObjectRef>;

    fn contained_in(&self, obj: &ObjectRef) -> Result<String>;

    /// Check that the reference still matches the live object
    fn validate(&self, obj: &ObjectRef) -> Result<()>;

    fn get_attribute(&self, obj: &ObjectRef, name: &str) -> Result<Value>;

    fn set_attribute(&self, session: &Session, obj: &ObjectRef, name: &str, value: Value) -> Result<()>;

    fn get_relationship(&self, obj: &ObjectRef, name: &str) -> Result<Vec<ObjectRef>>;

    fn set_relationship(
        &self,
        session: &Session,
        obj: &ObjectRef,
        name: &str,
        targets: &[ObjectRef],
    ) -> Result<()>;

    /// Objects whose relationships point at `obj`
    fn referenced_by(&self, obj: &ObjectRef, filter: &ReferenceFilter) -> Result<Vec<ObjectRef>>;

    // ========== Notification ==========

    /// Install the session's single subscription scope, replacing any previous one
    fn subscribe(&self, session: &Arc<Session>, criteria: SubscriptionCriteria) -> Result<()>;

    fn unsubscribe(&self, session: &Session) -> Result<()>;

    // ========== History ==========

    /// Commits seen since the database was opened
    fn get_changes(&self) -> Result<Vec<Version>>;

    fn get_versions(
        &self,
        since: &str,
        until: &str,
        query_type: VersionQueryType,
        skip_irrelevant: bool,
    ) -> Result<Vec<Version>>;

    /// Attach a tag to a version, for `ByTag` queries
    fn tag_version(&self, session: &Session, id: &str, tag: &str) -> Result<()>;
}
