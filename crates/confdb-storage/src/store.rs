//! Loaded object graph of one database
//!
//! A `Store` is the closure of a root storage unit over its includes: the
//! units, their merged schema and every object they hold. Each mutation is
//! checked completely before anything is written, so a failed call leaves
//! the store untouched. Mutations record the touched units and the changes
//! for the next commit.

use crate::{StorageError, StoredObject, UnitData, UnitStore};
use confdb_core::{validate, ChangeBatch, Error, ObjectId, ObjectRef, ReferenceFilter, Result, Schema};
use confdb_schema::{ClassSpec, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub object: StoredObject,
    pub unit: String,
    pub incarnation: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct Unit {
    pub includes: Vec<String>,
    pub classes: Vec<ClassSpec>,
    pub revision: Option<String>,
    pub writable: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Store {
    roots: Vec<String>,
    units: BTreeMap<String, Unit>,
    objects: BTreeMap<ObjectId, Entry>,
    schema: Schema,
    dirty: BTreeSet<String>,
    pending: ChangeBatch,
    incarnations: Arc<AtomicU64>,
}

impl Store {
    /// Load the given root units and everything they include
    pub fn open(storage: &dyn UnitStore, roots: &[String], incarnations: Arc<AtomicU64>) -> Result<Self> {
        let mut store = Store {
            roots: roots.to_vec(),
            incarnations,
            ..Store::default()
        };
        for root in roots {
            store.load_closure(storage, root)?;
        }
        store.rebuild_schema()?;
        debug!(
            target: "confdb::backend",
            units = store.units.len(),
            objects = store.objects.len(),
            classes = store.schema.class_names().count(),
            "loaded database"
        );
        Ok(store)
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn unit_names(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }

    pub fn unit_revision(&self, name: &str) -> Option<&str> {
        self.units.get(name)?.revision.as_deref()
    }

    pub fn includes(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.unit(name)?.includes.clone())
    }

    pub fn is_writable(&self, name: &str) -> Result<bool> {
        Ok(self.unit(name)?.writable)
    }

    /// Units with uncommitted changes
    pub fn dirty(&self) -> &BTreeSet<String> {
        &self.dirty
    }

    /// Persisted form of a loaded unit
    pub fn unit_data(&self, name: &str) -> Result<UnitData> {
        let unit = self.unit(name)?;
        Ok(UnitData {
            includes: unit.includes.clone(),
            classes: unit.classes.clone(),
            objects: self
                .objects
                .values()
                .filter(|e| e.unit == name)
                .map(|e| e.object.clone())
                .collect(),
            revision: unit.revision.clone(),
        })
    }

    /// Stamp the dirty units with a committed revision and hand out the
    /// changes collected since the last commit
    pub fn mark_committed(&mut self, revision: &str) -> ChangeBatch {
        for name in std::mem::take(&mut self.dirty) {
            if let Some(unit) = self.units.get_mut(&name) {
                unit.revision = Some(revision.to_string());
            }
        }
        std::mem::take(&mut self.pending)
    }

    /// Give unchanged objects of `previous` their old incarnation back so
    /// their handles stay valid across a reload
    pub fn adopt_incarnations(&mut self, previous: &Store) {
        for (id, entry) in self.objects.iter_mut() {
            if let Some(old) = previous.objects.get(id) {
                if old.unit == entry.unit && old.object == entry.object {
                    entry.incarnation = old.incarnation;
                }
            }
        }
    }

    /// Object-level difference between two loads of the same database
    pub fn diff(old: &Store, new: &Store) -> ChangeBatch {
        let mut batch = ChangeBatch::new();
        for (id, entry) in &old.objects {
            match new.objects.get(id) {
                None => batch.deleted(id.class_name(), id.uid()),
                Some(now) if now.object != entry.object || now.unit != entry.unit => {
                    batch.changed(id.class_name(), id.uid())
                }
                Some(_) => {}
            }
        }
        for id in new.objects.keys().filter(|id| !old.objects.contains_key(*id)) {
            batch.created(id.class_name(), id.uid());
        }
        batch
    }

    // ========== Lookup ==========

    /// Check a reference against the live object
    pub fn resolve(&self, obj: &ObjectRef) -> Result<&Entry> {
        match self.objects.get(obj.id()) {
            Some(entry) if entry.incarnation == obj.incarnation() => Ok(entry),
            Some(_) => Err(Error::not_valid(format!(
                "handle of object {obj} is stale: the object was reloaded, moved or renamed"
            ))),
            None => Err(Error::not_valid(format!("object {obj} does not exist anymore"))),
        }
    }

    fn object_ref(&self, id: &ObjectId) -> Option<ObjectRef> {
        self.objects
            .get(id)
            .map(|entry| ObjectRef::new(id.clone(), entry.incarnation))
    }

    /// Find an object of `class` or of one of its subclasses
    pub fn lookup(&self, class: &str, uid: &str) -> Result<ObjectRef> {
        self.check_class(class)?;
        std::iter::once(class)
            .chain(self.schema.subclasses_of(class).iter().map(String::as_str))
            .find_map(|c| self.object_ref(&ObjectId::new(c, uid)))
            .ok_or_else(|| Error::not_found(format!("object '{uid}@{class}'")))
    }

    /// All objects of a class and its subclasses
    pub fn instances(&self, class: &str) -> Result<Vec<(ObjectRef, &StoredObject)>> {
        self.check_class(class)?;
        let classes: BTreeSet<&str> = std::iter::once(class)
            .chain(self.schema.subclasses_of(class).iter().map(String::as_str))
            .collect();
        Ok(self
            .objects
            .iter()
            .filter(|(id, _)| classes.contains(id.class_name()))
            .map(|(id, entry)| (ObjectRef::new(id.clone(), entry.incarnation), &entry.object))
            .collect())
    }

    pub fn get_attribute(&self, obj: &ObjectRef, name: &str) -> Result<Value> {
        let entry = self.resolve(obj)?;
        let spec = self
            .schema
            .attribute(obj.class_name(), name)
            .ok_or_else(|| Error::not_found(format!("attribute '{name}' of class '{}'", obj.class_name())))?;
        match entry.object.attributes.get(name) {
            Some(value) => Ok(value.clone()),
            None => Ok(spec.typed_default()?),
        }
    }

    pub fn get_relationship(&self, obj: &ObjectRef, name: &str) -> Result<Vec<ObjectRef>> {
        let entry = self.resolve(obj)?;
        self.schema
            .relationship(obj.class_name(), name)
            .ok_or_else(|| Error::not_found(format!("relationship '{name}' of class '{}'", obj.class_name())))?;
        Ok(entry
            .object
            .relationships
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|id| self.object_ref(id))
            .collect())
    }

    /// Targets of every relationship of `obj`, or of the named one; dangling ids skipped
    pub fn targets(&self, obj: &ObjectRef, relationship: Option<&str>) -> Result<Vec<ObjectRef>> {
        let entry = self.resolve(obj)?;
        Ok(entry
            .object
            .relationships
            .iter()
            .filter(|(name, _)| relationship.map_or(true, |r| r == name.as_str()))
            .flat_map(|(_, targets)| targets)
            .filter_map(|id| self.object_ref(id))
            .collect())
    }

    pub fn referenced_by(&self, obj: &ObjectRef, filter: &ReferenceFilter) -> Result<Vec<ObjectRef>> {
        self.resolve(obj)?;
        let mut sources = Vec::new();
        for (id, entry) in &self.objects {
            let refers = entry.object.relationships.iter().any(|(name, targets)| {
                if !filter.matches_name(name) || !targets.contains(obj.id()) {
                    return false;
                }
                let Some(spec) = self.schema.relationship(id.class_name(), name) else {
                    return false;
                };
                (!filter.composite_only || spec.is_aggregation())
                    && (filter.include_subclasses || spec.class_type() == obj.class_name())
            });
            if refers {
                sources.push(ObjectRef::new(id.clone(), entry.incarnation));
            }
        }
        Ok(sources)
    }

    pub fn contained_in(&self, obj: &ObjectRef) -> Result<String> {
        Ok(self.resolve(obj)?.unit.clone())
    }

    // ========== Mutations ==========

    pub fn create_object(&mut self, unit: &str, class: &str, uid: &str) -> Result<ObjectRef> {
        self.check_writable(unit)?;
        let spec = self
            .schema
            .effective(class)
            .ok_or_else(|| Error::not_found(format!("class '{class}'")))?;
        if spec.is_abstract() {
            return Err(Error::not_allowed(format!("class '{class}' is abstract")));
        }
        if uid.is_empty() {
            return Err(Error::not_valid("object uid cannot be empty"));
        }
        let id = ObjectId::new(class, uid);
        if self.objects.contains_key(&id) {
            return Err(Error::already_exists(format!("object {id}")));
        }

        let mut object = StoredObject::new(class, uid);
        for attribute in spec.attributes() {
            object
                .attributes
                .insert(attribute.name().to_string(), attribute.typed_default()?);
        }
        for relationship in spec.relationships() {
            object
                .relationships
                .insert(relationship.name().to_string(), Vec::new());
        }

        let incarnation = self.fresh_incarnation();
        self.objects.insert(
            id.clone(),
            Entry {
                object,
                unit: unit.to_string(),
                incarnation,
            },
        );
        self.touch(unit);
        self.pending.created(class, uid);
        Ok(ObjectRef::new(id, incarnation))
    }

    pub fn set_attribute(&mut self, obj: &ObjectRef, name: &str, value: Value) -> Result<()> {
        let unit = self.resolve(obj)?.unit.clone();
        self.check_writable(&unit)?;
        let spec = self
            .schema
            .attribute(obj.class_name(), name)
            .ok_or_else(|| Error::not_found(format!("attribute '{name}' of class '{}'", obj.class_name())))?;
        let value = validate::check_attribute_value(spec, value)?;

        if let Some(entry) = self.objects.get_mut(obj.id()) {
            entry.object.attributes.insert(name.to_string(), value);
        }
        self.touch(&unit);
        self.pending.changed(obj.class_name(), obj.uid());
        Ok(())
    }

    pub fn set_relationship(&mut self, obj: &ObjectRef, name: &str, targets: &[ObjectRef]) -> Result<()> {
        let unit = self.resolve(obj)?.unit.clone();
        self.check_writable(&unit)?;
        let spec = self
            .schema
            .relationship(obj.class_name(), name)
            .ok_or_else(|| Error::not_found(format!("relationship '{name}' of class '{}'", obj.class_name())))?;
        let ids = targets
            .iter()
            .map(|target| self.resolve(target).map(|_| target.id().clone()))
            .collect::<Result<Vec<_>>>()?;
        validate::check_relationship_targets(&self.schema, spec, &ids)?;

        if let Some(entry) = self.objects.get_mut(obj.id()) {
            entry.object.relationships.insert(name.to_string(), ids);
        }
        self.touch(&unit);
        self.pending.changed(obj.class_name(), obj.uid());
        Ok(())
    }

    /// Remove an object together with the objects only it aggregates
    pub fn destroy(&mut self, id: &ObjectId) -> Result<()> {
        if !self.objects.contains_key(id) {
            return Err(Error::not_found(format!("object {id}")));
        }

        let doomed = self.aggregation_closure(id);
        for victim in &doomed {
            if let Some((owner, relationship)) = self
                .owners(victim)
                .into_iter()
                .find(|(owner, _)| !doomed.contains(owner))
            {
                return Err(Error::not_allowed(format!(
                    "object {victim} is held by relationship '{relationship}' of {owner}"
                )));
            }
            if let Some(entry) = self.objects.get(victim) {
                self.check_writable(&entry.unit)?;
            }
        }

        // references from survivors lose the destroyed objects
        let mut updates = Vec::new();
        for (source, entry) in &self.objects {
            if doomed.contains(source) {
                continue;
            }
            let mut object = entry.object.clone();
            let touched = doomed.iter().fold(false, |acc, victim| object.unlink(victim) | acc);
            if !touched {
                continue;
            }
            for (name, targets) in &object.relationships {
                let before = entry.object.relationships.get(name).map_or(0, Vec::len);
                let Some(spec) = self.schema.relationship(source.class_name(), name) else {
                    continue;
                };
                if before != targets.len() && !spec.cardinality().admits(targets.len()) {
                    return Err(Error::not_allowed(format!(
                        "destroying {id} would leave required relationship '{name}' of {source} empty"
                    )));
                }
            }
            self.check_writable(&entry.unit)?;
            updates.push((source.clone(), object));
        }

        if doomed.len() > 1 {
            debug!(target: "confdb::backend", object = %id, cascaded = doomed.len() - 1, "destroy cascades to aggregated objects");
        }
        for victim in &doomed {
            if let Some(entry) = self.objects.remove(victim) {
                self.touch(&entry.unit);
                self.pending.deleted(victim.class_name(), victim.uid());
            }
        }
        for (source, object) in updates {
            if let Some(entry) = self.objects.get_mut(&source) {
                entry.object = object;
                let unit = entry.unit.clone();
                self.touch(&unit);
                self.pending.changed(source.class_name(), source.uid());
            }
        }
        Ok(())
    }

    pub fn move_object(&mut self, obj: &ObjectRef, unit: &str) -> Result<ObjectRef> {
        let from = self.resolve(obj)?.unit.clone();
        self.unit(unit)?;
        if from == unit {
            return Ok(obj.clone());
        }
        self.check_writable(&from)?;
        self.check_writable(unit)?;

        let incarnation = self.fresh_incarnation();
        if let Some(entry) = self.objects.get_mut(obj.id()) {
            entry.unit = unit.to_string();
            entry.incarnation = incarnation;
        }
        self.touch(&from);
        self.touch(unit);
        self.pending.changed(obj.class_name(), obj.uid());
        Ok(ObjectRef::new(obj.id().clone(), incarnation))
    }

    pub fn rename(&mut self, obj: &ObjectRef, new_uid: &str) -> Result<ObjectRef> {
        let unit = self.resolve(obj)?.unit.clone();
        if new_uid == obj.uid() {
            return Ok(obj.clone());
        }
        if new_uid.is_empty() {
            return Err(Error::not_valid("object uid cannot be empty"));
        }
        self.check_writable(&unit)?;
        let new_id = ObjectId::new(obj.class_name(), new_uid);
        if self.objects.contains_key(&new_id) {
            return Err(Error::already_exists(format!("object {new_id}")));
        }

        let referrers: Vec<ObjectId> = self
            .objects
            .iter()
            .filter(|(id, entry)| {
                *id != obj.id()
                    && entry
                        .object
                        .relationships
                        .values()
                        .any(|targets| targets.contains(obj.id()))
            })
            .map(|(id, _)| id.clone())
            .collect();
        for referrer in &referrers {
            if let Some(entry) = self.objects.get(referrer) {
                self.check_writable(&entry.unit)?;
            }
        }

        let Some(mut entry) = self.objects.remove(obj.id()) else {
            return Err(Error::not_valid(format!("object {obj} does not exist anymore")));
        };
        entry.object.uid = new_uid.to_string();
        entry.object.relink(obj.id(), &new_id);
        entry.incarnation = self.fresh_incarnation();
        let incarnation = entry.incarnation;
        self.objects.insert(new_id.clone(), entry);

        for referrer in referrers {
            if let Some(entry) = self.objects.get_mut(&referrer) {
                entry.object.relink(obj.id(), &new_id);
                let unit = entry.unit.clone();
                self.touch(&unit);
                self.pending.changed(referrer.class_name(), referrer.uid());
            }
        }
        self.touch(&unit);
        self.pending.deleted(obj.class_name(), obj.uid());
        self.pending.created(obj.class_name(), new_uid);
        Ok(ObjectRef::new(new_id, incarnation))
    }

    // ========== Units ==========

    /// Load a new root unit (and its includes) next to the loaded ones
    pub fn attach(&mut self, storage: &dyn UnitStore, name: &str) -> Result<()> {
        let mut next = self.clone();
        next.roots.push(name.to_string());
        next.load_closure(storage, name)?;
        next.rebuild_schema()?;
        *self = next;
        Ok(())
    }

    pub fn add_include(&mut self, storage: &dyn UnitStore, name: &str, include: &str) -> Result<()> {
        self.check_writable(name)?;
        if !storage.exists(include).map_err(Error::from)? {
            return Err(Error::not_found(format!("storage unit '{include}'")));
        }
        if self.unit(name)?.includes.iter().any(|i| i == include) {
            return Err(Error::already_exists(format!("'{name}' already includes '{include}'")));
        }

        let mut next = self.clone();
        next.load_closure(storage, include)?;
        if next.reaches(include, name) {
            return Err(Error::not_allowed(format!(
                "including '{include}' into '{name}' would make the includes cyclic"
            )));
        }
        if let Some(unit) = next.units.get_mut(name) {
            unit.includes.push(include.to_string());
        }
        next.rebuild_schema()?;
        next.touch(name);
        *self = next;
        Ok(())
    }

    pub fn remove_include(&mut self, name: &str, include: &str) -> Result<()> {
        self.check_writable(name)?;
        let mut next = self.clone();
        let Some(unit) = next.units.get_mut(name) else {
            return Err(Error::not_found(format!("storage unit '{name}' is not loaded")));
        };
        let Some(pos) = unit.includes.iter().position(|i| i == include) else {
            return Err(Error::not_found(format!("'{name}' does not include '{include}'")));
        };
        unit.includes.remove(pos);

        let reachable = next.reachable();
        next.units.retain(|unit, _| reachable.contains(unit));
        next.objects.retain(|_, entry| reachable.contains(&entry.unit));
        next.dirty.retain(|unit| reachable.contains(unit));
        next.rebuild_schema()?;
        next.touch(name);
        *self = next;
        Ok(())
    }

    // ========== Internals ==========

    fn unit(&self, name: &str) -> Result<&Unit> {
        self.units
            .get(name)
            .ok_or_else(|| Error::not_found(format!("storage unit '{name}' is not loaded")))
    }

    fn check_writable(&self, name: &str) -> Result<()> {
        if self.unit(name)?.writable {
            Ok(())
        } else {
            Err(Error::not_allowed(format!("storage unit '{name}' is read-only")))
        }
    }

    fn check_class(&self, class: &str) -> Result<()> {
        if self.schema.contains(class) {
            Ok(())
        } else {
            Err(Error::not_found(format!("class '{class}'")))
        }
    }

    fn fresh_incarnation(&self) -> u64 {
        self.incarnations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn touch(&mut self, unit: &str) {
        self.dirty.insert(unit.to_string());
    }

    fn load_closure(&mut self, storage: &dyn UnitStore, start: &str) -> Result<()> {
        let mut queue = VecDeque::from([(start.to_string(), None::<String>)]);
        while let Some((name, included_by)) = queue.pop_front() {
            if self.units.contains_key(&name) {
                continue;
            }
            let data = match storage.load(&name) {
                Ok(data) => data,
                Err(StorageError::UnitNotFound(_)) => {
                    return Err(Error::not_found(match included_by {
                        Some(parent) => format!("storage unit '{name}' included by '{parent}'"),
                        None => format!("storage unit '{name}'"),
                    }));
                }
                Err(e) => return Err(e.into()),
            };
            let writable = storage.is_writable(&name)?;

            for object in data.objects {
                let id = object.id();
                if let Some(existing) = self.objects.get(&id) {
                    return Err(Error::not_valid(format!(
                        "object {id} is defined in both '{}' and '{name}'",
                        existing.unit
                    )));
                }
                let incarnation = self.fresh_incarnation();
                self.objects.insert(
                    id,
                    Entry {
                        object,
                        unit: name.clone(),
                        incarnation,
                    },
                );
            }
            for include in &data.includes {
                queue.push_back((include.clone(), Some(name.clone())));
            }
            self.units.insert(
                name,
                Unit {
                    includes: data.includes,
                    classes: data.classes,
                    revision: data.revision,
                    writable,
                },
            );
        }
        Ok(())
    }

    fn rebuild_schema(&mut self) -> Result<()> {
        let schema = Schema::from_classes(self.units.values().flat_map(|u| u.classes.iter().cloned()))?;
        if let Some(entry) = self
            .objects
            .values()
            .find(|e| !schema.contains(&e.object.class_name))
        {
            return Err(Error::not_valid(format!(
                "object {} in '{}' has a class missing from the loaded schema",
                entry.object.id(),
                entry.unit
            )));
        }
        self.schema = schema;
        Ok(())
    }

    /// Units reachable from the roots over includes
    fn reachable(&self) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = self.roots.iter().map(String::as_str).collect();
        while let Some(name) = stack.pop() {
            if !seen.insert(name.to_string()) {
                continue;
            }
            if let Some(unit) = self.units.get(name) {
                stack.extend(unit.includes.iter().map(String::as_str));
            }
        }
        seen
    }

    /// True if `to` is `from` or one of its (transitive) includes
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut seen = BTreeSet::new();
        let mut stack = vec![from];
        while let Some(name) = stack.pop() {
            if name == to {
                return true;
            }
            if !seen.insert(name) {
                continue;
            }
            if let Some(unit) = self.units.get(name) {
                stack.extend(unit.includes.iter().map(String::as_str));
            }
        }
        false
    }

    /// Objects holding `id` through an aggregation, with the relationship name
    fn owners(&self, id: &ObjectId) -> Vec<(ObjectId, String)> {
        let mut owners = Vec::new();
        for (source, entry) in &self.objects {
            for (name, targets) in &entry.object.relationships {
                let aggregation = self
                    .schema
                    .relationship(source.class_name(), name)
                    .is_some_and(|spec| spec.is_aggregation());
                if aggregation && targets.contains(id) {
                    owners.push((source.clone(), name.clone()));
                }
            }
        }
        owners
    }

    /// `root` plus every object aggregated only by objects of the set
    fn aggregation_closure(&self, root: &ObjectId) -> BTreeSet<ObjectId> {
        let mut doomed = BTreeSet::from([root.clone()]);
        loop {
            let mut grew = false;
            let candidates: Vec<ObjectId> = doomed
                .iter()
                .filter_map(|id| self.objects.get(id).map(|entry| (id, entry)))
                .flat_map(|(id, entry)| {
                    entry
                        .object
                        .relationships
                        .iter()
                        .filter(|(name, _)| {
                            self.schema
                                .relationship(id.class_name(), name)
                                .is_some_and(|spec| spec.is_aggregation())
                        })
                        .flat_map(|(_, targets)| targets.iter().cloned())
                })
                .collect();
            for target in candidates {
                if doomed.contains(&target) || !self.objects.contains_key(&target) {
                    continue;
                }
                if self.owners(&target).iter().all(|(owner, _)| doomed.contains(owner)) {
                    doomed.insert(target);
                    grew = true;
                }
            }
            if !grew {
                return doomed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStorage;
    use confdb_core::ErrorKind;
    use confdb_schema::{AttributeSpec, AttributeType, RelationshipSpec};

    fn schema_unit() -> UnitData {
        UnitData::with_classes([
            ClassSpec::new("Component", "", true)
                .with_attribute(AttributeSpec::simple("enabled", AttributeType::Bool)),
            ClassSpec::new("Host", "", false)
                .with_superclass("Component")
                .with_attribute(AttributeSpec::simple("port", AttributeType::U16))
                .with_relationship(RelationshipSpec::new("cards", "Card", true, true, true, ""))
                .with_relationship(RelationshipSpec::new("peer", "Host", true, false, false, "")),
            ClassSpec::new("Card", "", false).with_superclass("Component"),
            ClassSpec::new("Rack", "", false)
                .with_relationship(RelationshipSpec::new("hosts", "Host", false, true, false, "")),
        ])
    }

    fn open() -> (InMemoryStorage, Store) {
        let storage = InMemoryStorage::new();
        storage.create("schema", &schema_unit()).unwrap();
        storage.create("data", &UnitData::with_includes(["schema"])).unwrap();
        let store = Store::open(&storage, &["data".to_string()], Arc::default()).unwrap();
        (storage, store)
    }

    #[test]
    fn test_open_follows_includes() {
        let (_, store) = open();
        assert_eq!(store.unit_names().collect::<Vec<_>>(), vec!["data", "schema"]);
        assert!(store.schema().contains("Host"));
        assert!(store.dirty().is_empty());
    }

    #[test]
    fn test_open_missing_include_is_not_found() {
        let storage = InMemoryStorage::new();
        storage.create("data", &UnitData::with_includes(["nope"])).unwrap();
        let err = Store::open(&storage, &["data".to_string()], Arc::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_create_uses_defaults_and_records_change() {
        let (_, mut store) = open();
        let host = store.create_object("data", "Host", "h1").unwrap();
        assert_eq!(store.get_attribute(&host, "port").unwrap(), Value::U16(0));
        assert_eq!(store.get_attribute(&host, "enabled").unwrap(), Value::Bool(false));
        assert!(store.dirty().contains("data"));

        let err = store.create_object("data", "Host", "h1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        let err = store.create_object("data", "Component", "c").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAllowed);
        let err = store.create_object("data", "Nope", "c").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let changes = store.mark_committed("r1").into_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].created(), ["h1".to_string()]);
        assert_eq!(store.unit_revision("data"), Some("r1"));
    }

    #[test]
    fn test_lookup_finds_subclass_instances() {
        let (_, mut store) = open();
        store.create_object("data", "Host", "h1").unwrap();
        store.create_object("data", "Card", "c1").unwrap();
        assert_eq!(store.lookup("Component", "h1").unwrap().class_name(), "Host");
        assert_eq!(store.instances("Component").unwrap().len(), 2);
        assert_eq!(store.lookup("Host", "c1").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_destroy_cascades_and_unlinks() {
        let (_, mut store) = open();
        let h1 = store.create_object("data", "Host", "h1").unwrap();
        let h2 = store.create_object("data", "Host", "h2").unwrap();
        let card = store.create_object("data", "Card", "c1").unwrap();
        store.set_relationship(&h1, "cards", &[card.clone()]).unwrap();
        store.set_relationship(&h2, "peer", &[h1.clone()]).unwrap();

        // a card held by its host cannot go on its own
        let err = store.destroy(card.id()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAllowed);

        store.mark_committed("r1");
        store.destroy(h1.id()).unwrap();
        assert_eq!(store.resolve(&card).unwrap_err().kind(), ErrorKind::NotValid);
        assert!(store.get_relationship(&h2, "peer").unwrap().is_empty());

        let changes = store.mark_committed("r2").into_changes();
        let host = changes.iter().find(|c| c.class_name() == "Host").unwrap();
        assert_eq!(host.deleted(), ["h1".to_string()]);
        assert_eq!(host.changed(), ["h2".to_string()]);
        let cards = changes.iter().find(|c| c.class_name() == "Card").unwrap();
        assert_eq!(cards.deleted(), ["c1".to_string()]);

        assert_eq!(store.destroy(h1.id()).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_destroy_refused_when_required_reference_would_empty() {
        let (_, mut store) = open();
        let host = store.create_object("data", "Host", "h1").unwrap();
        let rack = store.create_object("data", "Rack", "r1").unwrap();
        store.set_relationship(&rack, "hosts", &[host.clone()]).unwrap();

        let err = store.destroy(host.id()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAllowed);
        assert!(store.resolve(&host).is_ok());
    }

    #[test]
    fn test_rename_rewrites_references() {
        let (_, mut store) = open();
        let h1 = store.create_object("data", "Host", "h1").unwrap();
        let h2 = store.create_object("data", "Host", "h2").unwrap();
        store.set_relationship(&h2, "peer", &[h1.clone()]).unwrap();

        let renamed = store.rename(&h1, "h9").unwrap();
        assert_eq!(store.resolve(&h1).unwrap_err().kind(), ErrorKind::NotValid);
        assert_eq!(store.get_relationship(&h2, "peer").unwrap(), vec![renamed]);
        assert_eq!(store.rename(&h2, "h9").unwrap_err().kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_relationship_validation() {
        let (_, mut store) = open();
        let h1 = store.create_object("data", "Host", "h1").unwrap();
        let rack = store.create_object("data", "Rack", "r1").unwrap();

        let err = store.set_relationship(&h1, "peer", &[rack.clone()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotValid);
        let err = store.set_relationship(&rack, "hosts", &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotValid);
        let err = store.set_relationship(&h1, "nope", &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_referenced_by_filters() {
        let (_, mut store) = open();
        let h1 = store.create_object("data", "Host", "h1").unwrap();
        let h2 = store.create_object("data", "Host", "h2").unwrap();
        let card = store.create_object("data", "Card", "c1").unwrap();
        store.set_relationship(&h1, "cards", &[card.clone()]).unwrap();
        store.set_relationship(&h2, "peer", &[h1.clone()]).unwrap();

        let all = store.referenced_by(&h1, &ReferenceFilter::new("*", false)).unwrap();
        assert_eq!(all, vec![h2.clone()]);
        let owners = store
            .referenced_by(&card, &ReferenceFilter::composite_parents())
            .unwrap();
        assert_eq!(owners, vec![h1.clone()]);
        assert!(store
            .referenced_by(&h1, &ReferenceFilter::composite_parents())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_include_cycle_is_refused() {
        let (storage, mut store) = open();
        let err = store.add_include(&storage, "schema", "data").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAllowed);
        let err = store.add_include(&storage, "data", "data").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAllowed);
        let err = store.add_include(&storage, "data", "schema").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        let err = store.add_include(&storage, "data", "missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_remove_include_unloads_unreachable_units() {
        let (storage, mut store) = open();
        storage
            .create(
                "extra",
                &UnitData::new().with_object(StoredObject::new("Card", "spare")),
            )
            .unwrap();
        store.add_include(&storage, "data", "extra").unwrap();
        assert!(store.lookup("Card", "spare").is_ok());

        store.remove_include("data", "extra").unwrap();
        assert!(!store.unit_names().any(|u| u == "extra"));
        assert_eq!(store.lookup("Card", "spare").unwrap_err().kind(), ErrorKind::NotFound);
        let err = store.remove_include("data", "extra").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_read_only_unit_refuses_writes() {
        let storage = InMemoryStorage::new();
        storage.create("schema", &schema_unit()).unwrap();
        storage.set_read_only("schema", true);
        let mut store = Store::open(&storage, &["schema".to_string()], Arc::default()).unwrap();
        let err = store.create_object("schema", "Host", "h1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAllowed);
    }

    #[test]
    fn test_diff_and_adopted_incarnations() {
        let (storage, mut store) = open();
        let h1 = store.create_object("data", "Host", "h1").unwrap();
        store.create_object("data", "Host", "h2").unwrap();
        let data = store.unit_data("data").unwrap();
        storage.save(&[("data".to_string(), data)], &confdb_core::Version::new("r1", "a", 0, "", vec![])).unwrap();

        let old = Store::open(&storage, &["data".to_string()], Arc::default()).unwrap();
        let mut next = old.clone();
        let h2 = next.lookup("Host", "h2").unwrap();
        next.set_attribute(&h2, "port", Value::U16(22)).unwrap();
        next.destroy(h1.id()).unwrap();
        next.create_object("data", "Card", "c1").unwrap();

        let mut reloaded = Store::open(&storage, &["data".to_string()], Arc::default()).unwrap();
        reloaded.adopt_incarnations(&old);
        assert!(reloaded.resolve(&old.lookup("Host", "h2").unwrap()).is_ok());

        let changes = Store::diff(&old, &next).into_changes();
        let hosts = changes.iter().find(|c| c.class_name() == "Host").unwrap();
        assert_eq!(hosts.deleted(), ["h1".to_string()]);
        assert_eq!(hosts.changed(), ["h2".to_string()]);
        let cards = changes.iter().find(|c| c.class_name() == "Card").unwrap();
        assert_eq!(cards.created(), ["c1".to_string()]);
    }
}
