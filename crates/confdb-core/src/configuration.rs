//! The configuration facade
//!
//! Wraps one backend and one session. Many user subscriptions are folded
//! into the session's single backend scope; every incoming batch is split
//! back per subscription and queued on the notification dispatcher.

use crate::{
    Callback, CallbackId, Change, ChangeSink, ConfigObject, ConfigurationImpl, DispatcherConfig,
    Error, NotificationDispatcher, Parameter, Query, Result, Session, Subscription,
    SubscriptionCriteria, Version, VersionQueryType,
};
use confdb_schema::{ClassSpec, Value};
use parking_lot::Mutex;
use serde_json::{json, Map, Value as Json};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Dispatcher slot reserved for the action hooks
const ACTIONS_ID: CallbackId = 0;

/// Hooks informed about database life-cycle events.
///
/// `notify` runs on the dispatcher like any subscriber callback.
pub trait ConfigAction: Send + Sync {
    fn notify(&self, _changes: &[Change]) {}
    fn load(&self) {}
    fn unload(&self) {}
}

/// Which objects `export_data` writes; empty lists select everything
#[derive(Debug, Clone, Default)]
pub struct ExportFilter {
    pub classes: Vec<String>,
    pub objects: Vec<String>,
    pub files: Vec<String>,
}

type ActionList = Arc<Mutex<Vec<Arc<dyn ConfigAction>>>>;

struct Hub {
    subscriptions: Mutex<BTreeMap<CallbackId, Arc<Subscription>>>,
    actions: ActionList,
    actions_subscription: Arc<Subscription>,
    dispatcher: NotificationDispatcher,
}

impl ChangeSink for Hub {
    fn deliver(&self, changes: Vec<Change>) {
        if !self.actions.lock().is_empty() {
            let queued = self
                .dispatcher
                .dispatch(ACTIONS_ID, Arc::clone(&self.actions_subscription), changes.clone());
            if queued.is_err() {
                warn!(target: "confdb::notify", "action hooks skipped: notification queue is full");
            }
        }

        // held while queueing so a returned unsubscribe sees no later batch
        let subscriptions = self.subscriptions.lock();
        for (id, subscription) in subscriptions.iter() {
            let selected = subscription.criteria().select(&changes);
            if selected.is_empty() {
                continue;
            }
            if let Err(e) = self.dispatcher.dispatch(*id, Arc::clone(subscription), selected) {
                warn!(target: "confdb::notify", callback = *id, "batch dropped: {e}");
            }
        }
    }
}

/// Application-facing entry point to a configuration database
pub struct Configuration {
    backend: Arc<dyn ConfigurationImpl>,
    session: Arc<Session>,
    hub: Arc<Hub>,
    next_id: AtomicU64,
}

impl Configuration {
    pub fn new(backend: Arc<dyn ConfigurationImpl>) -> Result<Self> {
        Self::with_dispatcher(backend, DispatcherConfig::default())
    }

    pub fn with_dispatcher(backend: Arc<dyn ConfigurationImpl>, config: DispatcherConfig) -> Result<Self> {
        let actions: ActionList = Arc::new(Mutex::new(Vec::new()));
        let hooks = Arc::clone(&actions);
        let run_actions = move |changes: &[Change], _: &Parameter| -> crate::CallbackResult {
            let hooks = hooks.lock().clone();
            for hook in hooks {
                hook.notify(changes);
            }
            Ok(())
        };

        let hub = Arc::new(Hub {
            subscriptions: Mutex::new(BTreeMap::new()),
            actions,
            actions_subscription: Arc::new(Subscription::new(
                SubscriptionCriteria::new(),
                Arc::new(run_actions),
                Arc::new(()),
            )),
            dispatcher: NotificationDispatcher::new(config)?,
        });
        let session = Arc::new(Session::with_sink(Arc::clone(&hub) as Arc<dyn ChangeSink>));

        Ok(Self {
            backend,
            session,
            hub,
            next_id: AtomicU64::new(ACTIONS_ID + 1),
        })
    }

    pub fn backend(&self) -> &Arc<dyn ConfigurationImpl> {
        &self.backend
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    // ========== Lifecycle ==========

    pub fn open_db(&self, db: &str) -> Result<()> {
        self.backend.open_db(&self.session, db)?;
        info!(target: "confdb::backend", db, "database loaded");
        for action in self.actions() {
            action.load();
        }
        Ok(())
    }

    pub fn close_db(&self) -> Result<()> {
        for action in self.actions() {
            action.unload();
        }
        self.backend.close_db(&self.session)?;
        info!(target: "confdb::backend", "database unloaded");
        Ok(())
    }

    pub fn loaded(&self) -> bool {
        self.backend.loaded()
    }

    // ========== Storage units ==========

    pub fn create_db(&self, db: &str, includes: &[&str]) -> Result<()> {
        self.backend.create_db(&self.session, db, &owned(includes))
    }

    pub fn create_db_on_server(&self, server: &str, db: &str, includes: &[&str]) -> Result<()> {
        self.backend
            .create_db_on_server(&self.session, server, db, &owned(includes))
    }

    pub fn is_writable(&self, db: &str) -> Result<bool> {
        self.backend.is_writable(db)
    }

    pub fn add_include(&self, db: &str, include: &str) -> Result<()> {
        self.backend.add_include(&self.session, db, include)
    }

    pub fn remove_include(&self, db: &str, include: &str) -> Result<()> {
        self.backend.remove_include(&self.session, db, include)
    }

    pub fn get_includes(&self, db: &str) -> Result<Vec<String>> {
        self.backend.get_includes(db)
    }

    pub fn get_updated_dbs(&self) -> Result<Vec<String>> {
        self.backend.get_updated_dbs()
    }

    // ========== Transactions ==========

    pub fn set_commit_credentials(&self, user: &str, password: &str) -> Result<()> {
        self.backend
            .set_commit_credentials(&self.session, user, password)
    }

    pub fn commit(&self, reason: &str) -> Result<bool> {
        self.backend.commit(&self.session, reason)
    }

    pub fn abort(&self) -> Result<()> {
        self.backend.abort(&self.session)
    }

    // ========== Schema ==========

    pub fn get_superclasses(&self) -> Result<BTreeMap<String, Vec<String>>> {
        self.backend.get_superclasses()
    }

    pub fn is_subclass_of(&self, class: &str, ancestor: &str) -> Result<bool> {
        let superclasses = self.backend.get_superclasses()?;
        let supers = superclasses
            .get(class)
            .ok_or_else(|| Error::not_found(format!("class '{class}'")))?;
        Ok(class == ancestor || supers.iter().any(|s| s == ancestor))
    }

    pub fn get_class(&self, class: &str, direct_only: bool) -> Result<ClassSpec> {
        self.backend.get_class(class, direct_only)
    }

    // ========== Objects ==========

    /// Build a query, letting the backend reject bad syntax up front
    pub fn query(&self, text: &str) -> Result<Query> {
        self.backend.check_query(text).map_err(|e| match e {
            Error::BadQuery(_) => e,
            other => Error::bad_query(other.to_string()),
        })?;
        Ok(Query::new(text))
    }

    pub fn get_object(&self, class: &str, uid: &str) -> Result<ConfigObject> {
        let obj = self.backend.get_object(class, uid)?;
        Ok(self.wrap(obj))
    }

    pub fn get_objects(&self, class: &str, query: &Query) -> Result<Vec<ConfigObject>> {
        let found = self.backend.get_objects(class, query)?;
        Ok(found.into_iter().map(|obj| self.wrap(obj)).collect())
    }

    pub fn get_path(&self, from: &ConfigObject, query: &Query) -> Result<Vec<ConfigObject>> {
        from.get_path(query)
    }

    pub fn create_object(&self, db: &str, class: &str, uid: &str) -> Result<ConfigObject> {
        let obj = self.backend.create_object(&self.session, db, class, uid)?;
        Ok(self.wrap(obj))
    }

    /// Create an object in the same storage unit as `at`
    pub fn create_object_at(&self, at: &ConfigObject, class: &str, uid: &str) -> Result<ConfigObject> {
        let obj = self
            .backend
            .create_object_at(&self.session, at.object_ref(), class, uid)?;
        Ok(self.wrap(obj))
    }

    /// Destroy an object by identity; `NotFound` when there is no such object
    pub fn destroy(&self, class: &str, uid: &str) -> Result<()> {
        self.backend
            .destroy(&self.session, &crate::ObjectId::new(class, uid))
    }

    pub fn move_object(&self, obj: &mut ConfigObject, db: &str) -> Result<()> {
        obj.move_to(db)
    }

    // ========== Notification ==========

    /// Register a callback for changes matching `criteria` (empty: everything)
    pub fn subscribe(
        &self,
        criteria: SubscriptionCriteria,
        callback: impl Callback + 'static,
        parameter: Parameter,
    ) -> Result<CallbackId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscription = Arc::new(Subscription::new(criteria, Arc::new(callback), parameter));
        self.hub.subscriptions.lock().insert(id, subscription);

        if let Err(e) = self.reset_subscription() {
            self.hub.subscriptions.lock().remove(&id);
            return Err(e);
        }
        debug!(target: "confdb::notify", callback = id, "subscribed");
        Ok(id)
    }

    /// Remove one subscription, or all of them with `None`
    pub fn unsubscribe(&self, id: Option<CallbackId>) -> Result<()> {
        let removed: Vec<CallbackId> = {
            let mut subscriptions = self.hub.subscriptions.lock();
            match id {
                Some(id) => {
                    if subscriptions.remove(&id).is_none() {
                        return Err(Error::generic(format!("there is no subscription with id {id}")));
                    }
                    vec![id]
                }
                None => {
                    let all = subscriptions.keys().copied().collect();
                    subscriptions.clear();
                    all
                }
            }
        };
        for id in removed {
            self.hub.dispatcher.forget(id);
        }
        self.reset_subscription()
    }

    pub fn add_action(&self, action: Arc<dyn ConfigAction>) {
        self.hub.actions.lock().push(action);
    }

    pub fn remove_action(&self, action: &Arc<dyn ConfigAction>) {
        self.hub
            .actions
            .lock()
            .retain(|registered| !Arc::ptr_eq(registered, action));
    }

    /// Wait until every queued notification has been handled
    pub fn flush_notifications(&self) {
        self.hub.dispatcher.drain();
    }

    fn reset_subscription(&self) -> Result<()> {
        let merged = {
            let subscriptions = self.hub.subscriptions.lock();
            if subscriptions.is_empty() {
                None
            } else {
                Some(SubscriptionCriteria::merged(
                    subscriptions.values().map(|s| s.criteria()),
                ))
            }
        };
        match merged {
            Some(criteria) => self.backend.subscribe(&self.session, criteria),
            None => self.backend.unsubscribe(&self.session),
        }
    }

    // ========== History ==========

    pub fn get_changes(&self) -> Result<Vec<Version>> {
        self.backend.get_changes()
    }

    pub fn get_versions(
        &self,
        since: &str,
        until: &str,
        query_type: VersionQueryType,
        skip_irrelevant: bool,
    ) -> Result<Vec<Version>> {
        self.backend
            .get_versions(since, until, query_type, skip_irrelevant)
    }

    pub fn tag_version(&self, id: &str, tag: &str) -> Result<()> {
        self.backend.tag_version(&self.session, id, tag)
    }

    // ========== Export ==========

    /// Class descriptors as a JSON tree keyed by class name
    pub fn export_schema(&self, classes: &[&str], direct_only: bool) -> Result<Json> {
        let mut tree = Map::new();
        for name in self.backend.get_superclasses()?.keys() {
            if !classes.is_empty() && !classes.contains(&name.as_str()) {
                continue;
            }
            let class = self.backend.get_class(name, direct_only)?;
            tree.insert(name.clone(), class_to_json(&class));
        }
        Ok(Json::Object(tree))
    }

    /// Object data as a JSON tree: class name, then uid, then member values
    pub fn export_data(&self, filter: &ExportFilter) -> Result<Json> {
        let mut tree = Map::new();
        for name in self.backend.get_superclasses()?.keys() {
            if !filter.classes.is_empty() && !filter.classes.contains(name) {
                continue;
            }
            let class = self.backend.get_class(name, false)?;

            let mut objects = Map::new();
            for obj in self.get_objects(name, &Query::all())? {
                if obj.class_name() != name {
                    continue;
                }
                if !filter.objects.is_empty() && !filter.objects.iter().any(|o| o == obj.uid()) {
                    continue;
                }
                if !filter.files.is_empty() && !filter.files.contains(&obj.contained_in()?) {
                    continue;
                }
                objects.insert(obj.uid().to_string(), object_to_json(&class, &obj)?);
            }

            if !objects.is_empty() {
                tree.insert(name.clone(), Json::Object(objects));
            }
        }
        Ok(Json::Object(tree))
    }

    fn wrap(&self, obj: crate::ObjectRef) -> ConfigObject {
        ConfigObject::new(obj, Arc::clone(&self.backend), Arc::clone(&self.session))
    }

    fn actions(&self) -> Vec<Arc<dyn ConfigAction>> {
        self.hub.actions.lock().clone()
    }
}

impl Drop for Configuration {
    fn drop(&mut self) {
        if self.session.is_subscribed() {
            if let Err(e) = self.backend.unsubscribe(&self.session) {
                warn!(target: "confdb::notify", "unsubscribe on drop failed: {e}");
            }
        }
    }
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn class_to_json(class: &ClassSpec) -> Json {
    let mut node = Map::new();
    node.insert("abstract".into(), json!(class.is_abstract()));
    if !class.description().is_empty() {
        node.insert("description".into(), json!(class.description()));
    }
    if !class.superclasses().is_empty() {
        node.insert("superclasses".into(), json!(class.superclasses()));
    }

    if !class.attributes().is_empty() {
        let mut attributes = Map::new();
        for a in class.attributes() {
            let mut attr = Map::new();
            attr.insert("type".into(), json!(a.attribute_type().short_name()));
            if !a.range().is_unconstrained() {
                attr.insert("range".into(), json!(a.range().as_str()));
            }
            if a.int_format() != confdb_schema::IntFormat::NotApplicable {
                attr.insert("format".into(), json!(a.int_format().to_string()));
            }
            if a.is_not_null() {
                attr.insert("is-not-null".into(), json!(true));
            }
            if a.is_multi_value() {
                attr.insert("is-multi-value".into(), json!(true));
            }
            if !a.default_value().is_empty() {
                attr.insert("default-value".into(), json!(a.default_value()));
            }
            if !a.description().is_empty() {
                attr.insert("description".into(), json!(a.description()));
            }
            attributes.insert(a.name().to_string(), Json::Object(attr));
        }
        node.insert("attributes".into(), Json::Object(attributes));
    }

    if !class.relationships().is_empty() {
        let mut relationships = Map::new();
        for r in class.relationships() {
            let mut rel = Map::new();
            rel.insert("type".into(), json!(r.class_type()));
            rel.insert("cardinality".into(), json!(r.cardinality().to_string()));
            rel.insert("is-aggregation".into(), json!(r.is_aggregation()));
            if !r.description().is_empty() {
                rel.insert("description".into(), json!(r.description()));
            }
            relationships.insert(r.name().to_string(), Json::Object(rel));
        }
        node.insert("relationships".into(), Json::Object(relationships));
    }

    Json::Object(node)
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Bool(v) => json!(v),
        Value::Float(v) => json!(v),
        Value::Double(v) => json!(v),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect()),
        other => match other.as_i128() {
            Some(v) => i64::try_from(v)
                .map(|v| json!(v))
                .unwrap_or_else(|_| json!(other.to_string())),
            None => json!(other.to_string()),
        },
    }
}

fn object_to_json(class: &ClassSpec, obj: &ConfigObject) -> Result<Json> {
    let mut data = Map::new();
    for a in class.attributes() {
        data.insert(a.name().to_string(), value_to_json(&obj.get(a.name())?));
    }
    for r in class.relationships() {
        let targets = obj.get_relationship(r.name())?;
        let names: Vec<String> = targets
            .iter()
            .map(|t| format!("{}@{}", t.uid(), t.class_name()))
            .collect();
        let entry = if r.cardinality().is_multi_value() {
            json!(names)
        } else {
            json!(names.into_iter().next().unwrap_or_default())
        };
        data.insert(r.name().to_string(), entry);
    }
    Ok(Json::Object(data))
}
