//! Backends over a [`UnitStore`]
//!
//! `StoreBackend` keeps two copies of the loaded database: the committed
//! one and the working one that mutations go to. Both sit behind one
//! `RwLock`, so a reader always sees either the state before or the state
//! after a mutation. `commit` writes the touched units, records a version
//! and hands the collected changes to the subscribed sessions; `abort`
//! throws the working copy away.

use crate::history;
use crate::query;
use crate::store::Store;
use crate::sync::RepositoryWatcher;
use crate::{ConfdbConfig, InMemoryStorage, RedbStorage, StorageError, UnitData, UnitStore};
use chrono::Utc;
use confdb_core::{
    Change, ConfigurationImpl, Credentials, Error, ObjectId, ObjectRef, Query, ReferenceFilter, Result,
    Session, SubscriptionCriteria, Version, VersionQueryType,
};
use confdb_schema::{ClassSpec, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Backend over process-local memory
pub type InMemoryBackend = StoreBackend<InMemoryStorage>;

/// Backend over a directory of redb files
pub type RedbBackend = StoreBackend<RedbStorage>;

struct State {
    committed: Store,
    working: Store,
    /// Commits seen since the database was opened
    changes: Vec<Version>,
    /// Entries of the storage history already accounted for
    history_seen: usize,
}

pub struct StoreBackend<S: UnitStore> {
    storage: S,
    config: ConfdbConfig,
    state: RwLock<Option<State>>,
    subscribers: Mutex<Vec<Weak<Session>>>,
    incarnations: Arc<AtomicU64>,
    watcher: Mutex<Option<RepositoryWatcher>>,
}

impl StoreBackend<InMemoryStorage> {
    /// A backend over fresh, empty memory storage
    pub fn in_memory() -> Self {
        Self::new(InMemoryStorage::new(), ConfdbConfig::default())
    }
}

impl StoreBackend<RedbStorage> {
    /// Open a repository directory with the settings of its `confdb.toml`.
    ///
    /// When `watch` is set, storage units rewritten by other processes are
    /// reloaded in the background and reported to subscribers.
    pub fn open_repository(dir: impl AsRef<Path>) -> Result<Arc<Self>> {
        let storage = RedbStorage::new(dir)?;
        let config = ConfdbConfig::load_or_init(storage.root())?;
        let watch = config.watch;
        let backend = Arc::new(Self::new(storage, config));
        if watch {
            let watcher = RepositoryWatcher::start(&backend)?;
            *backend.watcher.lock() = Some(watcher);
        }
        info!(target: "confdb::backend", repository = %backend.storage.describe(), watch, "opened repository");
        Ok(backend)
    }
}

impl<S: UnitStore> StoreBackend<S> {
    pub fn new(storage: S, config: ConfdbConfig) -> Self {
        Self {
            storage,
            config,
            state: RwLock::new(None),
            subscribers: Mutex::new(Vec::new()),
            incarnations: Arc::new(AtomicU64::new(0)),
            watcher: Mutex::new(None),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> &ConfdbConfig {
        &self.config
    }

    /// Reload the database if another writer changed any of its units.
    ///
    /// Uncommitted changes are discarded; subscribers receive the object
    /// level difference. Returns whether a reload happened.
    pub fn refresh(&self) -> Result<bool> {
        {
            let guard = self.state.read();
            let Some(state) = guard.as_ref() else {
                return Ok(false);
            };
            if self.stale_units(&state.committed)?.is_empty() {
                return Ok(false);
            }
        }

        let mut guard = self.state.write();
        let Some(state) = guard.as_mut() else {
            return Ok(false);
        };
        let stale = self.stale_units(&state.committed)?;
        if stale.is_empty() {
            return Ok(false);
        }

        let mut reloaded = Store::open(
            &self.storage,
            state.committed.roots(),
            Arc::clone(&self.incarnations),
        )?;
        reloaded.adopt_incarnations(&state.committed);
        let batch = Store::diff(&state.committed, &reloaded);
        if !state.working.dirty().is_empty() {
            warn!(
                target: "confdb::watch",
                units = ?state.working.dirty(),
                "discarding uncommitted changes after an external update"
            );
        }
        state.working = reloaded.clone();
        state.committed = reloaded;

        let history = self.storage.history()?;
        state
            .changes
            .extend(history.iter().skip(state.history_seen).cloned());
        state.history_seen = history.len();

        info!(target: "confdb::watch", units = ?stale, "reloaded storage units changed by another writer");
        self.notify(batch.into_changes());
        Ok(true)
    }

    fn stale_units(&self, store: &Store) -> Result<Vec<String>> {
        let mut stale = Vec::new();
        for unit in store.unit_names() {
            match self.storage.revision(unit) {
                Ok(revision) if revision.as_deref() == store.unit_revision(unit) => {}
                Ok(_) | Err(StorageError::UnitNotFound(_)) => stale.push(unit.to_string()),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(stale)
    }

    fn read<T>(&self, f: impl FnOnce(&Store) -> Result<T>) -> Result<T> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or_else(not_loaded)?;
        f(&state.working)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Store) -> Result<T>) -> Result<T> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or_else(not_loaded)?;
        f(&mut state.working)
    }

    fn open_state(&self, db: &str) -> Result<State> {
        let store = Store::open(&self.storage, &[db.to_string()], Arc::clone(&self.incarnations))?;
        Ok(State {
            committed: store.clone(),
            working: store,
            changes: Vec::new(),
            history_seen: self.storage.history()?.len(),
        })
    }

    /// Hand a batch to every live subscribed session
    fn notify(&self, changes: Vec<Change>) {
        if changes.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| s.strong_count() > 0);
        let delivered = subscribers
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|session| session.notify(&changes))
            .count();
        debug!(target: "confdb::notify", classes = changes.len(), sessions = delivered, "changes published");
    }
}

/// Working and committed stores with `db` attached; `state` is untouched on failure
fn attach_both(state: &State, storage: &dyn UnitStore, db: &str) -> Result<(Store, Store)> {
    let mut working = state.working.clone();
    working.attach(storage, db)?;
    let mut committed = state.committed.clone();
    committed.attach(storage, db)?;
    committed.adopt_incarnations(&working);
    Ok((working, committed))
}

fn not_loaded() -> Error {
    Error::system("no database is loaded")
}

impl<S: UnitStore> ConfigurationImpl for StoreBackend<S> {
    fn open_db(&self, _session: &Session, db: &str) -> Result<()> {
        let mut guard = self.state.write();
        if guard.is_some() {
            return Err(Error::system(format!(
                "cannot open '{db}': a database is already loaded"
            )));
        }
        *guard = Some(self.open_state(db)?);
        info!(target: "confdb::backend", db, storage = %self.storage.describe(), "database loaded");
        Ok(())
    }

    fn close_db(&self, _session: &Session) -> Result<()> {
        let mut guard = self.state.write();
        if guard.take().is_none() {
            return Err(not_loaded());
        }
        info!(target: "confdb::backend", "database unloaded");
        Ok(())
    }

    fn loaded(&self) -> bool {
        self.state.read().is_some()
    }

    fn create_db(&self, _session: &Session, db: &str, includes: &[String]) -> Result<()> {
        if self.storage.exists(db)? {
            return Err(Error::already_exists(format!("storage unit '{db}'")));
        }
        for include in includes {
            if !self.storage.exists(include)? {
                return Err(Error::not_found(format!("storage unit '{include}'")));
            }
        }
        self.storage.create(db, &UnitData::with_includes(includes.iter().cloned()))?;
        debug!(target: "confdb::backend", db, ?includes, "storage unit created");

        let mut guard = self.state.write();
        let attached = match guard.as_mut() {
            Some(state) => attach_both(state, &self.storage, db).map(|(working, committed)| {
                state.working = working;
                state.committed = committed;
            }),
            None => self.open_state(db).map(|state| *guard = Some(state)),
        };
        if let Err(e) = attached {
            warn!(target: "confdb::backend", db, "cannot load new storage unit, removing it: {e}");
            if let Err(cleanup) = self.storage.remove(db) {
                warn!(target: "confdb::backend", db, "cannot remove storage unit: {cleanup}");
            }
            return Err(e);
        }
        Ok(())
    }

    fn is_writable(&self, db: &str) -> Result<bool> {
        if let Some(state) = self.state.read().as_ref() {
            if let Ok(writable) = state.working.is_writable(db) {
                return Ok(writable);
            }
        }
        Ok(self.storage.is_writable(db)?)
    }

    fn add_include(&self, _session: &Session, db: &str, include: &str) -> Result<()> {
        self.write(|store| store.add_include(&self.storage, db, include))
    }

    fn remove_include(&self, _session: &Session, db: &str, include: &str) -> Result<()> {
        self.write(|store| store.remove_include(db, include))
    }

    fn get_includes(&self, db: &str) -> Result<Vec<String>> {
        self.read(|store| store.includes(db))
    }

    fn get_updated_dbs(&self) -> Result<Vec<String>> {
        self.read(|store| Ok(store.dirty().iter().cloned().collect()))
    }

    fn set_commit_credentials(&self, session: &Session, user: &str, password: &str) -> Result<()> {
        if user.is_empty() {
            return Err(Error::not_valid("commit user cannot be empty"));
        }
        session.set_credentials(Some(Credentials {
            user: user.to_string(),
            password: password.to_string(),
        }));
        Ok(())
    }

    fn commit(&self, session: &Session, reason: &str) -> Result<bool> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or_else(not_loaded)?;
        if state.working.dirty().is_empty() {
            debug!(target: "confdb::commit", "nothing to commit");
            return Ok(false);
        }

        let user = session
            .credentials()
            .map(|c| c.user)
            .unwrap_or_else(|| self.config.default_author.clone());
        let files: Vec<String> = state.working.dirty().iter().cloned().collect();
        let history = self.storage.history()?;
        let foreign = &history[state.history_seen.min(history.len())..];
        if foreign.iter().any(|v| v.files().iter().any(|f| files.contains(f))) {
            warn!(target: "confdb::commit", ?files, "overwriting units committed by another writer");
        }

        let version = history::new_version(
            history.last().map(Version::id),
            &user,
            Utc::now().timestamp(),
            reason,
            files.clone(),
        );
        let mut units = Vec::with_capacity(files.len());
        for name in &files {
            let mut data = state.working.unit_data(name)?;
            data.revision = Some(version.id().to_string());
            units.push((name.clone(), data));
        }
        self.storage.save(&units, &version)?;

        let batch = state.working.mark_committed(version.id());
        state.committed = state.working.clone();
        state.changes.extend(foreign.iter().cloned());
        state.changes.push(version.clone());
        state.history_seen = history.len() + 1;

        info!(target: "confdb::commit", id = version.id(), user = %user, units = files.len(), "committed");
        self.notify(batch.into_changes());
        Ok(true)
    }

    fn abort(&self, _session: &Session) -> Result<()> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or_else(not_loaded)?;
        if !state.working.dirty().is_empty() {
            debug!(target: "confdb::commit", units = ?state.working.dirty(), "discarding uncommitted changes");
        }
        state.working = state.committed.clone();
        Ok(())
    }

    fn get_superclasses(&self) -> Result<BTreeMap<String, Vec<String>>> {
        self.read(|store| Ok(store.schema().superclasses().clone()))
    }

    fn get_class(&self, class: &str, direct_only: bool) -> Result<ClassSpec> {
        self.read(|store| store.schema().class(class, direct_only))
    }

    fn get_object(&self, class: &str, uid: &str) -> Result<ObjectRef> {
        self.read(|store| store.lookup(class, uid))
    }

    fn get_objects(&self, class: &str, query: &Query) -> Result<Vec<ObjectRef>> {
        self.read(|store| query::select(store, class, query))
    }

    fn get_path(&self, from: &ObjectRef, query: &Query) -> Result<Vec<ObjectRef>> {
        self.read(|store| query::walk(store, from, query))
    }

    fn check_query(&self, text: &str) -> Result<()> {
        query::check(text)
    }

    fn create_object(&self, _session: &Session, db: &str, class: &str, uid: &str) -> Result<ObjectRef> {
        self.write(|store| store.create_object(db, class, uid))
    }

    fn destroy(&self, _session: &Session, id: &ObjectId) -> Result<()> {
        self.write(|store| store.destroy(id))
    }

    fn move_object(&self, _session: &Session, obj: &ObjectRef, db: &str) -> Result<ObjectRef> {
        self.write(|store| store.move_object(obj, db))
    }

    fn rename(&self, _session: &Session, obj: &ObjectRef, new_uid: &str) -> Result<ObjectRef> {
        self.write(|store| store.rename(obj, new_uid))
    }

    fn contained_in(&self, obj: &ObjectRef) -> Result<String> {
        self.read(|store| store.contained_in(obj))
    }

    fn validate(&self, obj: &ObjectRef) -> Result<()> {
        self.read(|store| store.resolve(obj).map(|_| ()))
    }

    fn get_attribute(&self, obj: &ObjectRef, name: &str) -> Result<Value> {
        self.read(|store| store.get_attribute(obj, name))
    }

    fn set_attribute(&self, _session: &Session, obj: &ObjectRef, name: &str, value: Value) -> Result<()> {
        self.write(|store| store.set_attribute(obj, name, value))
    }

    fn get_relationship(&self, obj: &ObjectRef, name: &str) -> Result<Vec<ObjectRef>> {
        self.read(|store| store.get_relationship(obj, name))
    }

    fn set_relationship(
        &self,
        _session: &Session,
        obj: &ObjectRef,
        name: &str,
        targets: &[ObjectRef],
    ) -> Result<()> {
        self.write(|store| store.set_relationship(obj, name, targets))
    }

    fn referenced_by(&self, obj: &ObjectRef, filter: &ReferenceFilter) -> Result<Vec<ObjectRef>> {
        self.read(|store| store.referenced_by(obj, filter))
    }

    fn subscribe(&self, session: &Arc<Session>, criteria: SubscriptionCriteria) -> Result<()> {
        debug!(target: "confdb::notify", session = session.id(), criteria = %criteria, "subscribe");
        session.set_scope(Some(criteria));
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| s.upgrade().is_some_and(|s| s.id() != session.id()));
        subscribers.push(Arc::downgrade(session));
        Ok(())
    }

    fn unsubscribe(&self, session: &Session) -> Result<()> {
        session.set_scope(None);
        self.subscribers
            .lock()
            .retain(|s| s.upgrade().is_some_and(|s| s.id() != session.id()));
        debug!(target: "confdb::notify", session = session.id(), "unsubscribe");
        Ok(())
    }

    fn get_changes(&self) -> Result<Vec<Version>> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or_else(not_loaded)?;
        Ok(state.changes.clone())
    }

    fn get_versions(
        &self,
        since: &str,
        until: &str,
        query_type: VersionQueryType,
        skip_irrelevant: bool,
    ) -> Result<Vec<Version>> {
        let relevant: Option<BTreeSet<String>> = if skip_irrelevant {
            Some(self.read(|store| Ok(store.unit_names().map(str::to_string).collect()))?)
        } else {
            None
        };
        let history = self.storage.history()?;
        let tags = self.storage.tags()?;
        history::select(&history, &tags, since, until, query_type, relevant.as_ref())
    }

    fn tag_version(&self, _session: &Session, id: &str, tag: &str) -> Result<()> {
        if tag.is_empty() {
            return Err(Error::not_valid("version tag cannot be empty"));
        }
        if !self.storage.history()?.iter().any(|v| v.id() == id) {
            return Err(Error::not_found(format!("version '{id}'")));
        }
        self.storage.tag(tag, id)?;
        Ok(())
    }
}
