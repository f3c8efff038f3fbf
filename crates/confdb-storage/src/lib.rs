//! confdb Storage - Backends for the configuration database
//!
//! Two backends implement [`confdb_core::ConfigurationImpl`] over the same
//! object store:
//! - [`InMemoryBackend`]: process-local, for tests and tools
//! - [`RedbBackend`]: a repository directory with one redb file per storage
//!   unit, a commit history and a watcher for changes made by other processes
//!
//! ## Architecture
//!
//! - [`UnitStore`] persists whole storage units and the commit history
//! - the object store loads a root unit with its includes, merges their
//!   schema fragments and applies mutations with all policies checked first
//! - [`StoreBackend`] keeps committed and working copies, commits, and
//!   publishes change batches to subscribed sessions

mod backend;
mod config;
mod error;
pub mod history;
mod memory;
pub mod query;
mod provider;
mod redb_storage;
mod store;
mod sync;
mod unit;

pub use backend::{InMemoryBackend, RedbBackend, StoreBackend};
pub use config::{ConfdbConfig, CONFIG_FILE_NAME};
pub use error::{Result, StorageError};
pub use memory::InMemoryStorage;
pub use provider::UnitStore;
pub use redb_storage::RedbStorage;
pub use sync::RepositoryWatcher;
pub use unit::{StoredObject, UnitData};

use confdb_core::{ConfigurationImpl, Configuration, Error, Session};
use std::path::Path;
use std::sync::Arc;

/// Build a backend from a connection spec.
///
/// - `memory`: empty in-memory backend, nothing loaded
/// - `memory:<db>`: in-memory backend with a new, empty database `<db>` loaded
/// - `redb:<dir>`: repository directory, configured by its `confdb.toml`
pub fn connect(spec: &str) -> confdb_core::Result<Arc<dyn ConfigurationImpl>> {
    let (plugin, params) = spec.split_once(':').unwrap_or((spec, ""));
    match plugin.trim() {
        "memory" => {
            let backend = InMemoryBackend::in_memory();
            let db = params.trim();
            if !db.is_empty() {
                backend.create_db(&Session::new(), db, &[])?;
            }
            Ok(Arc::new(backend))
        }
        "redb" => {
            let dir = params.trim();
            if dir.is_empty() {
                return Err(Error::not_valid("'redb' needs a repository directory: redb:<dir>"));
            }
            let backend: Arc<dyn ConfigurationImpl> = RedbBackend::open_repository(dir)?;
            Ok(backend)
        }
        other => Err(Error::not_found(format!("backend '{other}' in connection spec '{spec}'"))),
    }
}

/// Connect and wrap the backend in a [`Configuration`] facade whose
/// notification workers follow the backend's configuration
pub fn open(spec: &str) -> confdb_core::Result<Configuration> {
    let dispatcher = match spec.split_once(':') {
        Some(("redb", dir)) if !dir.trim().is_empty() => {
            ConfdbConfig::load_or_init(Path::new(dir.trim()))?.dispatcher()
        }
        _ => ConfdbConfig::default().dispatcher(),
    };
    Configuration::with_dispatcher(connect(spec)?, dispatcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use confdb_core::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_connect_specs() {
        assert!(!connect("memory").unwrap().loaded());
        let backend = connect("memory:root").unwrap();
        assert!(backend.loaded());
        assert!(backend.is_writable("root").unwrap());

        assert_eq!(connect("redb:").err().map(|e| e.kind()), Some(ErrorKind::NotValid));
        assert_eq!(connect("oracle:db").err().map(|e| e.kind()), Some(ErrorKind::NotFound));
    }

    #[test]
    fn test_open_redb_writes_default_config() {
        let dir = TempDir::new().unwrap();
        let spec = format!("redb:{}", dir.path().display());
        let config = open(&spec).unwrap();
        assert!(!config.loaded());
        assert!(dir.path().join(CONFIG_FILE_NAME).is_file());
    }
}
