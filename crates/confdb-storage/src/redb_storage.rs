//! redb-based persistent storage
//!
//! A repository is a directory. Every storage unit is one `<unit>.redb`
//! file below it; the commit history and the tags live in
//! `.history.redb`. Database files are opened per operation and closed
//! again, so several processes can share one repository.

use crate::{Result, StorageError, StoredObject, UnitData, UnitStore};
use confdb_core::Version;
use confdb_schema::ClassSpec;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::debug;
use walkdir::WalkDir;

// Table definitions
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const OBJECTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");
const VERSIONS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("versions");
const TAGS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("tags");

const INCLUDES_KEY: &str = "includes";
const CLASSES_KEY: &str = "classes";
const REVISION_KEY: &str = "revision";

pub(crate) const UNIT_EXTENSION: &str = "redb";
pub(crate) const HISTORY_FILE: &str = ".history.redb";

const OPEN_RETRIES: u32 = 100;
const OPEN_BACKOFF: Duration = Duration::from_millis(10);

pub struct RedbStorage {
    root: PathBuf,
}

impl RedbStorage {
    /// Open (or create) a repository directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Get the repository directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding a storage unit
    pub fn unit_path(&self, unit: &str) -> Result<PathBuf> {
        let relative = Path::new(unit);
        let valid = !unit.is_empty()
            && relative.components().all(|c| match c {
                Component::Normal(part) => !part.to_string_lossy().starts_with('.'),
                _ => false,
            });
        if !valid {
            return Err(StorageError::InvalidName(unit.to_string()));
        }
        Ok(self.root.join(format!("{unit}.{UNIT_EXTENSION}")))
    }

    /// Storage unit stored in `path`, if the path is a unit file of this repository
    pub fn unit_for_path(&self, path: &Path) -> Option<String> {
        unit_name(&self.root, path)
    }

    fn history_path(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }

    fn write_unit(&self, path: &Path, data: &UnitData) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = open_database(path)?;
        let write_txn = db.begin_write()?;
        {
            write_txn.delete_table(OBJECTS_TABLE)?;
            write_txn.delete_table(META_TABLE)?;

            let mut meta = write_txn.open_table(META_TABLE)?;
            meta.insert(INCLUDES_KEY, bincode::serialize(&data.includes)?.as_slice())?;
            meta.insert(CLASSES_KEY, bincode::serialize(&data.classes)?.as_slice())?;
            meta.insert(REVISION_KEY, bincode::serialize(&data.revision)?.as_slice())?;

            let mut objects = write_txn.open_table(OBJECTS_TABLE)?;
            for object in &data.objects {
                let key = object_key(object);
                objects.insert(key.as_str(), bincode::serialize(object)?.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn read_unit(&self, path: &Path, with_objects: bool) -> Result<UnitData> {
        let db = open_database(path)?;
        let read_txn = db.begin_read()?;
        let mut data = UnitData::new();

        let meta = match read_txn.open_table(META_TABLE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(data),
            Err(e) => return Err(e.into()),
        };
        data.revision = read_meta::<Option<String>>(&meta, REVISION_KEY)?.flatten();
        if !with_objects {
            return Ok(data);
        }
        data.includes = read_meta::<Vec<String>>(&meta, INCLUDES_KEY)?.unwrap_or_default();
        data.classes = read_meta::<Vec<ClassSpec>>(&meta, CLASSES_KEY)?.unwrap_or_default();

        let objects = read_txn.open_table(OBJECTS_TABLE)?;
        for entry in objects.iter()? {
            let (_, bytes) = entry?;
            let object: StoredObject = bincode::deserialize(bytes.value())?;
            data.objects.push(object);
        }
        Ok(data)
    }
}

impl UnitStore for RedbStorage {
    fn exists(&self, unit: &str) -> Result<bool> {
        Ok(self.unit_path(unit)?.is_file())
    }

    fn load(&self, unit: &str) -> Result<UnitData> {
        let path = self.unit_path(unit)?;
        if !path.is_file() {
            return Err(StorageError::UnitNotFound(unit.to_string()));
        }
        self.read_unit(&path, true)
    }

    fn revision(&self, unit: &str) -> Result<Option<String>> {
        let path = self.unit_path(unit)?;
        if !path.is_file() {
            return Err(StorageError::UnitNotFound(unit.to_string()));
        }
        Ok(self.read_unit(&path, false)?.revision)
    }

    fn create(&self, unit: &str, data: &UnitData) -> Result<()> {
        let path = self.unit_path(unit)?;
        if path.exists() {
            return Err(StorageError::UnitExists(unit.to_string()));
        }
        debug!(target: "confdb::backend", unit, path = %path.display(), "creating storage unit");
        self.write_unit(&path, data)
    }

    fn remove(&self, unit: &str) -> Result<()> {
        let path = self.unit_path(unit)?;
        if !path.is_file() {
            return Err(StorageError::UnitNotFound(unit.to_string()));
        }
        debug!(target: "confdb::backend", unit, path = %path.display(), "removing storage unit");
        std::fs::remove_file(&path)?;
        Ok(())
    }

    fn is_writable(&self, unit: &str) -> Result<bool> {
        let path = self.unit_path(unit)?;
        if !path.is_file() {
            return Err(StorageError::UnitNotFound(unit.to_string()));
        }
        Ok(!std::fs::metadata(&path)?.permissions().readonly())
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut units: Vec<String> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| self.unit_for_path(e.path()))
            .collect();
        units.sort();
        Ok(units)
    }

    fn save(&self, units: &[(String, UnitData)], version: &Version) -> Result<()> {
        let mut paths = Vec::with_capacity(units.len());
        for (unit, _) in units {
            let path = self.unit_path(unit)?;
            if path.is_file() && std::fs::metadata(&path)?.permissions().readonly() {
                return Err(StorageError::ReadOnly(unit.clone()));
            }
            paths.push(path);
        }

        for ((unit, data), path) in units.iter().zip(&paths) {
            debug!(target: "confdb::commit", unit = unit.as_str(), objects = data.objects.len(), "writing storage unit");
            self.write_unit(path, data)?;
        }

        let db = open_database(&self.history_path())?;
        let write_txn = db.begin_write()?;
        {
            let mut versions = write_txn.open_table(VERSIONS_TABLE)?;
            let next = match versions.last()? {
                Some((key, _)) => key.value() + 1,
                None => 0,
            };
            versions.insert(next, bincode::serialize(version)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn history(&self) -> Result<Vec<Version>> {
        let path = self.history_path();
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let db = open_database(&path)?;
        let read_txn = db.begin_read()?;
        let versions = match read_txn.open_table(VERSIONS_TABLE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut history = Vec::new();
        for entry in versions.iter()? {
            let (_, bytes) = entry?;
            history.push(bincode::deserialize(bytes.value())?);
        }
        Ok(history)
    }

    fn tag(&self, tag: &str, version_id: &str) -> Result<()> {
        let db = open_database(&self.history_path())?;
        let write_txn = db.begin_write()?;
        {
            let mut tags = write_txn.open_table(TAGS_TABLE)?;
            tags.insert(tag, version_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn tags(&self) -> Result<BTreeMap<String, String>> {
        let path = self.history_path();
        if !path.is_file() {
            return Ok(BTreeMap::new());
        }
        let db = open_database(&path)?;
        let read_txn = db.begin_read()?;
        let tags = match read_txn.open_table(TAGS_TABLE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let mut result = BTreeMap::new();
        for entry in tags.iter()? {
            let (tag, id) = entry?;
            result.insert(tag.value().to_string(), id.value().to_string());
        }
        Ok(result)
    }

    fn describe(&self) -> String {
        format!("redb:{}", self.root.display())
    }
}

/// Name of the storage unit kept in `path` below `root`
pub(crate) fn unit_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    if relative.extension().and_then(|e| e.to_str()) != Some(UNIT_EXTENSION) {
        return None;
    }
    let parts: Vec<String> = relative
        .with_extension("")
        .components()
        .map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Option<_>>()?;
    if parts.is_empty() || parts.iter().any(|p| p.starts_with('.')) {
        return None;
    }
    Some(parts.join("/"))
}

/// Open a database file, waiting while another handle in this process holds it
fn open_database(path: &Path) -> Result<Database> {
    let mut attempt = 0;
    loop {
        match Database::create(path) {
            Ok(db) => return Ok(db),
            Err(redb::DatabaseError::DatabaseAlreadyOpen) if attempt < OPEN_RETRIES => {
                attempt += 1;
                thread::sleep(OPEN_BACKOFF);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn read_meta<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> Result<Option<T>> {
    match table.get(key)? {
        Some(bytes) => Ok(Some(bincode::deserialize(bytes.value())?)),
        None => Ok(None),
    }
}

fn object_key(object: &StoredObject) -> String {
    format!("{}\u{1f}{}", object.class_name, object.uid)
}
