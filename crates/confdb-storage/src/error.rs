//! Error types for storage operations

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Database error: {0}")]
    Database(#[from] redb::Error),

    #[error("Database creation error: {0}")]
    DatabaseCreation(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("File watcher error: {0}")]
    FileWatcher(#[from] notify::Error),

    #[error("Storage unit not found: {0}")]
    UnitNotFound(String),

    #[error("Storage unit already exists: {0}")]
    UnitExists(String),

    #[error("Storage unit is read-only: {0}")]
    ReadOnly(String),

    #[error("Invalid storage unit name: {0}")]
    InvalidName(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<StorageError> for confdb_core::Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(e) => e.into(),
            StorageError::UnitNotFound(unit) => {
                confdb_core::Error::not_found(format!("storage unit '{unit}' does not exist"))
            }
            StorageError::UnitExists(unit) => {
                confdb_core::Error::already_exists(format!("storage unit '{unit}' already exists"))
            }
            StorageError::ReadOnly(unit) => {
                confdb_core::Error::not_allowed(format!("storage unit '{unit}' is read-only"))
            }
            StorageError::InvalidName(name) => {
                confdb_core::Error::not_valid(format!("bad storage unit name '{name}'"))
            }
            StorageError::InvalidConfig(why) => confdb_core::Error::not_valid(format!("configuration: {why}")),
            other => confdb_core::Error::system_with("storage backend failure", other),
        }
    }
}
