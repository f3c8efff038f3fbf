use confdb::core::{Callback, CallbackResult, Change, Configuration, Parameter};
use confdb::schema::{AttributeSpec, AttributeType, ClassSpec, IntFormat, RelationshipSpec};
use confdb::storage::{InMemoryBackend, InMemoryStorage, UnitData, UnitStore};
use parking_lot::Mutex;
use std::sync::Arc;

/// Name of the unit holding the schema
pub const SCHEMA_DB: &str = "schema";
/// Name of the data unit opened by [`configuration`]
pub const DATA_DB: &str = "apps";

/// Classes of a small deployment model:
/// an abstract `Component` with `Application` and `Library` below it, and
/// `Settings` aggregated by applications.
pub fn deployment_classes() -> Vec<ClassSpec> {
    let component = ClassSpec::new("Component", "anything deployable", true)
        .with_attribute(AttributeSpec::simple("name", AttributeType::String))
        .with_attribute(AttributeSpec::new(
            "enabled",
            AttributeType::Bool,
            "",
            IntFormat::NotApplicable,
            false,
            false,
            "true",
            "",
        ));

    let application = ClassSpec::new("Application", "", false)
        .with_superclass("Component")
        .with_attribute(AttributeSpec::new(
            "port",
            AttributeType::U32,
            "1..65535",
            IntFormat::Decimal,
            false,
            false,
            "8080",
            "listening port",
        ))
        .with_attribute(AttributeSpec::new(
            "tags",
            AttributeType::String,
            "",
            IntFormat::NotApplicable,
            false,
            true,
            "",
            "",
        ))
        .with_relationship(RelationshipSpec::new("uses", "Library", true, true, false, ""))
        .with_relationship(RelationshipSpec::new("settings", "Settings", true, false, true, ""));

    let library = ClassSpec::new("Library", "", false)
        .with_superclass("Component")
        .with_attribute(AttributeSpec::simple("version", AttributeType::String));

    let settings = ClassSpec::new("Settings", "", false)
        .with_attribute(AttributeSpec::simple("level", AttributeType::String));

    vec![component, application, library, settings]
}

/// Write the schema unit and an empty data unit including it
pub fn seed(storage: &InMemoryStorage) {
    storage
        .create(SCHEMA_DB, &UnitData::with_classes(deployment_classes()))
        .expect("Failed to create schema unit");
    storage
        .create(DATA_DB, &UnitData::with_includes([SCHEMA_DB]))
        .expect("Failed to create data unit");
}

/// Route library logs through the test harness; `RUST_LOG` selects targets
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An in-memory configuration with the data unit loaded.
///
/// The returned storage is shared with the backend, so a second backend
/// built on it sees the same units.
pub fn configuration() -> (Configuration, InMemoryStorage) {
    init_tracing();
    let backend = InMemoryBackend::in_memory();
    seed(backend.storage());
    let storage = backend.storage().clone();
    let config = Configuration::new(Arc::new(backend)).expect("Failed to build configuration");
    config.open_db(DATA_DB).expect("Failed to open data unit");
    (config, storage)
}

/// A second configuration over the same storage, with the data unit loaded
pub fn peer(storage: &InMemoryStorage) -> (Configuration, Arc<InMemoryBackend>) {
    let backend = Arc::new(InMemoryBackend::new(storage.clone(), Default::default()));
    let config = Configuration::new(backend.clone()).expect("Failed to build configuration");
    config.open_db(DATA_DB).expect("Failed to open data unit");
    (config, backend)
}

/// Callback remembering every batch it receives
#[derive(Clone, Default)]
pub struct Recorder {
    batches: Arc<Mutex<Vec<Vec<Change>>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<Change>> {
        self.batches.lock().clone()
    }
}

impl Callback for Recorder {
    fn process_changes(&self, changes: &[Change], _parameter: &Parameter) -> CallbackResult {
        self.batches.lock().push(changes.to_vec());
        Ok(())
    }
}
