//! Repositories on disk: persistence, configuration and the file watcher

mod common;

use common::assertions::*;
use common::fixtures::*;
use confdb::core::{Configuration, ErrorKind, SubscriptionCriteria, VersionQueryType};
use confdb::schema::Value;
use confdb::storage::{ConfdbConfig, RedbBackend, UnitData, UnitStore, CONFIG_FILE_NAME};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn write_config(dir: &Path, watch: bool) {
    let config = ConfdbConfig {
        watch,
        default_author: "ci".to_string(),
        ..Default::default()
    };
    config.write_to_file(&dir.join(CONFIG_FILE_NAME)).unwrap();
}

fn seeded_repository(watch: bool) -> TempDir {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), watch);
    let backend = RedbBackend::open_repository(dir.path()).unwrap();
    backend
        .storage()
        .create(SCHEMA_DB, &UnitData::with_classes(deployment_classes()))
        .unwrap();
    backend
        .storage()
        .create(DATA_DB, &UnitData::with_includes([SCHEMA_DB]))
        .unwrap();
    dir
}

fn open(dir: &Path) -> (Configuration, Arc<RedbBackend>) {
    let backend = RedbBackend::open_repository(dir).unwrap();
    let config = Configuration::new(backend.clone()).unwrap();
    config.open_db(DATA_DB).unwrap();
    (config, backend)
}

#[test]
fn test_commits_persist_across_backends() {
    let dir = seeded_repository(false);
    {
        let (config, _) = open(dir.path());
        let web = config.create_object(DATA_DB, "Application", "web").unwrap();
        let tls = config.create_object(DATA_DB, "Library", "tls").unwrap();
        web.set("port", 443).unwrap();
        web.set("tags", vec![Value::from("edge")]).unwrap();
        web.set_relationship("uses", &[&tls]).unwrap();
        assert!(config.commit("deploy web").unwrap());

        let id = config.get_changes().unwrap()[0].id().to_string();
        config.tag_version(&id, "v1").unwrap();
    }

    let (config, _) = open(dir.path());
    let web = config.get_object("Application", "web").unwrap();
    assert_eq!(web.get("port").unwrap(), Value::U32(443));
    assert_eq!(web.get("tags").unwrap(), Value::List(vec![Value::from("edge")]));
    let uses = web.get_relationship("uses").unwrap();
    assert_eq!(uses.len(), 1);
    assert_eq!(uses[0].uid(), "tls");

    let versions = config
        .get_versions("", "", VersionQueryType::ById, false)
        .unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].user(), "ci");
    assert_eq!(versions[0].comment(), "deploy web");

    let before_tag = config
        .get_versions("", "v1", VersionQueryType::ByTag, false)
        .unwrap();
    assert_eq!(before_tag.len(), 1);
    assert!(config.get_changes().unwrap().is_empty());
}

#[test]
fn test_uncommitted_changes_are_not_persisted() {
    let dir = seeded_repository(false);
    {
        let (config, _) = open(dir.path());
        config.create_object(DATA_DB, "Library", "tls").unwrap();
    }
    let (config, _) = open(dir.path());
    assert_kind(config.get_object("Library", "tls"), ErrorKind::NotFound);
}

#[test]
fn test_create_db_in_nested_directory() {
    let dir = seeded_repository(false);
    let (config, _) = open(dir.path());

    config.create_db("teams/payments", &[SCHEMA_DB]).unwrap();
    assert!(dir.path().join("teams").join("payments.redb").is_file());
    config.create_object("teams/payments", "Library", "ledger").unwrap();
    config.commit("payments").unwrap();

    assert_kind(config.create_db("../escape", &[]), ErrorKind::NotValid);
    assert_kind(config.create_db(".hidden", &[]), ErrorKind::NotValid);
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(CONFIG_FILE_NAME), "notify_workers = 0\n").unwrap();
    let err = RedbBackend::open_repository(dir.path()).err().unwrap();
    assert_eq!(confdb::Error::from(err).kind(), ErrorKind::NotValid);
}

#[test]
fn test_open_writes_default_config() {
    let dir = TempDir::new().unwrap();
    let config = confdb::open(&format!("redb:{}", dir.path().display())).unwrap();
    assert!(!config.loaded());
    let written = ConfdbConfig::from_file(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
    assert!(written.watch);
    assert_eq!(written.notify_workers, 2);
}

#[test]
fn test_watcher_reports_commits_of_another_writer() {
    let dir = seeded_repository(true);
    let (reader, _reader_backend) = open(dir.path());
    let recorder = Recorder::new();
    let mut criteria = SubscriptionCriteria::new();
    criteria.add_class("Application");
    reader.subscribe(criteria, recorder.clone(), Arc::new(())).unwrap();

    let (writer, _writer_backend) = open(dir.path());
    writer.create_object(DATA_DB, "Application", "web").unwrap();
    writer.commit("add web").unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while recorder.batches().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
        reader.flush_notifications();
    }

    let batches = recorder.batches();
    assert!(!batches.is_empty(), "no notification within the deadline");
    assert_change(&batches[0][0], "Application", &["web"], &[], &[]);
    assert!(reader.get_object("Application", "web").is_ok());
}
