//! Change notification: subscriptions, dispatch and external updates

mod common;

use common::assertions::*;
use common::fixtures::*;
use confdb::core::{
    CallbackResult, Change, ChangeSink, ConfigAction, Configuration, ConfigurationImpl,
    DispatcherConfig, ErrorKind, Parameter, Session, SubscriptionCriteria,
};
use confdb::storage::InMemoryBackend;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

fn classes(names: &[&str]) -> SubscriptionCriteria {
    let mut criteria = SubscriptionCriteria::new();
    for name in names {
        criteria.add_class(*name);
    }
    criteria
}

#[test]
fn test_commit_delivers_one_batch_to_class_subscriber() {
    let (config, _) = configuration();
    let recorder = Recorder::new();
    config
        .subscribe(classes(&["Application"]), recorder.clone(), Arc::new(()))
        .unwrap();

    let web = config.create_object(DATA_DB, "Application", "web").unwrap();
    web.set("port", 443).unwrap();
    assert!(config.commit("add web").unwrap());
    config.flush_notifications();

    let batches = recorder.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    assert_change(&batches[0][0], "Application", &["web"], &[], &[]);
}

#[test]
fn test_nothing_is_delivered_before_commit_or_after_abort() {
    let (config, _) = configuration();
    let recorder = Recorder::new();
    config
        .subscribe(SubscriptionCriteria::new(), recorder.clone(), Arc::new(()))
        .unwrap();

    config.create_object(DATA_DB, "Application", "web").unwrap();
    config.flush_notifications();
    assert!(recorder.batches().is_empty());

    config.abort().unwrap();
    assert!(!config.commit("nothing left").unwrap());
    config.flush_notifications();
    assert!(recorder.batches().is_empty());
}

#[test]
fn test_unmatched_changes_are_not_dispatched() {
    let (config, _) = configuration();
    let recorder = Recorder::new();
    config
        .subscribe(classes(&["Application"]), recorder.clone(), Arc::new(()))
        .unwrap();

    config.create_object(DATA_DB, "Library", "tls").unwrap();
    config.commit("add tls").unwrap();
    config.flush_notifications();

    assert!(recorder.batches().is_empty());
}

#[test]
fn test_empty_criteria_receive_every_class() {
    let (config, _) = configuration();
    let recorder = Recorder::new();
    config
        .subscribe(SubscriptionCriteria::new(), recorder.clone(), Arc::new(()))
        .unwrap();

    let web = config.create_object(DATA_DB, "Application", "web").unwrap();
    config.create_object(DATA_DB, "Library", "tls").unwrap();
    config.commit("first").unwrap();
    web.set("port", 81).unwrap();
    config.destroy("Library", "tls").unwrap();
    config.commit("second").unwrap();
    config.flush_notifications();

    let batches = recorder.batches();
    assert_eq!(batches.len(), 2);
    assert_change(change_of(&batches[0], "Application"), "Application", &["web"], &[], &[]);
    assert_change(change_of(&batches[0], "Library"), "Library", &["tls"], &[], &[]);
    assert_change(change_of(&batches[1], "Application"), "Application", &[], &["web"], &[]);
    assert_change(change_of(&batches[1], "Library"), "Library", &[], &[], &["tls"]);
}

#[test]
fn test_object_subscription_sees_only_that_object() {
    let (config, _) = configuration();
    let web = config.create_object(DATA_DB, "Application", "web").unwrap();
    let api = config.create_object(DATA_DB, "Application", "api").unwrap();
    config.commit("setup").unwrap();

    let recorder = Recorder::new();
    let mut criteria = SubscriptionCriteria::new();
    criteria.add_object("Application", "web");
    config.subscribe(criteria, recorder.clone(), Arc::new(())).unwrap();

    web.set("port", 81).unwrap();
    api.set("port", 82).unwrap();
    config.commit("ports").unwrap();
    config.flush_notifications();

    let batches = recorder.batches();
    assert_eq!(batches.len(), 1);
    assert_change(&batches[0][0], "Application", &[], &["web"], &[]);
}

#[test]
fn test_parameter_is_passed_back() {
    let (config, _) = configuration();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback = move |_: &[Change], parameter: &confdb::core::Parameter| -> confdb::core::CallbackResult {
        if let Some(tag) = parameter.downcast_ref::<&str>() {
            sink.lock().push(tag.to_string());
        }
        Ok(())
    };
    config
        .subscribe(SubscriptionCriteria::new(), callback, Arc::new("deploy-watch"))
        .unwrap();

    config.create_object(DATA_DB, "Library", "tls").unwrap();
    config.commit("add tls").unwrap();
    config.flush_notifications();

    assert_eq!(*seen.lock(), vec!["deploy-watch".to_string()]);
}

#[test]
fn test_unsubscribe() {
    let (config, _) = configuration();
    let recorder = Recorder::new();
    let id = config
        .subscribe(SubscriptionCriteria::new(), recorder.clone(), Arc::new(()))
        .unwrap();

    config.unsubscribe(Some(id)).unwrap();
    assert!(!config.session().is_subscribed());
    assert_kind(config.unsubscribe(Some(id)), ErrorKind::Generic);

    config.create_object(DATA_DB, "Library", "tls").unwrap();
    config.commit("add tls").unwrap();
    config.flush_notifications();
    assert!(recorder.batches().is_empty());
}

#[test]
fn test_unsubscribe_during_commits_stops_later_batches() {
    init_tracing();
    let backend = InMemoryBackend::in_memory();
    seed(backend.storage());
    let dispatcher = DispatcherConfig {
        workers: 1,
        max_queue_depth: 4096,
    };
    let config = Configuration::with_dispatcher(Arc::new(backend), dispatcher).unwrap();
    config.open_db(DATA_DB).unwrap();

    // the first batch parks the only worker, so later batches stay queued
    let gate = Arc::new(Barrier::new(2));
    let parked = Arc::new(AtomicBool::new(false));
    let (g, p) = (Arc::clone(&gate), Arc::clone(&parked));
    let blocker = move |_: &[Change], _: &Parameter| -> CallbackResult {
        if !p.swap(true, Ordering::SeqCst) {
            g.wait();
        }
        Ok(())
    };
    config
        .subscribe(SubscriptionCriteria::new(), blocker, Arc::new(()))
        .unwrap();
    let recorder = Recorder::new();
    let id = config
        .subscribe(classes(&["Library"]), recorder.clone(), Arc::new(()))
        .unwrap();

    std::thread::scope(|scope| {
        let writer = scope.spawn(|| {
            for i in 0..200 {
                config
                    .create_object(DATA_DB, "Library", &format!("lib-{i}"))
                    .unwrap();
                config.commit("add library").unwrap();
            }
        });
        while !parked.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
        config.unsubscribe(Some(id)).unwrap();
        writer.join().unwrap();
    });

    gate.wait();
    config.flush_notifications();
    assert!(recorder.batches().is_empty());
}

#[derive(Default)]
struct Collect(Mutex<Vec<Vec<Change>>>);

impl ChangeSink for Collect {
    fn deliver(&self, changes: Vec<Change>) {
        self.0.lock().push(changes);
    }
}

#[test]
fn test_second_subscribe_replaces_scope() {
    let backend = InMemoryBackend::in_memory();
    seed(backend.storage());
    let writer = Session::new();
    backend.open_db(&writer, DATA_DB).unwrap();

    let collect = Arc::new(Collect::default());
    let watcher = Arc::new(Session::with_sink(collect.clone()));
    backend.subscribe(&watcher, classes(&["Application"])).unwrap();
    backend.subscribe(&watcher, classes(&["Library"])).unwrap();

    backend.create_object(&writer, DATA_DB, "Application", "web").unwrap();
    backend.commit(&writer, "add web").unwrap();
    assert!(collect.0.lock().is_empty());

    backend.create_object(&writer, DATA_DB, "Library", "tls").unwrap();
    backend.commit(&writer, "add tls").unwrap();
    let batches = collect.0.lock().clone();
    assert_eq!(batches.len(), 1);
    assert_change(&batches[0][0], "Library", &["tls"], &[], &[]);
}

#[test]
fn test_external_commit_reaches_peer_after_refresh() {
    let (writer, storage) = configuration();
    let (reader, backend) = peer(&storage);
    let recorder = Recorder::new();
    reader
        .subscribe(classes(&["Application"]), recorder.clone(), Arc::new(()))
        .unwrap();

    writer.create_object(DATA_DB, "Application", "web").unwrap();
    writer.commit("add web").unwrap();

    assert!(backend.refresh().unwrap());
    assert!(!backend.refresh().unwrap());
    reader.flush_notifications();

    let batches = recorder.batches();
    assert_eq!(batches.len(), 1);
    assert_change(&batches[0][0], "Application", &["web"], &[], &[]);
    assert!(reader.get_object("Application", "web").is_ok());
}

#[derive(Default)]
struct Counting {
    loads: AtomicUsize,
    unloads: AtomicUsize,
    notified: AtomicUsize,
}

impl ConfigAction for Counting {
    fn notify(&self, _changes: &[Change]) {
        self.notified.fetch_add(1, Ordering::SeqCst);
    }

    fn load(&self) {
        self.loads.fetch_add(1, Ordering::SeqCst);
    }

    fn unload(&self) {
        self.unloads.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_actions_follow_lifecycle_and_commits() {
    let (config, _) = configuration();
    let counting = Arc::new(Counting::default());
    let action: Arc<dyn ConfigAction> = counting.clone();
    config.add_action(Arc::clone(&action));
    config
        .subscribe(SubscriptionCriteria::new(), Recorder::new(), Arc::new(()))
        .unwrap();

    config.create_object(DATA_DB, "Library", "tls").unwrap();
    config.commit("add tls").unwrap();
    config.flush_notifications();
    assert_eq!(counting.notified.load(Ordering::SeqCst), 1);

    config.close_db().unwrap();
    config.open_db(DATA_DB).unwrap();
    assert_eq!(counting.unloads.load(Ordering::SeqCst), 1);
    assert_eq!(counting.loads.load(Ordering::SeqCst), 1);

    config.remove_action(&action);
    config.close_db().unwrap();
    assert_eq!(counting.unloads.load(Ordering::SeqCst), 1);
}
