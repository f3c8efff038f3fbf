//! File watching for redb repositories
//!
//! Another process committing to the same repository rewrites unit files.
//! The watcher collects the names of the touched units, waits for the burst
//! of events to settle and asks the backend to reload.

use crate::redb_storage::unit_name;
use crate::{RedbBackend, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// How long to wait for more events before reloading
const SETTLE: Duration = Duration::from_millis(50);
const POLL: Duration = Duration::from_millis(200);

pub struct RepositoryWatcher {
    watcher: Option<RecommendedWatcher>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RepositoryWatcher {
    /// Start watching the repository of `backend`.
    ///
    /// The watcher thread only holds a weak reference and exits once the
    /// backend is gone.
    pub fn start(backend: &Arc<RedbBackend>) -> Result<Self> {
        let root = backend.storage().root().to_path_buf();
        let (tx, rx) = channel();

        let mut watcher = notify::recommended_watcher(tx)?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread = thread::Builder::new().name("confdb-watch".to_string()).spawn({
            let stop = Arc::clone(&stop);
            let backend = Arc::downgrade(backend);
            let roots = watched_roots(&root);
            move || watch_loop(rx, backend, roots, stop)
        })?;
        debug!(target: "confdb::watch", root = %root.display(), "watching repository");

        Ok(Self {
            watcher: Some(watcher),
            stop,
            thread: Some(thread),
        })
    }

    /// Stop watching and wait for the watcher thread
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // dropping the watcher closes the event channel
        self.watcher = None;
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for RepositoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The root as given and canonicalized; event paths may use either form
fn watched_roots(root: &Path) -> Vec<PathBuf> {
    let mut roots = vec![root.to_path_buf()];
    if let Ok(canonical) = root.canonicalize() {
        if canonical != root {
            roots.push(canonical);
        }
    }
    roots
}

fn collect_units(event: notify::Result<Event>, roots: &[PathBuf], units: &mut BTreeSet<String>) {
    let event = match event {
        Ok(event) => event,
        Err(err) => {
            error!(target: "confdb::watch", error = %err, "file watcher error");
            return;
        }
    };
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return;
    }
    for path in &event.paths {
        if let Some(unit) = roots.iter().find_map(|root| unit_name(root, path)) {
            units.insert(unit);
        }
    }
}

fn watch_loop(
    rx: Receiver<notify::Result<Event>>,
    backend: Weak<RedbBackend>,
    roots: Vec<PathBuf>,
    stop: Arc<AtomicBool>,
) {
    loop {
        let first = match rx.recv_timeout(POLL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => {
                if stop.load(Ordering::SeqCst) {
                    return;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => return,
        };
        if stop.load(Ordering::SeqCst) {
            return;
        }

        let mut units = BTreeSet::new();
        collect_units(first, &roots, &mut units);
        let deadline = Instant::now() + SETTLE;
        while let Ok(event) = rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            collect_units(event, &roots, &mut units);
        }
        if units.is_empty() {
            continue;
        }

        let Some(backend) = backend.upgrade() else {
            return;
        };
        debug!(target: "confdb::watch", ?units, "storage unit files changed");
        if let Err(err) = backend.refresh() {
            error!(target: "confdb::watch", error = %err, "reload after external change failed");
        }
    }
}
