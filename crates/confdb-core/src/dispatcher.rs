//! Notification dispatcher
//!
//! Runs subscriber callbacks on a fixed pool of worker threads, away from
//! the mutation path. Each subscriber has its own FIFO of pending batches
//! and at most one batch in flight, so callbacks of one subscriber never
//! overlap and run in arrival order. Different subscribers run in parallel
//! with no relative ordering.

use crate::{Change, Error, Result, Subscription};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};

/// Identifies one user subscription on a facade
pub type CallbackId = u64;

/// Worker pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Number of worker threads
    pub workers: usize,
    /// Pending batches across all subscribers before new ones are dropped
    pub max_queue_depth: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_queue_depth: 1024,
        }
    }
}

/// Error returned when the pending queue is full.
#[derive(Debug)]
pub struct BackpressureError;

impl std::fmt::Display for BackpressureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification queue is full")
    }
}

impl std::error::Error for BackpressureError {}

/// Dispatcher metrics snapshot.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherStats {
    pub pending: usize,
    pub in_flight: usize,
    pub delivered: u64,
    pub failed: u64,
}

struct Pending {
    subscription: Arc<Subscription>,
    changes: Vec<Change>,
}

#[derive(Default)]
struct SubscriberQueue {
    batches: VecDeque<Pending>,
    running: bool,
}

#[derive(Default)]
struct DispatchState {
    // subscribers that are idle and have at least one pending batch
    ready: VecDeque<CallbackId>,
    subscribers: HashMap<CallbackId, SubscriberQueue>,
    pending: usize,
    in_flight: usize,
}

struct DispatcherInner {
    state: Mutex<DispatchState>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    max_queue_depth: usize,
    delivered: AtomicU64,
    failed: AtomicU64,
}

pub struct NotificationDispatcher {
    inner: Arc<DispatcherInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl NotificationDispatcher {
    /// Start the worker threads, named `confdb-notify-0`, `confdb-notify-1`, ...
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        let inner = Arc::new(DispatcherInner {
            state: Mutex::new(DispatchState::default()),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            max_queue_depth: config.max_queue_depth.max(1),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(config.workers.max(1));
        for i in 0..config.workers.max(1) {
            let inner_clone = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name(format!("confdb-notify-{i}"))
                .spawn(move || worker_loop(&inner_clone))
                .map_err(|e| Error::system_with("cannot spawn notification worker", e))?;
            workers.push(handle);
        }

        Ok(Self {
            inner,
            workers: Mutex::new(workers),
        })
    }

    /// Queue a batch behind any earlier batches of the same subscriber
    pub fn dispatch(
        &self,
        id: CallbackId,
        subscription: Arc<Subscription>,
        changes: Vec<Change>,
    ) -> std::result::Result<(), BackpressureError> {
        if self.inner.shutdown.load(AtomicOrdering::Acquire) {
            return Err(BackpressureError);
        }

        let mut state = self.inner.state.lock();
        if state.pending >= self.inner.max_queue_depth {
            return Err(BackpressureError);
        }

        let queue = state.subscribers.entry(id).or_default();
        let was_idle = !queue.running && queue.batches.is_empty();
        queue.batches.push_back(Pending {
            subscription,
            changes,
        });
        state.pending += 1;
        if was_idle {
            state.ready.push_back(id);
        }
        drop(state);

        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Drop batches not yet started for a subscriber
    pub fn forget(&self, id: CallbackId) {
        let mut state = self.inner.state.lock();
        let Some(queue) = state.subscribers.get_mut(&id) else {
            return;
        };
        let dropped = queue.batches.len();
        queue.batches.clear();
        let running = queue.running;
        if !running {
            state.subscribers.remove(&id);
        }
        state.ready.retain(|ready| *ready != id);
        state.pending -= dropped;
        if state.pending == 0 && state.in_flight == 0 {
            self.inner.drain_cond.notify_all();
        }
    }

    /// Block until every queued and in-flight batch has been handled.
    pub fn drain(&self) {
        let mut state = self.inner.state.lock();
        while state.pending > 0 || state.in_flight > 0 {
            self.inner.drain_cond.wait(&mut state);
        }
    }

    /// Signal workers to exit once the queue is empty and join them
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, AtomicOrdering::Release);
        {
            let _state = self.inner.state.lock();
            self.inner.work_ready.notify_all();
        }

        let mut workers = self.workers.lock();
        let current = std::thread::current().id();
        for handle in workers.drain(..) {
            // the last handle may be dropped from inside a callback
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        let state = self.inner.state.lock();
        DispatcherStats {
            pending: state.pending,
            in_flight: state.in_flight,
            delivered: self.inner.delivered.load(AtomicOrdering::Relaxed),
            failed: self.inner.failed.load(AtomicOrdering::Relaxed),
        }
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Marks the subscriber idle again even if its callback panicked.
struct InFlightGuard<'a> {
    inner: &'a DispatcherInner,
    id: CallbackId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.in_flight -= 1;

        let mut requeue = false;
        let mut remove = false;
        if let Some(queue) = state.subscribers.get_mut(&self.id) {
            queue.running = false;
            requeue = !queue.batches.is_empty();
            remove = !requeue;
        }
        if requeue {
            state.ready.push_back(self.id);
            self.inner.work_ready.notify_one();
        } else if remove {
            state.subscribers.remove(&self.id);
        }

        if state.pending == 0 && state.in_flight == 0 {
            self.inner.drain_cond.notify_all();
        }
    }
}

fn worker_loop(inner: &DispatcherInner) {
    loop {
        let (id, task) = {
            let mut state = inner.state.lock();
            loop {
                if let Some(id) = state.ready.pop_front() {
                    let task = state.subscribers.get_mut(&id).and_then(|queue| {
                        let task = queue.batches.pop_front()?;
                        queue.running = true;
                        Some(task)
                    });
                    if let Some(task) = task {
                        state.pending -= 1;
                        state.in_flight += 1;
                        break (id, task);
                    }
                    continue;
                }
                if inner.shutdown.load(AtomicOrdering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut state);
            }
        };

        let _guard = InFlightGuard { inner, id };

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            task.subscription.invoke(&task.changes)
        }));
        match outcome {
            Ok(Ok(())) => {
                inner.delivered.fetch_add(1, AtomicOrdering::Relaxed);
                debug!(target: "confdb::notify", callback = id, classes = task.changes.len(), "batch delivered");
            }
            Ok(Err(e)) => {
                inner.failed.fetch_add(1, AtomicOrdering::Relaxed);
                error!(target: "confdb::notify", callback = id, "callback failed: {e}");
            }
            Err(panic) => {
                inner.failed.fetch_add(1, AtomicOrdering::Relaxed);
                error!(
                    target: "confdb::notify",
                    callback = id,
                    "callback panicked: {}",
                    panic.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
                );
            }
        }
    }
}
