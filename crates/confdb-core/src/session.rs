//! Per-connection context passed to every backend call
//!
//! A session owns what would otherwise be global state of a connection:
//! the commit credentials, the single active subscription scope and the
//! sink that receives notification batches for that scope.

use crate::{Change, SubscriptionCriteria};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Receives notification batches produced by a backend.
///
/// Called on the mutation path: implementations must hand the batch off
/// and return without running user code.
pub trait ChangeSink: Send + Sync {
    fn deliver(&self, changes: Vec<Change>);
}

/// User and password used to sign commits
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

pub struct Session {
    id: u64,
    credentials: Mutex<Option<Credentials>>,
    scope: Mutex<Option<SubscriptionCriteria>>,
    sink: Option<Arc<dyn ChangeSink>>,
}

impl Session {
    /// A session that cannot receive notifications
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A session delivering notifications to `sink`
    pub fn with_sink(sink: Arc<dyn ChangeSink>) -> Self {
        Self::build(Some(sink))
    }

    fn build(sink: Option<Arc<dyn ChangeSink>>) -> Self {
        Self {
            id: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            credentials: Mutex::new(None),
            scope: Mutex::new(None),
            sink,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials.lock().clone()
    }

    pub fn set_credentials(&self, credentials: Option<Credentials>) {
        *self.credentials.lock() = credentials;
    }

    /// The active subscription scope, if subscribed
    pub fn scope(&self) -> Option<SubscriptionCriteria> {
        self.scope.lock().clone()
    }

    /// Replace (or clear) the active scope; the last writer wins
    pub fn set_scope(&self, scope: Option<SubscriptionCriteria>) {
        *self.scope.lock() = scope;
    }

    pub fn is_subscribed(&self) -> bool {
        self.scope.lock().is_some()
    }

    /// Filter a batch through the active scope and hand it to the sink.
    ///
    /// Returns whether anything was delivered.
    pub fn notify(&self, changes: &[Change]) -> bool {
        let Some(sink) = &self.sink else {
            return false;
        };
        let selected = match &*self.scope.lock() {
            Some(scope) => scope.select(changes),
            None => return false,
        };
        if selected.is_empty() {
            return false;
        }
        sink.deliver(selected);
        true
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}
