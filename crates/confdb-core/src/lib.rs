//! Confdb Core - The object-graph configuration database abstraction
//!
//! This crate defines everything that is independent of a storage engine:
//! - `Error`: the flat error taxonomy shared by all backends
//! - `Schema`: the validated class registry with inheritance
//! - `ConfigObject`: handles resolved through the backend on every access
//! - `Query`: opaque, backend-interpreted filters and relationship paths
//! - `Change`, `SubscriptionCriteria`, `Callback`: the notification protocol
//! - `Version`: commit history records
//! - `ConfigurationImpl`: the contract every backend implements
//! - `Configuration`: the facade running the notification dispatcher
//!
//! ## Notification flow
//!
//! A backend that commits (or observes an external change) builds one
//! `Change` per affected class and hands the batch to every subscribed
//! `Session`. The session filters it through its scope and passes it to its
//! sink without running user code. The facade's sink splits the batch per
//! user subscription and queues each part on the dispatcher, which runs the
//! callbacks on worker threads, one batch at a time per subscriber.

mod backend;
mod change;
mod configuration;
mod dispatcher;
mod error;
mod object;
mod query;
mod schema;
mod session;
mod subscription;
pub mod validate;
mod version;

pub use backend::{ConfigurationImpl, ReferenceFilter};
pub use change::{Change, ChangeBatch};
pub use configuration::{ConfigAction, Configuration, ExportFilter};
pub use dispatcher::{BackpressureError, CallbackId, DispatcherConfig, DispatcherStats, NotificationDispatcher};
pub use error::{BoxError, Error, ErrorKind, Result};
pub use object::{ConfigObject, ObjectId, ObjectRef};
pub use query::Query;
pub use schema::Schema;
pub use session::{ChangeSink, Credentials, Session};
pub use subscription::{Callback, CallbackResult, Parameter, Subscription, SubscriptionCriteria};
pub use version::{parse_timestamp, Version, VersionQueryType};
