//! Subscription criteria and callbacks

use crate::Change;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Opaque user parameter echoed back on every callback invocation
pub type Parameter = Arc<dyn Any + Send + Sync>;

/// Outcome of a callback; failures are logged by the dispatcher
pub type CallbackResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receiver of notification batches
pub trait Callback: Send + Sync {
    fn process_changes(&self, changes: &[Change], parameter: &Parameter) -> CallbackResult;
}

impl<F> Callback for F
where
    F: Fn(&[Change], &Parameter) -> CallbackResult + Send + Sync,
{
    fn process_changes(&self, changes: &[Change], parameter: &Parameter) -> CallbackResult {
        self(changes, parameter)
    }
}

/// Classes and objects a subscriber is interested in.
///
/// Empty criteria select every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionCriteria {
    classes: BTreeSet<String>,
    objects: BTreeMap<String, BTreeSet<String>>,
}

impl SubscriptionCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to all changes of a class
    pub fn add_class(&mut self, class_name: impl Into<String>) -> &mut Self {
        self.classes.insert(class_name.into());
        self
    }

    /// Subscribe to changes of one object
    pub fn add_object(&mut self, class_name: impl Into<String>, uid: impl Into<String>) -> &mut Self {
        self.objects
            .entry(class_name.into())
            .or_default()
            .insert(uid.into());
        self
    }

    pub fn remove_class(&mut self, class_name: &str) -> &mut Self {
        self.classes.remove(class_name);
        self
    }

    pub fn remove_object(&mut self, class_name: &str, uid: &str) -> &mut Self {
        if let Some(uids) = self.objects.get_mut(class_name) {
            uids.remove(uid);
            if uids.is_empty() {
                self.objects.remove(class_name);
            }
        }
        self
    }

    /// True when nothing is selected explicitly, meaning "everything"
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.objects.is_empty()
    }

    pub fn classes(&self) -> &BTreeSet<String> {
        &self.classes
    }

    pub fn objects(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.objects
    }

    /// Union of several criteria.
    ///
    /// Subscribing to everything wins, and objects of a class that is
    /// subscribed as a whole are dropped.
    pub fn merged<'a>(all: impl IntoIterator<Item = &'a SubscriptionCriteria>) -> Self {
        let mut merged = SubscriptionCriteria::new();
        let mut objects: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for criteria in all {
            if criteria.is_empty() {
                return SubscriptionCriteria::new();
            }
            merged.classes.extend(criteria.classes.iter().cloned());
            for (class, uids) in &criteria.objects {
                objects
                    .entry(class.clone())
                    .or_default()
                    .extend(uids.iter().cloned());
            }
        }

        objects.retain(|class, _| !merged.classes.contains(class));
        merged.objects = objects;
        merged
    }

    /// The part of a batch this subscriber should see.
    ///
    /// Object subscribers only see changed and deleted identities; an
    /// object they named cannot have been created under their watch.
    pub fn select(&self, changes: &[Change]) -> Vec<Change> {
        if self.is_empty() {
            return changes.to_vec();
        }

        changes
            .iter()
            .filter_map(|change| {
                if self.classes.contains(change.class_name()) {
                    return Some(change.clone());
                }
                let uids = self.objects.get(change.class_name())?;
                let restricted = change.restricted_to(|uid| uids.contains(uid));
                (!restricted.is_empty()).then_some(restricted)
            })
            .collect()
    }
}

impl fmt::Display for SubscriptionCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Subscription criteria:")?;

        write!(f, "  classes subscription: ")?;
        if self.classes.is_empty() {
            writeln!(f, "(null)")?;
        } else {
            writeln!(f)?;
            for class in &self.classes {
                writeln!(f, "    \"{class}\"")?;
            }
        }

        write!(f, "  objects subscription: ")?;
        if self.objects.is_empty() {
            writeln!(f, "(null)")?;
        } else {
            writeln!(f)?;
            for (class, uids) in &self.objects {
                writeln!(f, "    objects of class \"{class}\":")?;
                for uid in uids {
                    writeln!(f, "      \"{uid}\"")?;
                }
            }
        }
        Ok(())
    }
}

/// A registered subscription: criteria, callback and user parameter
#[derive(Clone)]
pub struct Subscription {
    criteria: SubscriptionCriteria,
    callback: Arc<dyn Callback>,
    parameter: Parameter,
}

impl Subscription {
    pub fn new(criteria: SubscriptionCriteria, callback: Arc<dyn Callback>, parameter: Parameter) -> Self {
        Self {
            criteria,
            callback,
            parameter,
        }
    }

    pub fn criteria(&self) -> &SubscriptionCriteria {
        &self.criteria
    }

    pub fn parameter(&self) -> &Parameter {
        &self.parameter
    }

    pub(crate) fn invoke(&self, changes: &[Change]) -> CallbackResult {
        self.callback.process_changes(changes, &self.parameter)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("criteria", &self.criteria)
            .finish_non_exhaustive()
    }
}
