//! Change records delivered to subscribers

use serde::{Deserialize, Serialize};
use std::fmt;

/// One class's contribution to a notification batch.
///
/// The created, changed and deleted sets are disjoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    class_name: String,
    created: Vec<String>,
    changed: Vec<String>,
    deleted: Vec<String>,
}

impl Change {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            created: Vec::new(),
            changed: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn created(&self) -> &[String] {
        &self.created
    }

    pub fn changed(&self) -> &[String] {
        &self.changed
    }

    pub fn deleted(&self) -> &[String] {
        &self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.changed.is_empty() && self.deleted.is_empty()
    }

    /// Record a change by its action symbol: `+` created, `~` changed, `-` deleted.
    ///
    /// Unknown symbols are ignored.
    pub fn add(&mut self, uid: impl Into<String>, action: char) {
        match action {
            '+' => self.mark_created(uid.into()),
            '~' => self.mark_changed(uid.into()),
            '-' => self.mark_deleted(uid.into()),
            _ => {}
        }
    }

    /// A change restricted to the given identities; created ids are dropped
    pub(crate) fn restricted_to(&self, uids: impl Fn(&str) -> bool) -> Change {
        Change {
            class_name: self.class_name.clone(),
            created: Vec::new(),
            changed: self.changed.iter().filter(|u| uids(u.as_str())).cloned().collect(),
            deleted: self.deleted.iter().filter(|u| uids(u.as_str())).cloned().collect(),
        }
    }

    fn mark_created(&mut self, uid: String) {
        if let Some(pos) = self.deleted.iter().position(|u| *u == uid) {
            // deleted then re-created in the same batch
            self.deleted.remove(pos);
            push_unique(&mut self.changed, uid);
        } else if !self.changed.contains(&uid) {
            push_unique(&mut self.created, uid);
        }
    }

    fn mark_changed(&mut self, uid: String) {
        if !self.created.contains(&uid) && !self.deleted.contains(&uid) {
            push_unique(&mut self.changed, uid);
        }
    }

    fn mark_deleted(&mut self, uid: String) {
        if let Some(pos) = self.created.iter().position(|u| *u == uid) {
            // created then deleted in the same batch: nothing happened
            self.created.remove(pos);
            return;
        }
        self.changed.retain(|u| *u != uid);
        push_unique(&mut self.deleted, uid);
    }
}

fn push_unique(ids: &mut Vec<String>, uid: String) {
    if !ids.contains(&uid) {
        ids.push(uid);
    }
}

fn write_ids(f: &mut fmt::Formatter<'_>, label: &str, ids: &[String]) -> fmt::Result {
    if ids.is_empty() {
        return Ok(());
    }
    write!(f, "\n  {label} {} object(s):", ids.len())?;
    for id in ids {
        write!(f, "\n    \"{id}\"")?;
    }
    Ok(())
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "changes for class \"{}\":", self.class_name)?;
        write_ids(f, "created", &self.created)?;
        write_ids(f, "changed", &self.changed)?;
        write_ids(f, "deleted", &self.deleted)
    }
}

/// Accumulates object changes into an ordered, per-class batch
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    changes: Vec<Change>,
}

impl ChangeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&mut self, class_name: &str, uid: &str) {
        self.entry(class_name).add(uid, '+');
    }

    pub fn changed(&mut self, class_name: &str, uid: &str) {
        self.entry(class_name).add(uid, '~');
    }

    pub fn deleted(&mut self, class_name: &str, uid: &str) {
        self.entry(class_name).add(uid, '-');
    }

    /// Fold another batch into this one, preserving the action semantics
    pub fn merge(&mut self, other: ChangeBatch) {
        for change in other.changes {
            let entry = self.entry(&change.class_name);
            for uid in change.deleted {
                entry.add(uid, '-');
            }
            for uid in change.created {
                entry.add(uid, '+');
            }
            for uid in change.changed {
                entry.add(uid, '~');
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.iter().all(Change::is_empty)
    }

    /// Finished batch in first-touched class order, empty classes dropped
    pub fn into_changes(self) -> Vec<Change> {
        self.changes.into_iter().filter(|c| !c.is_empty()).collect()
    }

    fn entry(&mut self, class_name: &str) -> &mut Change {
        let pos = match self.changes.iter().position(|c| c.class_name == class_name) {
            Some(pos) => pos,
            None => {
                self.changes.push(Change::new(class_name));
                self.changes.len() - 1
            }
        };
        &mut self.changes[pos]
    }
}
