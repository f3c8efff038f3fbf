use confdb::core::{Change, ErrorKind, Result};
use std::fmt::Debug;

/// Assert that an operation failed with the given kind of error
pub fn assert_kind<T: Debug>(result: Result<T>, kind: ErrorKind) {
    match result {
        Ok(value) => panic!("Expected {kind:?} error, got Ok({value:?})"),
        Err(e) => assert_eq!(e.kind(), kind, "Unexpected error: {e}"),
    }
}

/// Assert a class's change record
pub fn assert_change(change: &Change, class: &str, created: &[&str], changed: &[&str], deleted: &[&str]) {
    assert_eq!(change.class_name(), class);
    assert_eq!(change.created(), created, "created objects of {class}");
    assert_eq!(change.changed(), changed, "changed objects of {class}");
    assert_eq!(change.deleted(), deleted, "deleted objects of {class}");
}

/// Find the change record of a class in a batch
pub fn change_of<'a>(batch: &'a [Change], class: &str) -> &'a Change {
    batch
        .iter()
        .find(|c| c.class_name() == class)
        .unwrap_or_else(|| panic!("Expected a change of class {class} in {batch:?}"))
}
