use crate::core::models::{ChangeSet, CleanSnapshot};
use std::collections::BTreeSet;

/// Keys whose value differs between `new` and `old`. A missing key and an
/// explicit null are the same value.
pub fn diff(new: &CleanSnapshot, old: Option<&CleanSnapshot>) -> ChangeSet {
    let empty = CleanSnapshot::new();
    let old = old.unwrap_or(&empty);

    let keys: BTreeSet<&String> = new.keys().chain(old.keys()).collect();
    let mut changes = ChangeSet::default();

    for key in keys {
        let new_value = new.get(key);
        let old_value = old.get(key);

        if new_value != old_value {
            changes.new.insert(key.clone(), new_value.clone());
            changes.old.insert(key.clone(), old_value.clone());
        }
    }

    changes
}

pub fn changed_keys(changes: &ChangeSet) -> Vec<&str> {
    changes.new.keys().map(String::as_str).collect()
}
