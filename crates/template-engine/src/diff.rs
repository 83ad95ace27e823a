//! Structural diff of rendered ClusterInstance specs
//!
//! Changes are classified against ordered pattern sets so the caller can
//! refuse updates to fields that cannot change after installation while
//! still allowing label edits and node scaling.

use std::fmt;

use serde_json::Value;

/// Kind of change at a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Create => f.write_str("create"),
            ChangeType::Update => f.write_str("update"),
            ChangeType::Delete => f.write_str("delete"),
        }
    }
}

/// One difference between two documents
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Path segments from the document root
    pub path: Vec<String>,
    pub change: ChangeType,
    pub from: Option<Value>,
    pub to: Option<Value>,
}

impl Change {
    /// Dot-joined path, e.g. `nodes.0.hostName`
    pub fn dotted_path(&self) -> String {
        self.path.join(".")
    }
}

/// Fields free to change at any time
pub const ALLOWED_PATHS: [&[&str]; 4] = [
    &["extraAnnotations"],
    &["extraLabels"],
    &["nodes", "*", "extraAnnotations"],
    &["nodes", "*", "extraLabels"],
];

/// Fields filled in by the hardware layer
pub const IGNORED_PATHS: [&[&str]; 7] = [
    &["nodes", "*", "bmcAddress"],
    &["nodes", "*", "bmcCredentialsName"],
    &["nodes", "*", "bootMACAddress"],
    &["nodes", "*", "hostRef"],
    &["nodes", "*", "nodeNetwork", "interfaces", "*", "macAddress"],
    &["nodes", "*", "nodeNetwork", "interfaces", "*", "label"],
    &["suppressedManifests"],
];

/// Class of a change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeClass {
    Allowed,
    Ignored,
    Scaling,
    Immutable,
}

/// Compute every difference between `old` and `new`
pub fn diff(old: &Value, new: &Value) -> Vec<Change> {
    let mut changes = Vec::new();
    diff_into(&mut Vec::new(), old, new, &mut changes);
    changes
}

fn diff_into(path: &mut Vec<String>, old: &Value, new: &Value, changes: &mut Vec<Change>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut keys: Vec<&String> = old_map.keys().chain(new_map.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                path.push(key.clone());
                match (old_map.get(key), new_map.get(key)) {
                    (Some(o), Some(n)) => diff_into(path, o, n, changes),
                    (Some(o), None) => changes.push(removed(path, o)),
                    (None, Some(n)) => changes.push(created(path, n)),
                    (None, None) => {}
                }
                path.pop();
            }
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            for i in 0..old_items.len().max(new_items.len()) {
                path.push(i.to_string());
                match (old_items.get(i), new_items.get(i)) {
                    (Some(o), Some(n)) => diff_into(path, o, n, changes),
                    (Some(o), None) => changes.push(removed(path, o)),
                    (None, Some(n)) => changes.push(created(path, n)),
                    (None, None) => {}
                }
                path.pop();
            }
        }
        (o, n) if o != n => changes.push(Change {
            path: path.clone(),
            change: ChangeType::Update,
            from: Some(o.clone()),
            to: Some(n.clone()),
        }),
        _ => {}
    }
}

fn created(path: &[String], value: &Value) -> Change {
    Change {
        path: path.to_vec(),
        change: ChangeType::Create,
        from: None,
        to: Some(value.clone()),
    }
}

fn removed(path: &[String], value: &Value) -> Change {
    Change {
        path: path.to_vec(),
        change: ChangeType::Delete,
        from: Some(value.clone()),
        to: None,
    }
}

/// Whether `pattern` matches a prefix of `path`; `*` matches any one segment
pub fn matches_pattern(pattern: &[&str], path: &[String]) -> bool {
    pattern.len() <= path.len()
        && pattern
            .iter()
            .zip(path)
            .all(|(expected, actual)| *expected == "*" || *expected == actual)
}

fn is_scaling_path(path: &[String]) -> bool {
    path.len() == 2 && path[0] == "nodes" && path[1].parse::<usize>().is_ok()
}

/// Classify a change path
pub fn classify(path: &[String]) -> ChangeClass {
    if ALLOWED_PATHS.iter().any(|p| matches_pattern(p, path)) {
        ChangeClass::Allowed
    } else if IGNORED_PATHS.iter().any(|p| matches_pattern(p, path)) {
        ChangeClass::Ignored
    } else if is_scaling_path(path) {
        ChangeClass::Scaling
    } else {
        ChangeClass::Immutable
    }
}

/// Paths of immutable-field updates and node additions/removals between two specs
///
/// Returns `(immutable, scaling)` as dotted paths.
pub fn find_immutable_field_updates(old: &Value, new: &Value) -> (Vec<String>, Vec<String>) {
    let mut immutable = Vec::new();
    let mut scaling = Vec::new();

    for change in diff(old, new) {
        match classify(&change.path) {
            ChangeClass::Immutable => immutable.push(change.dotted_path()),
            ChangeClass::Scaling => scaling.push(change.dotted_path()),
            ChangeClass::Allowed | ChangeClass::Ignored => {}
        }
    }
    (immutable, scaling)
}
