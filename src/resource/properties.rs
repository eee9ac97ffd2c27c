//! Property maps and the comparisons the differ needs.

use serde_json::Value;
use std::collections::BTreeMap;

/// Ordered map of resource properties.
///
/// Ordered so that serialized snapshots and checksums are deterministic.
pub type PropertyMap = BTreeMap<String, Value>;

/// Returns `new` with every ignored path reset to its value in `old`.
///
/// Paths are top-level keys or dotted paths into nested objects
/// (`"tags.owner"`). A path absent from `old` is removed from the result.
#[must_use]
pub fn apply_ignore_changes(old: &PropertyMap, new: &PropertyMap, paths: &[String]) -> PropertyMap {
    let mut result = new.clone();

    for path in paths {
        let mut segments = path.split('.');
        let Some(head) = segments.next() else {
            continue;
        };
        let rest: Vec<&str> = segments.collect();

        if rest.is_empty() {
            match old.get(head) {
                Some(value) => {
                    result.insert(head.to_string(), value.clone());
                }
                None => {
                    result.remove(head);
                }
            }
            continue;
        }

        let old_value = old.get(head).and_then(|v| lookup(v, &rest)).cloned();
        if let Some(root) = result.get_mut(head) {
            assign(root, &rest, old_value);
        } else if let Some(value) = old_value {
            let mut root = Value::Object(serde_json::Map::new());
            assign(&mut root, &rest, Some(value));
            result.insert(head.to_string(), root);
        }
    }

    result
}

/// Lists the top-level keys whose values differ between `old` and `new`.
#[must_use]
pub fn changed_keys(old: &PropertyMap, new: &PropertyMap) -> Vec<String> {
    let mut keys: Vec<String> = old
        .keys()
        .chain(new.keys())
        .filter(|k| old.get(*k) != new.get(*k))
        .cloned()
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |current, segment| current.as_object()?.get(*segment))
}

fn assign(target: &mut Value, path: &[&str], value: Option<Value>) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut current = target;
    for segment in parents {
        let Some(object) = current.as_object_mut() else {
            return;
        };
        current = object
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }

    if let Some(object) = current.as_object_mut() {
        match value {
            Some(v) => {
                object.insert((*last).to_string(), v);
            }
            None => {
                object.remove(*last);
            }
        }
    }
}
