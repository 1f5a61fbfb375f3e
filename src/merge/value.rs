//! Generic structural deep merge over untyped JSON documents
//!
//! This is the reference algorithm every typed schema follows:
//!
//! - object onto object merges key by key; keys absent from the patch are kept
//! - any other patch value (scalar, array, `null`) replaces the target outright
//! - an object whose keys are all array indices, applied onto an array, merges
//!   element-wise by index (the feed sends list deltas in this shape); an
//!   empty object names no index and leaves the array as it is

use serde_json::{Map, Value};

/// Largest index gap accepted when growing an array from an index-keyed patch
pub const MAX_INDEX_GROWTH: usize = 4096;

/// Merge `patch` into `target` in place
pub fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(existing), Value::Object(incoming)) => merge_objects(existing, incoming),
        (Value::Array(existing), Value::Object(incoming))
            if incoming.is_empty() || is_index_keyed(incoming) =>
        {
            merge_indexed(existing, incoming)
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Merge a sequence of patches, in order, onto an empty object
pub fn fold_patches<'a>(patches: impl IntoIterator<Item = &'a Value>) -> Value {
    let mut state = Value::Object(Map::new());
    for patch in patches {
        deep_merge(&mut state, patch);
    }
    state
}

fn merge_objects(existing: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    for (key, value) in incoming {
        match existing.get_mut(key) {
            Some(slot) => deep_merge(slot, value),
            None => {
                existing.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Whether every key of an object parses as an array index
pub fn is_index_keyed(object: &Map<String, Value>) -> bool {
    !object.is_empty() && object.keys().all(|k| k.parse::<usize>().is_ok())
}

fn merge_indexed(existing: &mut Vec<Value>, incoming: &Map<String, Value>) {
    for (key, value) in incoming {
        let Ok(index) = key.parse::<usize>() else {
            continue;
        };
        if index >= existing.len() + MAX_INDEX_GROWTH {
            tracing::warn!(index, len = existing.len(), "Index-keyed patch too far past end, skipping");
            continue;
        }
        if index >= existing.len() {
            existing.resize(index + 1, Value::Null);
        }
        deep_merge(&mut existing[index], value);
    }
}
