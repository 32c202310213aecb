//! `$util.list`

use serde_json::Value as JsonValue;

/// A copy of `list` keeping only the elements that also appear in `retain`.
pub fn copy_and_retain_all(list: &[JsonValue], retain: &[JsonValue]) -> Vec<JsonValue> {
    list.iter().filter(|v| retain.contains(v)).cloned().collect()
}

/// A copy of `list` without the elements that appear in `remove`.
pub fn copy_and_remove_all(list: &[JsonValue], remove: &[JsonValue]) -> Vec<JsonValue> {
    list.iter().filter(|v| !remove.contains(v)).cloned().collect()
}
