//! `$util.map`
//!
//! Both helpers accept either a plain map or a wrapped map, i.e. an object
//! whose only key is `map`, and return a copy of the same shape.

use serde_json::Value as JsonValue;

use super::UtilError;
use crate::value::{to_js_string, Map};

pub fn copy_and_retain_all_keys(map: &JsonValue, keys: &[JsonValue]) -> Result<JsonValue, UtilError> {
    let keys = key_names(keys);
    with_inner(map, |inner| inner.retain(|k, _| keys.contains(k)))
}

pub fn copy_and_remove_all_keys(map: &JsonValue, keys: &[JsonValue]) -> Result<JsonValue, UtilError> {
    let keys = key_names(keys);
    with_inner(map, |inner| inner.retain(|k, _| !keys.contains(k)))
}

fn key_names(keys: &[JsonValue]) -> Vec<String> {
    keys.iter().map(to_js_string).collect()
}

fn with_inner<F>(map: &JsonValue, f: F) -> Result<JsonValue, UtilError>
where
    F: FnOnce(&mut Map),
{
    let mut copy = map.clone();
    let inner = match &mut copy {
        JsonValue::Object(outer) if is_wrapped(outer) => match outer.get_mut("map") {
            Some(JsonValue::Object(inner)) => inner,
            _ => unreachable!(),
        },
        JsonValue::Object(plain) => plain,
        other => {
            return Err(UtilError::Invalid(format!(
                "expected a map, but got {}",
                to_js_string(other)
            )))
        }
    };
    f(inner);
    Ok(copy)
}

fn is_wrapped(outer: &Map) -> bool {
    outer.len() == 1 && matches!(outer.get("map"), Some(JsonValue::Object(_)))
}
