//! `$util.dynamodb`: conversion of native values into the tagged attribute
//! representation used by key-value stores.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value as JsonValue;

use super::UtilError;
use crate::value::{number_to_string, to_js_string};

/// A tagged attribute value. Serializes as `{"<TAG>": value}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    String(String),
    #[serde(rename = "N")]
    Number(String),
    #[serde(rename = "B")]
    Binary(String),
    #[serde(rename = "BOOL")]
    Boolean(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "L")]
    List(Vec<AttributeValue>),
    #[serde(rename = "M")]
    Map(BTreeMap<String, AttributeValue>),
    #[serde(rename = "SS")]
    StringSet(Vec<String>),
    #[serde(rename = "NS")]
    NumberSet(Vec<String>),
    #[serde(rename = "BS")]
    BinarySet(Vec<String>),
}

impl AttributeValue {
    /// The attribute's JSON text, as returned by the `*Json` helpers.
    pub fn to_json_string(&self) -> String {
        // Attribute values only hold strings, booleans, lists and maps.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Converts any value, recursing into lists and maps.
pub fn to_dynamodb(value: &JsonValue) -> AttributeValue {
    match value {
        JsonValue::Null => AttributeValue::Null(true),
        JsonValue::Bool(b) => AttributeValue::Boolean(*b),
        JsonValue::Number(n) => AttributeValue::Number(number_to_string(n)),
        JsonValue::String(s) => AttributeValue::String(s.clone()),
        JsonValue::Array(arr) => AttributeValue::List(arr.iter().map(to_dynamodb).collect()),
        JsonValue::Object(obj) => AttributeValue::Map(
            obj.iter()
                .map(|(k, v)| (k.clone(), to_dynamodb(v)))
                .collect(),
        ),
    }
}

pub fn to_string(value: &JsonValue) -> AttributeValue {
    AttributeValue::String(to_js_string(value))
}

pub fn to_number(value: &JsonValue) -> Result<AttributeValue, UtilError> {
    Ok(AttributeValue::Number(number_text(value)?))
}

pub fn to_binary(value: &JsonValue) -> AttributeValue {
    AttributeValue::Binary(to_js_string(value))
}

pub fn to_boolean(value: &JsonValue) -> AttributeValue {
    match value {
        JsonValue::Bool(b) => AttributeValue::Boolean(*b),
        other => AttributeValue::Boolean(crate::value::is_truthy(other)),
    }
}

pub fn to_null() -> AttributeValue {
    AttributeValue::Null(true)
}

pub fn to_list(value: &JsonValue) -> Result<AttributeValue, UtilError> {
    match value {
        JsonValue::Array(_) => Ok(to_dynamodb(value)),
        other => Err(expected("a list", other)),
    }
}

pub fn to_map(value: &JsonValue) -> Result<AttributeValue, UtilError> {
    match value {
        JsonValue::Object(_) => Ok(to_dynamodb(value)),
        other => Err(expected("a map", other)),
    }
}

/// Converts each value of a map, leaving the outer map untagged.
pub fn to_map_values(value: &JsonValue) -> Result<BTreeMap<String, AttributeValue>, UtilError> {
    match value {
        JsonValue::Object(obj) => Ok(obj
            .iter()
            .map(|(k, v)| (k.clone(), to_dynamodb(v)))
            .collect()),
        other => Err(expected("a map", other)),
    }
}

pub fn to_string_set(value: &JsonValue) -> AttributeValue {
    AttributeValue::StringSet(dedup(elements(value).iter().map(to_js_string)))
}

pub fn to_number_set(value: &JsonValue) -> Result<AttributeValue, UtilError> {
    let numbers = elements(value)
        .iter()
        .map(number_text)
        .collect::<Result<Vec<String>, UtilError>>()?;
    Ok(AttributeValue::NumberSet(dedup(numbers.into_iter())))
}

pub fn to_binary_set(value: &JsonValue) -> AttributeValue {
    AttributeValue::BinarySet(dedup(elements(value).iter().map(to_js_string)))
}

pub fn to_s3_object() -> Result<AttributeValue, UtilError> {
    Err(UtilError::NotImplemented("toS3Object"))
}

pub fn to_s3_object_json() -> Result<String, UtilError> {
    Err(UtilError::NotImplemented("toS3ObjectJson"))
}

pub fn from_s3_object_json() -> Result<JsonValue, UtilError> {
    Err(UtilError::NotImplemented("fromS3ObjectJson"))
}

// A scalar is treated as a one-element list.
fn elements(value: &JsonValue) -> Vec<JsonValue> {
    match value {
        JsonValue::Array(arr) => arr.clone(),
        other => vec![other.clone()],
    }
}

// Sets keep the first occurrence of each member.
fn dedup<I: Iterator<Item = String>>(items: I) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

fn number_text(value: &JsonValue) -> Result<String, UtilError> {
    match value {
        JsonValue::Number(n) => Ok(number_to_string(n)),
        JsonValue::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        JsonValue::Null => Ok("0".to_string()),
        JsonValue::String(s) if s.trim().is_empty() => Ok("0".to_string()),
        JsonValue::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(|n| number_to_string(&n))
            .ok_or_else(|| UtilError::Invalid(format!("cannot convert \"{}\" to a number", s))),
        other => Err(expected("a number", other)),
    }
}

fn expected(what: &str, got: &JsonValue) -> UtilError {
    UtilError::Invalid(format!(
        "expected {}, but got a value of type {}",
        what,
        crate::ValueType::of(got)
    ))
}
