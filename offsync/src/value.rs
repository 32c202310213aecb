//! Value helpers that mimic the host template environment's view of JSON
//! data.

use std::{ffi::OsStr, fs, path::Path, str::FromStr};

use serde_json::{Map as JsonMap, Number as JsonNumber, Value as JsonValue};
use serde_yaml::Value as YamlValue;

use crate::Error;

/// We use [`serde_json::Map`] as our default map structure.
pub type Map = JsonMap<String, JsonValue>;

/// The type names reported to templates by `typeOf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueType {
    Null,
    List,
    Map,
    Number,
    String,
    Boolean,
}

impl ValueType {
    pub fn of(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Array(_) => Self::List,
            JsonValue::Object(_) => Self::Map,
            JsonValue::Number(_) => Self::Number,
            JsonValue::String(_) => Self::String,
            JsonValue::Bool(_) => Self::Boolean,
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Null => "Null",
                Self::List => "List",
                Self::Map => "Map",
                Self::Number => "Number",
                Self::String => "String",
                Self::Boolean => "Boolean",
            }
        )
    }
}

/// Coerces a value into the shapes templates see: integral floating point
/// numbers become integers, everything else is kept as-is.
pub fn coerce(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Number(n) => JsonValue::Number(coerce_number(n)),
        JsonValue::Array(arr) => JsonValue::Array(arr.into_iter().map(coerce).collect()),
        JsonValue::Object(obj) => {
            JsonValue::Object(obj.into_iter().map(|(k, v)| (k, coerce(v))).collect())
        }
        other => other,
    }
}

fn coerce_number(n: JsonNumber) -> JsonNumber {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
            JsonNumber::from(f as i64)
        }
        _ => n,
    }
}

/// Formats a number the way the host's `String(number)` would, so integral
/// floats print without a trailing `.0`.
pub fn number_to_string(n: &JsonNumber) -> String {
    if n.is_f64() {
        let f = n.as_f64().unwrap_or_default();
        if f.fract() == 0.0 && f.abs() < 1.0e21 {
            return format!("{}", f as i128);
        }
        return f.to_string();
    }
    n.to_string()
}

/// The host's string conversion of an arbitrary value.
pub fn to_js_string(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "null".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => number_to_string(n),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(arr) => arr
            .iter()
            .map(|v| match v {
                JsonValue::Null => String::new(),
                v => to_js_string(v),
            })
            .collect::<Vec<String>>()
            .join(","),
        JsonValue::Object(_) => "[object Object]".to_string(),
    }
}

/// Host truthiness: `null`, `false`, `0`, `NaN` and `""` are falsy.
pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

/// The supported file formats from which configuration can be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SupportedFormat {
    Json,
    Yaml,
}

impl FromStr for SupportedFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Ok(match lower.as_ref() {
            "json" => Self::Json,
            "yaml" | "yml" => Self::Yaml,
            _ => return Err(Error::UnsupportedFileType(s.to_string())),
        })
    }
}

/// Parses content in the given format into a JSON value.
pub fn load_as(fmt: SupportedFormat, content: &str) -> Result<JsonValue, Error> {
    Ok(match fmt {
        SupportedFormat::Json => serde_json::from_str::<JsonValue>(content)?,
        SupportedFormat::Yaml => {
            serde_json::to_value(serde_yaml::from_str::<YamlValue>(content)?)?
        }
    })
}

/// Loads a value from the given file, detecting its format from the file
/// extension.
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<JsonValue, Error> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(OsStr::to_str)
        .ok_or_else(|| Error::CannotDetermineFileType(path.to_path_buf()))?;
    let fmt = SupportedFormat::from_str(ext)?;
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("while trying to read from {}", path.display()), e))?;
    load_as(fmt, &content)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn coercion_turns_integral_floats_into_integers() {
        let coerced = coerce(json!({"a": 1.0, "b": [2.5, 3.0], "c": "4"}));
        assert_eq!(coerced, json!({"a": 1, "b": [2.5, 3], "c": "4"}));
        assert!(coerced["a"].is_i64());
    }

    #[test]
    fn js_string_conversion() {
        assert_eq!(to_js_string(&json!(5.0)), "5");
        assert_eq!(to_js_string(&json!(0.5)), "0.5");
        assert_eq!(to_js_string(&json!([1, null, "a"])), "1,,a");
        assert_eq!(to_js_string(&json!({"a": 1})), "[object Object]");
        assert_eq!(to_js_string(&JsonValue::Null), "null");
    }

    #[test]
    fn truthiness() {
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(false)));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!("0")));
    }

    #[test]
    fn type_names() {
        assert_eq!(ValueType::of(&json!(null)).to_string(), "Null");
        assert_eq!(ValueType::of(&json!([1])).to_string(), "List");
        assert_eq!(ValueType::of(&json!({})).to_string(), "Map");
        assert_eq!(ValueType::of(&json!(1.5)).to_string(), "Number");
        assert_eq!(ValueType::of(&json!("x")).to_string(), "String");
        assert_eq!(ValueType::of(&json!(true)).to_string(), "Boolean");
    }

    #[test]
    fn yaml_loads_as_json() {
        let value = load_as(SupportedFormat::Yaml, "a: 1\nb:\n  - x\n").unwrap();
        assert_eq!(value, json!({"a": 1, "b": ["x"]}));
    }
}
