//! The helper functions available to mapping templates as `$util`.
//!
//! [`Util`] also owns the error list that template-raised errors accumulate
//! into. Clones share the same list.

pub mod dynamodb;
pub mod list;
pub mod map;
mod time;

use std::sync::Arc;

use parking_lot::Mutex;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value as JsonValue;
use subtle_encoding::base64;
use thiserror::Error;

pub use self::time::TimeUtil;
use crate::value::{is_truthy, to_js_string};
use crate::{ErrorRecord, RecordKind, ValueType};

/// Characters left untouched by the host's `encodeURI`.
const URI_UNESCAPED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b';')
    .remove(b',')
    .remove(b'/')
    .remove(b'?')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'#');

/// Failure of a helper call. Any of these aborts the template render.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UtilError {
    /// The template raised an error that has been recorded in the error list.
    #[error("{0}")]
    Raised(String),
    #[error("no support for {0}")]
    Unsupported(&'static str),
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),
    #[error("{0}")]
    Invalid(String),
}

/// The `$util` namespace of a single resolution step.
#[derive(Debug, Clone)]
pub struct Util {
    errors: Arc<Mutex<Vec<ErrorRecord>>>,
    time: TimeUtil,
}

impl Default for Util {
    fn default() -> Self {
        Self::new()
    }
}

impl Util {
    /// A namespace with an empty error list whose clock reads the current
    /// time.
    pub fn new() -> Self {
        Self::at(::time::OffsetDateTime::now_utc())
    }

    /// A namespace whose clock is frozen at `now`.
    pub fn at(now: ::time::OffsetDateTime) -> Self {
        Self {
            errors: Arc::new(Mutex::new(Vec::new())),
            time: TimeUtil::new(now),
        }
    }

    pub fn time(&self) -> &TimeUtil {
        &self.time
    }

    /// Errors recorded so far.
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.errors.lock().clone()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.lock().is_empty()
    }

    fn record(&self, record: ErrorRecord) -> UtilError {
        let message = record.message.clone();
        self.errors.lock().push(record);
        UtilError::Raised(message)
    }

    /// Records an error and returns the failure that aborts the render.
    pub fn error<M: Into<String>>(
        &self,
        message: M,
        error_type: Option<String>,
        data: Option<JsonValue>,
        error_info: Option<JsonValue>,
    ) -> UtilError {
        self.record(ErrorRecord {
            kind: RecordKind::Raised,
            message: message.into(),
            error_type,
            data: data.unwrap_or(JsonValue::Null),
            error_info: error_info.unwrap_or(JsonValue::Null),
        })
    }

    /// Records an error without aborting the render.
    pub fn append_error<M: Into<String>>(
        &self,
        message: M,
        error_type: Option<String>,
        data: Option<JsonValue>,
        error_info: Option<JsonValue>,
    ) -> String {
        let _ = self.error(message, error_type, data, error_info);
        String::new()
    }

    /// Records a validation error and aborts when `condition` is false.
    pub fn validate<M: Into<String>>(
        &self,
        condition: bool,
        message: M,
        error_type: Option<String>,
        data: Option<JsonValue>,
    ) -> Result<String, UtilError> {
        if condition {
            return Ok(String::new());
        }
        Err(self.record(ErrorRecord {
            kind: RecordKind::Validation,
            message: message.into(),
            error_type,
            data: data.unwrap_or(JsonValue::Null),
            error_info: JsonValue::Null,
        }))
    }

    pub fn unauthorized(&self) -> UtilError {
        self.record(ErrorRecord::unauthorized())
    }

    pub fn is_null(&self, value: &JsonValue) -> bool {
        value.is_null()
    }

    pub fn is_null_or_empty(&self, value: &JsonValue) -> bool {
        !is_truthy(value) || to_js_string(value).is_empty()
    }

    pub fn is_null_or_blank(&self, value: &JsonValue) -> bool {
        !is_truthy(value) || to_js_string(value).trim().is_empty()
    }

    pub fn default_if_null(&self, value: &JsonValue, default: &JsonValue) -> JsonValue {
        if value.is_null() {
            default.clone()
        } else {
            value.clone()
        }
    }

    pub fn default_if_null_or_empty(&self, value: &JsonValue, default: &JsonValue) -> JsonValue {
        if self.is_null_or_empty(value) {
            default.clone()
        } else {
            value.clone()
        }
    }

    pub fn default_if_null_or_blank(&self, value: &JsonValue, default: &JsonValue) -> JsonValue {
        if self.is_null_or_blank(value) {
            default.clone()
        } else {
            value.clone()
        }
    }

    pub fn is_string(&self, value: &JsonValue) -> bool {
        value.is_string()
    }

    pub fn is_number(&self, value: &JsonValue) -> bool {
        value.is_number()
    }

    pub fn is_boolean(&self, value: &JsonValue) -> bool {
        value.is_boolean()
    }

    pub fn is_list(&self, value: &JsonValue) -> bool {
        value.is_array()
    }

    pub fn is_map(&self, value: &JsonValue) -> bool {
        value.is_object()
    }

    pub fn type_of(&self, value: &JsonValue) -> String {
        ValueType::of(value).to_string()
    }

    /// Whether `pattern` matches anywhere in `value`.
    pub fn matches(&self, pattern: &str, value: &str) -> Result<bool, UtilError> {
        let re = regex::Regex::new(pattern)
            .map_err(|e| UtilError::Invalid(format!("invalid pattern \"{}\": {}", pattern, e)))?;
        Ok(re.is_match(value))
    }

    pub fn escape_javascript(&self, value: &str) -> String {
        let mut escaped = String::with_capacity(value.len());
        for c in value.chars() {
            match c {
                '"' | '\'' | '\\' => {
                    escaped.push('\\');
                    escaped.push(c);
                }
                '\n' => escaped.push_str("\\n"),
                '\r' => escaped.push_str("\\r"),
                '\u{2028}' => escaped.push_str("\\u2028"),
                '\u{2029}' => escaped.push_str("\\u2029"),
                _ => escaped.push(c),
            }
        }
        escaped
    }

    pub fn url_encode(&self, value: &str) -> String {
        utf8_percent_encode(value, URI_UNESCAPED).to_string()
    }

    pub fn url_decode(&self, value: &str) -> Result<String, UtilError> {
        percent_decode_str(value)
            .decode_utf8()
            .map(|s| s.into_owned())
            .map_err(|e| UtilError::Invalid(format!("URI malformed: {}", e)))
    }

    pub fn base64_encode(&self, value: &str) -> String {
        String::from_utf8_lossy(&base64::encode(value)).into_owned()
    }

    pub fn base64_decode(&self, value: &str) -> Result<String, UtilError> {
        let decoded = base64::decode(value)
            .map_err(|e| UtilError::Invalid(format!("invalid base64 input: {}", e)))?;
        Ok(String::from_utf8_lossy(&decoded).into_owned())
    }

    pub fn parse_json(&self, value: &str) -> Result<JsonValue, UtilError> {
        serde_json::from_str(value).map_err(|e| UtilError::Invalid(e.to_string()))
    }

    pub fn to_json(&self, value: &JsonValue) -> String {
        // Serializing a JSON value cannot fail.
        serde_json::to_string(value).unwrap_or_default()
    }

    pub fn auto_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}
