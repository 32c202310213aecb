use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::ValueType;

/// The primary error type that can be produced by offsync.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{}", first_message(.0))]
    Raised(Vec<ErrorRecord>),
    #[error("failed to evaluate template \"{0}\": {1}")]
    TemplateEvaluation(String, String),
    #[error("failed to parse the following template output from \"{0}\" as JSON:\n{1}\n{2}")]
    RenderedJson(String, String, String),
    #[error("rendered request must be a JSON object, but got a value of type {0}")]
    MalformedRequest(ValueType),
    #[error("pipeline function {0} not defined")]
    UndefinedPipelineFunction(String),
    #[error("data source {0} not defined")]
    UndefinedDataSource(String),
    #[error("{0} must have aws_subscribe with mutations arg")]
    MissingSubscriptionMutations(String),
    #[error("cannot handle source type: {0}")]
    UnsupportedSourceType(String),
    #[error("no adapter configured for {0} data sources")]
    AdapterNotConfigured(&'static str),
    #[error("{0}")]
    Downstream(eyre::Report),
    #[error("batch dispatch for {0} expected a list of {1} results, but got {2}")]
    BatchMismatch(String, usize, String),
    #[error(transparent)]
    Batch(Arc<Error>),
    #[error("template file not found: {0}")]
    TemplateNotFound(PathBuf),
    #[error("I/O error {0}: {1}")]
    Io(String, std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("cannot determine file type of file: {0}")]
    CannotDetermineFileType(PathBuf),
    #[error("configuration file not found: {0}")]
    ConfigNotFound(PathBuf),
    #[error("no AppSync configuration found under custom.appSync")]
    MissingApiConfig,
    #[error("multiple APIs provided but no preferred API defined")]
    ApiNotSelected,
    #[error("API {0} not found")]
    ApiNotFound(String),
    #[error("failed to parse schema file pattern \"{0}\": {1}")]
    SchemaFilePattern(String, glob::PatternError),
    #[error("schema file: {0} must exist")]
    SchemaFileMissing(PathBuf),
    #[error("failed to parse GraphQL schema: {0}")]
    SchemaParse(String),
}

/// Coarse classification of an [`Error`], following how a failure is
/// surfaced to the caller of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthorized,
    TemplateRaised,
    Validation,
    TemplateEvaluation,
    UndefinedPipelineFunction,
    UnsupportedSourceType,
    DownstreamDispatch,
    Configuration,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Raised(records) => match records.first().map(|r| r.kind) {
                Some(RecordKind::Unauthorized) => ErrorKind::Unauthorized,
                Some(RecordKind::Validation) => ErrorKind::Validation,
                _ => ErrorKind::TemplateRaised,
            },
            Self::TemplateEvaluation(..) | Self::RenderedJson(..) | Self::MalformedRequest(_) => {
                ErrorKind::TemplateEvaluation
            }
            Self::UndefinedPipelineFunction(_) => ErrorKind::UndefinedPipelineFunction,
            Self::UnsupportedSourceType(_) => ErrorKind::UnsupportedSourceType,
            Self::AdapterNotConfigured(_) | Self::Downstream(_) | Self::BatchMismatch(..) => {
                ErrorKind::DownstreamDispatch
            }
            Self::Batch(inner) => inner.kind(),
            _ => ErrorKind::Configuration,
        }
    }
}

fn first_message(records: &[ErrorRecord]) -> &str {
    records
        .first()
        .map(|r| r.message.as_str())
        .unwrap_or("template raised an error")
}

/// What kind of template call produced an [`ErrorRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// `util.unauthorized()`
    Unauthorized,
    /// `util.error(...)` or `util.appendError(...)`
    Raised,
    /// A failed `util.validate(...)`
    Validation,
}

/// An error raised from within a mapping template.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    #[serde(skip)]
    pub kind: RecordKind,
    pub message: String,
    pub error_type: Option<String>,
    pub data: JsonValue,
    pub error_info: JsonValue,
}

impl ErrorRecord {
    pub fn new<M: Into<String>>(kind: RecordKind, message: M) -> Self {
        Self {
            kind,
            message: message.into(),
            error_type: None,
            data: JsonValue::Null,
            error_info: JsonValue::Null,
        }
    }

    pub fn unauthorized() -> Self {
        let mut record = Self::new(RecordKind::Unauthorized, "Unauthorized");
        record.error_type = Some("Unauthorized".to_string());
        record
    }
}

/// A single segment of a GraphQL response path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => write!(f, "{}", k),
            Self::Index(i) => write!(f, "{}", i),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        Self::Key(s.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

/// The error shape reported to GraphQL clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLError {
    pub message: String,
    pub path: Vec<PathSegment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "JsonValue::is_null")]
    pub data: JsonValue,
    #[serde(skip_serializing_if = "JsonValue::is_null")]
    pub error_info: JsonValue,
}

impl GraphQLError {
    pub fn from_record(record: &ErrorRecord, path: &[PathSegment]) -> Self {
        Self {
            message: record.message.clone(),
            path: path.to_vec(),
            error_type: record.error_type.clone(),
            data: record.data.clone(),
            error_info: record.error_info.clone(),
        }
    }
}

/// A failure while resolving a particular field, tagged with the field's
/// response path.
#[derive(Debug, Error)]
#[error("{} failed: {source}", PathDisplay(.path))]
pub struct FieldError {
    pub path: Vec<PathSegment>,
    #[source]
    pub source: Error,
}

impl FieldError {
    pub fn new(path: Vec<PathSegment>, source: Error) -> Self {
        Self { path, source }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    /// Every GraphQL error this failure translates to. Template-raised
    /// failures produce one error per record; anything else produces exactly
    /// one.
    pub fn graphql_errors(&self) -> Vec<GraphQLError> {
        let mut source = &self.source;
        while let Error::Batch(inner) = source {
            source = inner.as_ref();
        }
        match source {
            Error::Raised(records) if !records.is_empty() => records
                .iter()
                .map(|r| GraphQLError::from_record(r, &self.path))
                .collect(),
            Error::Unauthorized => {
                vec![GraphQLError::from_record(&ErrorRecord::unauthorized(), &self.path)]
            }
            other => vec![GraphQLError {
                message: other.to_string(),
                path: self.path.clone(),
                error_type: None,
                data: JsonValue::Null,
                error_info: JsonValue::Null,
            }],
        }
    }

    /// The error that aborts the field's resolution.
    pub fn to_graphql_error(&self) -> GraphQLError {
        // graphql_errors always yields at least one error.
        self.graphql_errors().remove(0)
    }
}

struct PathDisplay<'a>(&'a [PathSegment]);

impl fmt::Display for PathDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self.0.iter().map(ToString::to_string).collect::<Vec<_>>();
        write!(f, "[{}]", parts.join(","))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn raised_records_become_graphql_errors_with_path() {
        let mut record = ErrorRecord::new(RecordKind::Raised, "bad input");
        record.error_type = Some("BadRequest".to_string());
        let second = ErrorRecord::new(RecordKind::Raised, "also bad");
        let err = FieldError::new(
            vec!["createPost".into(), 0.into(), "id".into()],
            Error::Raised(vec![record, second]),
        );
        let errors = err.graphql_errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message, "bad input");
        assert_eq!(errors[0].error_type.as_deref(), Some("BadRequest"));
        assert_eq!(errors[1].path, errors[0].path);
        assert_eq!(
            serde_json::to_value(&errors[0]).unwrap(),
            json!({
                "message": "bad input",
                "path": ["createPost", 0, "id"],
                "errorType": "BadRequest",
            })
        );
        assert_eq!(err.kind(), ErrorKind::TemplateRaised);
    }

    #[test]
    fn batch_errors_keep_their_kind() {
        let inner = Arc::new(Error::UnsupportedSourceType("RELATIONAL_DATABASE".to_string()));
        let err = Error::Batch(inner);
        assert_eq!(err.kind(), ErrorKind::UnsupportedSourceType);
        assert_eq!(err.to_string(), "cannot handle source type: RELATIONAL_DATABASE");
    }
}
