//! Configuration-related functionality for offsync.
//!
//! The configuration follows the shape used by serverless-style deployment
//! descriptors, where the API lives under `custom.appSync`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::value::{load_from_file, Map};
use crate::Error;

/// The kind of backend a data source talks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceType {
    /// `AMAZON_DYNAMODB`
    KeyValueStore,
    /// `AWS_LAMBDA`
    FunctionInvoke,
    /// `AMAZON_ELASTICSEARCH`
    SearchIndex,
    /// `HTTP`
    HttpEndpoint,
    /// `NONE`: the request payload is the result.
    None,
    /// A tag we don't know how to dispatch to. Kept so that the failure
    /// surfaces when the source is used rather than at load time.
    Unsupported(String),
}

impl SourceType {
    pub fn tag(&self) -> &str {
        match self {
            Self::KeyValueStore => "AMAZON_DYNAMODB",
            Self::FunctionInvoke => "AWS_LAMBDA",
            Self::SearchIndex => "AMAZON_ELASTICSEARCH",
            Self::HttpEndpoint => "HTTP",
            Self::None => "NONE",
            Self::Unsupported(tag) => tag,
        }
    }
}

impl From<String> for SourceType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "AMAZON_DYNAMODB" | "KeyValueStore" => Self::KeyValueStore,
            "AWS_LAMBDA" | "FunctionInvoke" => Self::FunctionInvoke,
            "AMAZON_ELASTICSEARCH" | "AMAZON_OPENSEARCH_SERVICE" | "SearchIndex" => {
                Self::SearchIndex
            }
            "HTTP" | "HttpEndpoint" => Self::HttpEndpoint,
            "NONE" | "None" => Self::None,
            _ => Self::Unsupported(s),
        }
    }
}

impl From<SourceType> for String {
    fn from(t: SourceType) -> Self {
        t.tag().to_string()
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Type-specific settings of a data source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(flatten)]
    pub extra: Map,
}

/// A configured backend target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default)]
    pub config: DataSourceSettings,
}

/// Whether a mapping template resolves through one data source or a pipeline
/// of functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum MappingKind {
    Unit,
    Pipeline,
}

impl Default for MappingKind {
    fn default() -> Self {
        Self::Unit
    }
}

impl FromStr for MappingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "UNIT" => Ok(Self::Unit),
            "PIPELINE" => Ok(Self::Pipeline),
            _ => Err(format!("unknown mapping template kind: {}", s)),
        }
    }
}

impl TryFrom<String> for MappingKind {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

/// The templates associated with one GraphQL field.
///
/// For pipelines, `request` and `response` name the before and after
/// templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingTemplateConfig {
    #[serde(rename = "type")]
    pub type_name: String,
    pub field: String,
    #[serde(default)]
    pub kind: MappingKind,
    #[serde(default)]
    pub data_source: Option<String>,
    pub request: String,
    pub response: String,
    #[serde(default)]
    pub functions: Vec<String>,
}

/// A reusable pipeline function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionConfiguration {
    pub name: String,
    pub data_source: String,
    pub request: String,
    pub response: String,
}

/// The configuration of a single GraphQL API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_schema", deserialize_with = "one_or_many")]
    pub schema: Vec<String>,
    #[serde(default = "default_mapping_templates_location")]
    pub mapping_templates_location: String,
    #[serde(default, deserialize_with = "flattened")]
    pub mapping_templates: Vec<MappingTemplateConfig>,
    #[serde(default, deserialize_with = "flattened")]
    pub data_sources: Vec<DataSourceConfig>,
    #[serde(default)]
    pub function_configurations: Vec<FunctionConfiguration>,
    /// Values for `${name}` placeholders in templates.
    #[serde(default)]
    pub substitutions: BTreeMap<String, String>,
    /// Render a pipeline's after template over the last step's result.
    #[serde(default)]
    pub evaluate_after_template: bool,
}

fn default_schema() -> Vec<String> {
    vec!["schema.graphql".to_string()]
}

fn default_mapping_templates_location() -> String {
    "mapping-templates".to_string()
}

impl ApiConfig {
    /// Attempts to extract the API configuration from a deployment
    /// descriptor. When several APIs are configured, `api_name` selects one.
    ///
    /// Documents without a `custom.appSync` section are treated as a bare
    /// API configuration.
    pub fn from_document(doc: JsonValue, api_name: Option<&str>) -> Result<Self, Error> {
        let api = match doc.pointer("/custom/appSync") {
            Some(JsonValue::Array(apis)) => {
                let name = api_name.ok_or(Error::ApiNotSelected)?;
                apis.iter()
                    .find(|api| api.get("name").and_then(JsonValue::as_str) == Some(name))
                    .cloned()
                    .ok_or_else(|| Error::ApiNotFound(name.to_string()))?
            }
            Some(api) => api.clone(),
            None if doc.get("mappingTemplates").is_some() => doc,
            None => return Err(Error::MissingApiConfig),
        };
        Ok(serde_json::from_value(api)?)
    }

    /// Loads the API configuration from the given YAML or JSON file.
    pub fn load_from_file<P: AsRef<Path>>(path: P, api_name: Option<&str>) -> Result<Self, Error> {
        let path = path.as_ref();
        debug!("Loading API configuration from {}", path.display());
        Self::from_document(load_from_file(path)?, api_name)
    }

    /// Maps the table name of every key-value data source to itself, which is
    /// the alias table handed to the key-value adapter.
    pub fn table_aliases(&self) -> HashMap<String, String> {
        self.data_sources
            .iter()
            .filter(|source| source.source_type == SourceType::KeyValueStore)
            .filter_map(|source| source.config.table_name.clone())
            .map(|table| (table.clone(), table))
            .collect()
    }

    /// Resolves the configured schema entries, relative to `base_dir`, into
    /// file paths. Entries may be glob patterns.
    pub fn schema_files<P: AsRef<Path>>(&self, base_dir: P) -> Result<Vec<PathBuf>, Error> {
        let base_dir = base_dir.as_ref();
        let mut files = Vec::new();
        for entry in &self.schema {
            let path = base_dir.join(entry);
            if entry.contains(|c| matches!(c, '*' | '?' | '[')) {
                let pattern = path.to_string_lossy().to_string();
                let paths = glob::glob(&pattern)
                    .map_err(|e| Error::SchemaFilePattern(pattern.clone(), e))?;
                for p in paths {
                    let p = p.map_err(|e| {
                        Error::Io(format!("while matching {}", pattern), e.into())
                    })?;
                    files.push(p);
                }
            } else if path.is_file() {
                files.push(path);
            } else {
                return Err(Error::SchemaFileMissing(path));
            }
        }
        Ok(files)
    }

    /// Reads and concatenates all schema files.
    pub fn read_schema<P: AsRef<Path>>(&self, base_dir: P) -> Result<String, Error> {
        let mut sdl = Vec::new();
        for path in self.schema_files(base_dir)? {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| Error::Io(format!("while reading {}", path.display()), e))?;
            sdl.push(content);
        }
        Ok(sdl.join("\n"))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

// Deployment descriptors often build these lists out of included files, which
// leaves them nested.
#[derive(Deserialize)]
#[serde(untagged)]
enum Nested<T> {
    One(T),
    Many(Vec<Nested<T>>),
}

impl<T> Nested<T> {
    fn flatten_into(self, out: &mut Vec<T>) {
        match self {
            Self::One(item) => out.push(item),
            Self::Many(items) => {
                for item in items {
                    item.flatten_into(out);
                }
            }
        }
    }
}

fn flattened<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let mut out = Vec::new();
    for item in Vec::<Nested<T>>::deserialize(deserializer)? {
        item.flatten_into(&mut out);
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::{load_as, SupportedFormat};

    const DESCRIPTOR: &str = r#"
service: blog
custom:
  appSync:
    - name: blog
      schema: schema.graphql
      substitutions:
        tableName: Posts
      mappingTemplates:
        - dataSource: posts
          type: Query
          field: getPost
          request: Query.getPost.request.vtl
          response: Query.getPost.response.vtl
        - - type: Mutation
            field: createPost
            kind: pipeline
            functions:
              - validate
              - save
            request: before.vtl
            response: after.vtl
      functionConfigurations:
        - name: save
          dataSource: posts
          request: save.request.vtl
          response: save.response.vtl
      dataSources:
        - type: AMAZON_DYNAMODB
          name: posts
          config:
            tableName: Posts
            serviceRoleArn: arn:aws:iam::123:role/x
        - - type: RELATIONAL_DATABASE
            name: rds
    - name: other
"#;

    fn descriptor() -> JsonValue {
        load_as(SupportedFormat::Yaml, DESCRIPTOR).unwrap()
    }

    #[test]
    fn selects_named_api_and_flattens_lists() {
        let api = ApiConfig::from_document(descriptor(), Some("blog")).unwrap();
        assert_eq!(api.schema, vec!["schema.graphql"]);
        assert_eq!(api.mapping_templates_location, "mapping-templates");
        assert_eq!(api.mapping_templates.len(), 2);
        assert_eq!(api.mapping_templates[1].kind, MappingKind::Pipeline);
        assert_eq!(api.mapping_templates[1].functions, vec!["validate", "save"]);
        assert_eq!(api.data_sources.len(), 2);
        assert_eq!(api.data_sources[0].source_type, SourceType::KeyValueStore);
        assert_eq!(
            api.data_sources[0].config.extra.get("serviceRoleArn"),
            Some(&JsonValue::String("arn:aws:iam::123:role/x".to_string()))
        );
        assert_eq!(
            api.data_sources[1].source_type,
            SourceType::Unsupported("RELATIONAL_DATABASE".to_string())
        );
        assert_eq!(api.substitutions.get("tableName").unwrap(), "Posts");
        assert!(!api.evaluate_after_template);
    }

    #[test]
    fn multiple_apis_require_a_selection() {
        assert!(matches!(
            ApiConfig::from_document(descriptor(), None),
            Err(Error::ApiNotSelected)
        ));
        assert!(matches!(
            ApiConfig::from_document(descriptor(), Some("missing")),
            Err(Error::ApiNotFound(_))
        ));
    }

    #[test]
    fn table_aliases_map_table_names_to_themselves() {
        let api = ApiConfig::from_document(descriptor(), Some("blog")).unwrap();
        let aliases = api.table_aliases();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases.get("Posts").unwrap(), "Posts");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let doc = serde_json::json!({
            "mappingTemplates": [
                {"type": "Query", "field": "x", "kind": "SEQUENCE", "request": "a", "response": "b"}
            ]
        });
        assert!(ApiConfig::from_document(doc, None).is_err());
    }
}
