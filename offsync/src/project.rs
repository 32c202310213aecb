//! Compiling an API configuration into resolvers.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Result, WrapErr};
use log::{debug, info};
use serde_json::Value as JsonValue;

use crate::fs::maybe_canonicalize;
use crate::resolver::{
    PipelineResolver, Resolver, Runtime, Step, SubscriptionResolver, UnitResolver,
};
use crate::schema::{wrap_schema, ScalarType, SubscriptionRegistry};
use crate::source::Backends;
use crate::template::Template;
use crate::value::load_from_file;
use crate::{ApiConfig, DataSourceConfig, Error, MappingKind, MappingTemplateConfig};

/// The parent type whose fields are resolved as subscriptions.
pub const SUBSCRIPTION_TYPE: &str = "Subscription";

/// What the schema builder attaches to a type.
#[derive(Debug)]
pub enum TypeEntry {
    Scalar(ScalarType),
    Fields(BTreeMap<String, Resolver>),
}

/// Type name -> field name -> resolver, plus the custom scalars.
#[derive(Debug)]
pub struct ResolverMap {
    types: BTreeMap<String, TypeEntry>,
    subscriptions: SubscriptionRegistry,
    runtime: Arc<Runtime>,
}

impl ResolverMap {
    pub fn get(&self, type_name: &str, field: &str) -> Option<&Resolver> {
        match self.types.get(type_name)? {
            TypeEntry::Fields(fields) => fields.get(field),
            TypeEntry::Scalar(_) => None,
        }
    }

    pub fn scalar(&self, type_name: &str) -> Option<ScalarType> {
        match self.types.get(type_name)? {
            TypeEntry::Scalar(scalar) => Some(*scalar),
            TypeEntry::Fields(_) => None,
        }
    }

    pub fn types(&self) -> impl Iterator<Item = (&String, &TypeEntry)> {
        self.types.iter()
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Every mutation that some subscription listens to.
    pub fn topics(&self) -> Vec<String> {
        self.subscriptions.topics()
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }
}

/// Builds the [`ResolverMap`] of an API.
///
/// Template files are looked up in `templates_dir` and must exist. Fields of
/// the `Subscription` type resolve through the subscription registry.
pub fn build_resolvers(
    config: &ApiConfig,
    templates_dir: &Path,
    subscriptions: SubscriptionRegistry,
    runtime: Arc<Runtime>,
) -> std::result::Result<ResolverMap, Error> {
    let sources = config
        .data_sources
        .iter()
        .map(|source| (source.name.as_str(), source))
        .collect::<HashMap<&str, &DataSourceConfig>>();
    let source = |name: Option<&str>| -> std::result::Result<DataSourceConfig, Error> {
        let name = name.unwrap_or_default();
        sources
            .get(name)
            .map(|s| (*s).clone())
            .ok_or_else(|| Error::UndefinedDataSource(name.to_string()))
    };

    let mut types = ScalarType::ALL
        .iter()
        .map(|s| (s.name().to_string(), TypeEntry::Scalar(*s)))
        .collect::<BTreeMap<String, TypeEntry>>();

    for entry in &config.mapping_templates {
        let resolver = match entry.kind {
            MappingKind::Pipeline => {
                let steps = entry
                    .functions
                    .iter()
                    .map(|name| -> std::result::Result<Step, Error> {
                        let function = config
                            .function_configurations
                            .iter()
                            .find(|f| &f.name == name)
                            .ok_or_else(|| Error::UndefinedPipelineFunction(name.clone()))?;
                        Ok(Step::new(
                            name.clone(),
                            source(Some(function.data_source.as_str()))?,
                            Template::from_file(templates_dir, &function.request)?,
                            Template::from_file(templates_dir, &function.response)?,
                        ))
                    })
                    .collect::<std::result::Result<Vec<Step>, Error>>()?;
                Resolver::Pipeline(PipelineResolver::new(
                    runtime.clone(),
                    Template::from_file(templates_dir, &entry.request)?,
                    Template::from_file(templates_dir, &entry.response)?,
                    steps,
                ))
            }
            // Unregistered subscription fields never render, so their data
            // source and templates are not checked.
            MappingKind::Unit if entry.type_name == SUBSCRIPTION_TYPE => {
                match subscriptions.mutations(&entry.field) {
                    None => Resolver::Noop,
                    Some(mutations) if mutations.is_empty() => {
                        return Err(Error::MissingSubscriptionMutations(entry.field.clone()))
                    }
                    Some(mutations) => Resolver::Subscription(SubscriptionResolver::new(
                        runtime.clone(),
                        unit_step(entry, source(entry.data_source.as_deref())?, templates_dir)?,
                        mutations.iter().cloned().collect(),
                    )),
                }
            }
            MappingKind::Unit => {
                let step = unit_step(entry, source(entry.data_source.as_deref())?, templates_dir)?;
                Resolver::Unit(UnitResolver::new(runtime.clone(), step))
            }
        };
        debug!(
            "{}.{}: {}",
            entry.type_name,
            entry.field,
            resolver.describe()
        );
        let slot = types
            .entry(entry.type_name.clone())
            .or_insert_with(|| TypeEntry::Fields(BTreeMap::new()));
        // A mapping for a scalar type replaces the scalar.
        if let TypeEntry::Scalar(_) = slot {
            *slot = TypeEntry::Fields(BTreeMap::new());
        }
        if let TypeEntry::Fields(fields) = slot {
            fields.insert(entry.field.clone(), resolver);
        }
    }

    Ok(ResolverMap {
        types,
        subscriptions,
        runtime,
    })
}

fn unit_step(
    entry: &MappingTemplateConfig,
    source: DataSourceConfig,
    templates_dir: &Path,
) -> std::result::Result<Step, Error> {
    Ok(Step::new(
        format!("{}.{}", entry.type_name, entry.field),
        source,
        Template::from_file(templates_dir, &entry.request)?,
        Template::from_file(templates_dir, &entry.response)?,
    ))
}

/// A loaded API: its configuration, the directory it lives in and its
/// schema.
#[derive(Debug, Clone)]
pub struct Project {
    base_dir: PathBuf,
    config: ApiConfig,
    service_config: JsonValue,
    schema: String,
}

impl Project {
    pub fn new<P: AsRef<Path>>(
        base_dir: P,
        config: ApiConfig,
        service_config: JsonValue,
        schema: String,
    ) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            config,
            service_config,
            schema: wrap_schema(&schema),
        }
    }

    /// Loads the deployment descriptor at `path` and the schema it refers
    /// to. `api` selects an API when the descriptor configures several.
    pub fn load<P: AsRef<Path>>(path: P, api: Option<&str>) -> Result<Self> {
        let path = path.as_ref();
        let path = maybe_canonicalize(path)?
            .ok_or_else(|| Error::ConfigNotFound(path.to_path_buf()))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let service_config = load_from_file(&path)
            .wrap_err_with(|| format!("failed to load configuration from {}", path.display()))?;
        let config = ApiConfig::from_document(service_config.clone(), api)
            .wrap_err_with(|| format!("invalid API configuration in {}", path.display()))?;
        let schema = config.read_schema(&base_dir)?;
        info!(
            "Loaded API {} from {}",
            config.name.as_deref().unwrap_or("(unnamed)"),
            path.display()
        );
        Ok(Self::new(base_dir, config, service_config, schema))
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// The schema, prefixed with the AppSync scalar and directive
    /// declarations.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.base_dir.join(&self.config.mapping_templates_location)
    }

    /// Compiles the API into resolvers that use `backends`. Table aliases,
    /// substitutions and function settings come from the configuration.
    pub fn build(&self, mut backends: Backends) -> std::result::Result<ResolverMap, Error> {
        let subscriptions = SubscriptionRegistry::from_sdl(&self.schema)?;
        if backends.tables.is_empty() {
            backends = backends.with_tables(self.config.table_aliases());
        }
        backends.function_config.directory = self.base_dir.clone();
        backends.function_config.service_config = self.service_config.clone();
        let runtime = Runtime::new(backends)
            .with_substitutions(self.config.substitutions.clone())
            .with_evaluate_after_template(self.config.evaluate_after_template);
        build_resolvers(
            &self.config,
            &self.templates_dir(),
            subscriptions,
            Arc::new(runtime),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resolver::test::invocation;
    use crate::ErrorKind;
    use futures::StreamExt;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    const SCHEMA: &str = r#"
        type Query { getPost(id: ID!): Post }
        type Mutation { createPost(title: String!): Post }
        type Subscription {
            onCreatePost: Post @aws_subscribe(mutations: ["createPost"])
            onNothing: Post
        }
        type Post { id: ID! title: String }
    "#;

    /// A temporary project directory with templates.
    fn project_dir() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("mapping-templates");
        fs::create_dir_all(&templates).unwrap();
        let files = [
            ("echo.request.vtl", r#"{"payload": {{util_toJson ctx.args}}}"#),
            ("result.response.vtl", r#"{{util_toJson ctx.result}}"#),
            ("before.vtl", r#"{{stash_put "start" true}}{}"#),
            ("after.vtl", r#"{{util_toJson ctx.result}}"#),
            ("source.request.vtl", r#"{"payload": {{util_toJson ctx.source}}}"#),
        ];
        for (file, content) in files {
            fs::write(templates.join(file), content).unwrap();
        }
        fs::write(dir.path().join("schema.graphql"), SCHEMA).unwrap();
        dir
    }

    fn config(extra: JsonValue) -> ApiConfig {
        let mut doc = json!({
            "name": "blog",
            "dataSources": [[{"name": "local", "type": "NONE"}]],
            "mappingTemplates": [
                {"type": "Query", "field": "getPost", "dataSource": "local",
                 "request": "echo.request.vtl", "response": "result.response.vtl"},
                {"type": "Mutation", "field": "createPost", "kind": "pipeline",
                 "request": "before.vtl", "response": "after.vtl", "functions": ["echo"]},
                {"type": "Subscription", "field": "onCreatePost", "dataSource": "local",
                 "request": "source.request.vtl", "response": "result.response.vtl"},
                {"type": "Subscription", "field": "onNothing", "dataSource": "local",
                 "request": "source.request.vtl", "response": "result.response.vtl"},
            ],
            "functionConfigurations": [
                {"name": "echo", "dataSource": "local",
                 "request": "echo.request.vtl", "response": "result.response.vtl"},
            ],
        });
        if let (JsonValue::Object(doc), JsonValue::Object(extra)) = (&mut doc, extra) {
            doc.extend(extra);
        }
        ApiConfig::from_document(doc, None).unwrap()
    }

    /// The directory must outlive the project.
    fn project(extra: JsonValue) -> (TempDir, Project) {
        let dir = project_dir();
        let project = Project::new(dir.path(), config(extra), json!({}), SCHEMA.to_string());
        (dir, project)
    }

    #[test]
    fn builds_every_resolver_shape() {
        let (_dir, project) = project(json!({}));
        let resolvers = project.build(Backends::default()).unwrap();
        assert!(matches!(resolvers.get("Query", "getPost"), Some(Resolver::Unit(_))));
        assert!(matches!(
            resolvers.get("Mutation", "createPost"),
            Some(Resolver::Pipeline(_))
        ));
        assert!(matches!(
            resolvers.get("Subscription", "onCreatePost"),
            Some(Resolver::Subscription(_))
        ));
        assert!(matches!(resolvers.get("Subscription", "onNothing"), Some(Resolver::Noop)));
        assert_eq!(resolvers.scalar("AWSDateTime"), Some(ScalarType::DateTime));
        assert_eq!(resolvers.types().count(), ScalarType::ALL.len() + 3);
        assert_eq!(resolvers.topics(), vec!["createPost"]);
    }

    #[tokio::test]
    async fn mutation_reaches_subscription_end_to_end() {
        let (_dir, project) = project(json!({}));
        let resolvers = project.build(Backends::default()).unwrap();
        let subscription = resolvers.get("Subscription", "onCreatePost").unwrap();
        let mut events = subscription.subscribe().unwrap();

        let created = resolvers
            .get("Mutation", "createPost")
            .unwrap()
            .resolve(invocation("Mutation", "createPost", json!({"title": "Hi"})))
            .await
            .unwrap();
        assert_eq!(created, json!({"title": "Hi"}));

        let event = events.next().await.unwrap();
        let response = subscription
            .resolve(invocation("Subscription", "onCreatePost", json!({})).with_source(event))
            .await
            .unwrap();
        assert_eq!(response, json!({"title": "Hi"}));
    }

    #[test]
    fn undefined_pipeline_function_fails_the_build() {
        let (_dir, project) = project(
            json!({"mappingTemplates": [
                {"type": "Mutation", "field": "createPost", "kind": "PIPELINE",
                 "request": "before.vtl", "response": "after.vtl", "functions": ["missing"]},
            ]}),
        );
        let err = project.build(Backends::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UndefinedPipelineFunction);
        assert_eq!(err.to_string(), "pipeline function missing not defined");
    }

    #[test]
    fn unknown_data_sources_and_missing_templates_fail_the_build() {
        let (_dir, project) = project(
            json!({"mappingTemplates": [
                {"type": "Query", "field": "getPost", "dataSource": "nope",
                 "request": "echo.request.vtl", "response": "result.response.vtl"},
            ]}),
        );
        assert!(matches!(
            project.build(Backends::default()),
            Err(Error::UndefinedDataSource(name)) if name == "nope"
        ));

        let (_dir, project) = self::project(
            json!({"mappingTemplates": [
                {"type": "Query", "field": "getPost", "dataSource": "local",
                 "request": "absent.vtl", "response": "result.response.vtl"},
            ]}),
        );
        assert!(matches!(
            project.build(Backends::default()),
            Err(Error::TemplateNotFound(_))
        ));
    }

    #[test]
    fn unregistered_subscription_is_noop_without_checking_its_mapping() {
        let (_dir, project) = project(json!({"mappingTemplates": [
            {"type": "Subscription", "field": "onNothing", "dataSource": "nope",
             "request": "absent.vtl", "response": "absent.vtl"},
        ]}));
        let resolvers = project.build(Backends::default()).unwrap();
        assert!(matches!(resolvers.get("Subscription", "onNothing"), Some(Resolver::Noop)));

        let (_dir, project) = self::project(json!({"mappingTemplates": [
            {"type": "Subscription", "field": "onCreatePost", "dataSource": "nope",
             "request": "source.request.vtl", "response": "result.response.vtl"},
        ]}));
        assert!(matches!(
            project.build(Backends::default()),
            Err(Error::UndefinedDataSource(name)) if name == "nope"
        ));
    }

    #[test]
    fn subscription_without_mutations_fails_the_build() {
        let dir = project_dir();
        let schema = "type Subscription { onCreatePost: Post @aws_subscribe(mutations: []) }";
        let project = Project::new(dir.path(), config(json!({})), json!({}), schema.to_string());
        assert!(matches!(
            project.build(Backends::default()),
            Err(Error::MissingSubscriptionMutations(field)) if field == "onCreatePost"
        ));
    }

    #[test]
    fn loads_from_a_descriptor() {
        let dir = project_dir();
        let descriptor = dir.path().join("serverless.yml");
        fs::write(
            &descriptor,
            r#"
custom:
  appSync:
    - name: other
      mappingTemplates: []
    - name: blog
      schema: schema.graphql
      dataSources:
        - name: posts
          type: AMAZON_DYNAMODB
          config:
            tableName: posts-table
      mappingTemplates:
        - type: Query
          field: getPost
          dataSource: posts
          request: echo.request.vtl
          response: result.response.vtl
"#,
        )
        .unwrap();
        let project = Project::load(&descriptor, Some("blog")).unwrap();
        assert_eq!(project.config().name.as_deref(), Some("blog"));
        assert!(project.schema().starts_with("scalar AWSDate"));
        let resolvers = project.build(Backends::default()).unwrap();
        assert_eq!(
            resolvers.runtime().backends.tables.get("posts-table").map(String::as_str),
            Some("posts-table")
        );
        assert!(Project::load(&descriptor, None).is_err());
        assert!(Project::load(dir.path().join("absent.yml"), None).is_err());
    }
}
