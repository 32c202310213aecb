//! Field resolvers.
//!
//! Every resolver shape renders templates with a [`TemplateRenderer`] and
//! performs I/O through the [`Backends`] of a shared [`Runtime`].

mod pipeline;
mod step;
mod subscription;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::stream::BoxStream;
use log::{error, info};
use serde_json::Value as JsonValue;

pub use pipeline::PipelineResolver;
pub use step::{Step, StepOutput, UnitResolver};
pub use subscription::SubscriptionResolver;

use crate::batch::LoaderRegistry;
use crate::source::Backends;
use crate::template::{HandlebarsRenderer, TemplateRenderer};
use crate::{Error, FieldError, ResolverInvocation};

/// The parent type whose fields publish their results to subscribers.
pub const MUTATION_TYPE: &str = "Mutation";

/// State shared by all resolvers built from one configuration.
pub struct Runtime {
    pub renderer: Arc<dyn TemplateRenderer>,
    pub backends: Backends,
    pub loaders: LoaderRegistry,
    pub substitutions: BTreeMap<String, String>,
    /// Render pipeline after templates.
    pub evaluate_after_template: bool,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("backends", &self.backends)
            .field("loaders", &self.loaders)
            .field("substitutions", &self.substitutions)
            .field("evaluate_after_template", &self.evaluate_after_template)
            .finish()
    }
}

impl Runtime {
    /// A runtime rendering templates with [`HandlebarsRenderer`].
    pub fn new(backends: Backends) -> Self {
        Self {
            renderer: Arc::new(HandlebarsRenderer),
            backends,
            loaders: LoaderRegistry::new(),
            substitutions: BTreeMap::new(),
            evaluate_after_template: false,
        }
    }

    pub fn with_renderer<R: TemplateRenderer + 'static>(mut self, renderer: R) -> Self {
        self.renderer = Arc::new(renderer);
        self
    }

    pub fn with_substitutions(mut self, substitutions: BTreeMap<String, String>) -> Self {
        self.substitutions = substitutions;
        self
    }

    pub fn with_evaluate_after_template(mut self, evaluate: bool) -> Self {
        self.evaluate_after_template = evaluate;
        self
    }

    fn publish_if_mutation(&self, invocation: &ResolverInvocation, response: &JsonValue) {
        if invocation.info.parent_type == MUTATION_TYPE {
            self.backends
                .pubsub
                .publish(&invocation.info.field_name, response.clone());
        }
    }
}

/// The resolver of one field.
#[derive(Debug)]
pub enum Resolver {
    Unit(UnitResolver),
    Pipeline(PipelineResolver),
    Subscription(SubscriptionResolver),
    /// A subscription field nothing publishes to.
    Noop,
}

impl Resolver {
    pub async fn resolve(&self, invocation: ResolverInvocation) -> Result<JsonValue, FieldError> {
        let result = match self {
            Self::Unit(r) => r.resolve(&invocation).await,
            Self::Pipeline(r) => r.resolve(&invocation).await,
            Self::Subscription(r) => r.resolve(&invocation).await,
            Self::Noop => return Ok(JsonValue::Null),
        };
        result.map_err(|e| fail(&invocation, e))
    }

    /// The event stream of a subscription field.
    pub fn subscribe(&self) -> Option<BoxStream<'static, JsonValue>> {
        match self {
            Self::Subscription(r) => Some(r.subscribe()),
            _ => None,
        }
    }

    /// A one-line description, e.g. `unit (posts)`.
    pub fn describe(&self) -> String {
        match self {
            Self::Unit(r) => format!("unit ({})", r.step().data_source().name),
            Self::Pipeline(r) => format!(
                "pipeline [{}]",
                r.steps()
                    .iter()
                    .map(Step::name)
                    .collect::<Vec<_>>()
                    .join(" -> ")
            ),
            Self::Subscription(r) => format!(
                "subscription ({}) on [{}]",
                r.step().data_source().name,
                r.topics().join(", ")
            ),
            Self::Noop => "no-op".to_string(),
        }
    }
}

fn log_start(invocation: &ResolverInvocation) {
    let path = invocation
        .info
        .path
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    info!(
        "Resolve: {} [{}]",
        invocation.info.field_path(),
        path.join(",")
    );
}

fn require_identity(invocation: &ResolverInvocation) -> Result<(), Error> {
    if invocation.context.has_identity() {
        Ok(())
    } else {
        Err(Error::Unauthorized)
    }
}

fn fail(invocation: &ResolverInvocation, err: Error) -> FieldError {
    error!("{} failed: {}", invocation.info.field_path(), err);
    let failure = FieldError::new(invocation.info.path.clone(), err);
    if let Error::Raised(_) = &failure.source {
        let errors = failure.graphql_errors();
        error!("GraphQL errors: {:?}", errors);
        invocation.context.attach_errors(errors);
    }
    failure
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::source::test::source;
    use crate::template::Template;
    use crate::value::Map;
    use crate::{ExecutionContext, FieldInfo};
    use serde_json::json;

    pub fn object(value: JsonValue) -> Map {
        match value {
            JsonValue::Object(m) => m,
            other => panic!("not an object: {}", other),
        }
    }

    pub fn invocation(parent: &str, field: &str, args: JsonValue) -> ResolverInvocation {
        let context = ExecutionContext::new().with_claims(object(json!({"sub": "user-1"})));
        ResolverInvocation::new(FieldInfo::root(parent, field), Arc::new(context))
            .with_arguments(object(args))
    }

    pub fn anonymous(parent: &str, field: &str) -> ResolverInvocation {
        ResolverInvocation::new(FieldInfo::root(parent, field), Arc::new(ExecutionContext::new()))
    }

    pub fn step(name: &str, request: &str, response: &str) -> Step {
        Step::new(
            name,
            source("local", "NONE"),
            Template::inline(format!("{}.request", name), request),
            Template::inline(format!("{}.response", name), response),
        )
    }

    #[tokio::test]
    async fn noop_resolves_to_null() {
        let resolver = Resolver::Noop;
        assert_eq!(
            resolver.resolve(invocation("Subscription", "onX", json!({}))).await.unwrap(),
            JsonValue::Null
        );
        assert!(resolver.subscribe().is_none());
        assert_eq!(resolver.describe(), "no-op");
    }

    #[tokio::test]
    async fn raised_errors_are_attached_to_the_execution_context() {
        let rt = Arc::new(Runtime::new(Backends::default()));
        let resolver = Resolver::Unit(UnitResolver::new(
            rt,
            step(
                "createPost",
                r#"{{util_appendError "first" "A"}}{{util_error "bad input" "BadRequest"}}"#,
                "{}",
            ),
        ));
        let inv = invocation("Mutation", "createPost", json!({}));
        let context = inv.context.clone();
        let err = resolver.resolve(inv).await.unwrap_err();
        let first = err.to_graphql_error();
        assert_eq!(first.message, "first");
        assert_eq!(first.path, vec![crate::PathSegment::from("createPost")]);
        let attached = context.errors();
        assert_eq!(attached.len(), 2);
        assert_eq!(attached[1].message, "bad input");
        assert_eq!(attached[1].error_type.as_deref(), Some("BadRequest"));
    }
}
