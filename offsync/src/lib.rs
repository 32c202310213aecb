//! Offsync resolves GraphQL fields offline the way AWS AppSync does, by
//! evaluating request and response mapping templates around calls to data
//! sources.
//!
//! This crate provides the engine: loading an API's configuration, compiling
//! it into [`Resolver`]s and running them. For the command line interface,
//! see the `offsync-cli` crate.

mod batch;
mod config;
mod context;
mod error;
mod fs;
mod project;
mod pubsub;
mod resolver;
mod schema;
mod source;
mod template;
pub mod util;
mod value;

pub use batch::{BatchLoader, LoaderRegistry};
pub use config::{
    ApiConfig, DataSourceConfig, DataSourceSettings, FunctionConfiguration, MappingKind,
    MappingTemplateConfig, SourceType,
};
pub use context::{ExecutionContext, FieldInfo, ResolverInvocation, Stash, TemplateContext};
pub use error::{Error, ErrorKind, ErrorRecord, FieldError, GraphQLError, PathSegment, RecordKind};
pub use fs::{find_config, CONFIG_FILE_NAMES};
pub use project::{build_resolvers, Project, ResolverMap, TypeEntry, SUBSCRIPTION_TYPE};
pub use pubsub::{BroadcastPubSub, PubSub};
pub use resolver::{
    PipelineResolver, Resolver, Runtime, Step, StepOutput, SubscriptionResolver, UnitResolver,
    MUTATION_TYPE,
};
pub use schema::{wrap_schema, ScalarType, SubscriptionRegistry, SUBSCRIBE_DIRECTIVE};
pub use source::{
    Backends, FunctionAdapter, FunctionInvokeConfig, HttpAdapter, KeyValueAdapter,
    RenderedRequest, ReqwestHttpAdapter, SearchAdapter, BATCH_INVOKE,
};
pub use template::{
    helper_names, HandlebarsRenderer, RenderFailure, Template, TemplateRenderer, TemplateSource,
};
pub use util::{Util, UtilError};
pub use value::{Map, SupportedFormat, ValueType};
