use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eyre::{eyre, Result, WrapErr};
use offsync::{
    find_config, Backends, ExecutionContext, FieldInfo, Map, Project, ReqwestHttpAdapter,
    ResolverInvocation, TypeEntry,
};
use serde_json::Value as JsonValue;

#[derive(Parser, Debug)]
#[clap(name = "offsync", about, version)]
struct Args {
    /// Increase output logging verbosity.
    #[clap(short, long)]
    verbose: bool,

    /// The deployment descriptor. Defaults to serverless.yml (or .yaml,
    /// .json) in the current directory.
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Which API to use when the descriptor configures several.
    #[clap(short, long)]
    api: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build every resolver and list them.
    Check,
    /// Print the schema, including the AppSync scalar declarations.
    Schema,
    /// Resolve a single field and print its result.
    Resolve {
        /// The parent type, e.g. Query.
        #[clap(short = 't', long = "type")]
        type_name: String,

        /// The field name.
        #[clap(short, long)]
        field: String,

        /// The field arguments, as a JSON object.
        #[clap(long, default_value = "{}")]
        args: String,

        /// The parent object, as JSON.
        #[clap(long, default_value = "null")]
        source: String,

        /// The caller's identity claims, as a JSON object.
        #[clap(long, default_value = r#"{"sub": "offsync"}"#)]
        claims: String,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    simple_logger::init_with_level(if args.verbose {
        log::Level::Debug
    } else {
        log::Level::Info
    })
    .unwrap();

    match run(args).await {
        Ok(_) => log::debug!("Success!"),
        Err(e) => {
            log::error!("Failed: {:?}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = match args.config {
        Some(path) => path,
        None => find_config(".")?,
    };
    let project = Project::load(&config, args.api.as_deref())?;
    match args.command {
        Command::Check => check(&project),
        Command::Schema => {
            println!("{}", project.schema());
            Ok(())
        }
        Command::Resolve {
            type_name,
            field,
            args,
            source,
            claims,
        } => {
            let invocation = ResolverInvocation::new(
                FieldInfo::root(&type_name, &field),
                Arc::new(ExecutionContext::new().with_claims(parse_object("claims", &claims)?)),
            )
            .with_arguments(parse_object("args", &args)?)
            .with_source(parse_json("source", &source)?);
            resolve(&project, invocation).await
        }
    }
}

fn backends() -> Backends {
    Backends::default().with_http(ReqwestHttpAdapter::default())
}

fn check(project: &Project) -> Result<()> {
    let resolvers = project.build(backends())?;
    for (type_name, entry) in resolvers.types() {
        if let TypeEntry::Fields(fields) = entry {
            for (field, resolver) in fields {
                println!("{}.{}: {}", type_name, field, resolver.describe());
            }
        }
    }
    let topics = resolvers.topics();
    if !topics.is_empty() {
        println!("Published mutations: {}", topics.join(", "));
    }
    Ok(())
}

async fn resolve(project: &Project, invocation: ResolverInvocation) -> Result<()> {
    let resolvers = project.build(backends())?;
    let resolver = resolvers
        .get(&invocation.info.parent_type, &invocation.info.field_name)
        .ok_or_else(|| eyre!("no resolver for {}", invocation.info.field_path()))?;
    match resolver.resolve(invocation).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            let errors = serde_json::json!({ "errors": e.graphql_errors() });
            println!("{}", serde_json::to_string_pretty(&errors)?);
            Err(e.into())
        }
    }
}

fn parse_json(what: &str, text: &str) -> Result<JsonValue> {
    serde_json::from_str(text).wrap_err_with(|| format!("--{} is not valid JSON", what))
}

fn parse_object(what: &str, text: &str) -> Result<Map> {
    match parse_json(what, text)? {
        JsonValue::Object(map) => Ok(map),
        _ => Err(eyre!("--{} must be a JSON object", what)),
    }
}
