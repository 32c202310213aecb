//! GraphQL schema handling: the AppSync scalars and `@aws_subscribe`
//! discovery.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use apollo_parser::{cst, Parser};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde_json::Value as JsonValue;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::{Error, ValueType};

/// The directive that links a subscription field to mutation fields.
pub const SUBSCRIBE_DIRECTIVE: &str = "aws_subscribe";

lazy_static! {
    static ref DATE: Regex =
        Regex::new(r"^\d{4}-\d{2}-\d{2}(Z|[+-]\d{2}:\d{2}(:\d{2})?)?$").unwrap();
    static ref TIME: Regex =
        Regex::new(r"^\d{2}:\d{2}(:\d{2}(\.\d{1,9})?)?(Z|[+-]\d{2}:\d{2}(:\d{2})?)?$").unwrap();
    static ref EMAIL: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref URL: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://\S+$").unwrap();
    static ref PHONE: Regex = Regex::new(r"^\+?[0-9 ()\-.]{3,}$").unwrap();
}

/// The custom scalars every AppSync schema may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarType {
    Date,
    Time,
    DateTime,
    Timestamp,
    Email,
    Json,
    Url,
    Phone,
    IpAddress,
}

impl ScalarType {
    pub const ALL: [ScalarType; 9] = [
        Self::Date,
        Self::Time,
        Self::DateTime,
        Self::Timestamp,
        Self::Email,
        Self::Json,
        Self::Url,
        Self::Phone,
        Self::IpAddress,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Date => "AWSDate",
            Self::Time => "AWSTime",
            Self::DateTime => "AWSDateTime",
            Self::Timestamp => "AWSTimestamp",
            Self::Email => "AWSEmail",
            Self::Json => "AWSJSON",
            Self::Url => "AWSURL",
            Self::Phone => "AWSPhone",
            Self::IpAddress => "AWSIPAddress",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }

    /// Converts a resolved value into its output representation. `AWSJSON`
    /// values are emitted as JSON text; everything else is passed through.
    pub fn serialize(&self, value: JsonValue) -> JsonValue {
        match (self, value) {
            (Self::Json, JsonValue::String(s)) => JsonValue::String(s),
            (Self::Json, JsonValue::Null) => JsonValue::Null,
            (Self::Json, value) => JsonValue::String(value.to_string()),
            (_, value) => value,
        }
    }

    /// Validates an input value, parsing `AWSJSON` text into a value.
    pub fn parse_value(&self, value: JsonValue) -> Result<JsonValue, String> {
        let invalid = |v: &JsonValue| format!("invalid {} value: {}", self.name(), v);
        match self {
            Self::Timestamp => match &value {
                JsonValue::Number(n) if n.is_i64() || n.is_u64() => Ok(value),
                other => Err(invalid(other)),
            },
            Self::Json => match value {
                JsonValue::String(s) => serde_json::from_str(&s)
                    .map_err(|e| format!("invalid AWSJSON value: {}", e)),
                other => Ok(other),
            },
            _ => {
                let s = match &value {
                    JsonValue::String(s) => s.as_str(),
                    other => {
                        return Err(format!(
                            "{} must be a string, but got a value of type {}",
                            self.name(),
                            ValueType::of(other)
                        ))
                    }
                };
                if self.is_valid_text(s) {
                    Ok(value.clone())
                } else {
                    Err(invalid(&value))
                }
            }
        }
    }

    fn is_valid_text(&self, s: &str) -> bool {
        match self {
            Self::Date => DATE.is_match(s),
            Self::Time => TIME.is_match(s),
            Self::DateTime => OffsetDateTime::parse(s, &Rfc3339).is_ok(),
            Self::Email => EMAIL.is_match(s),
            Self::Url => URL.is_match(s),
            Self::Phone => PHONE.is_match(s),
            Self::IpAddress => {
                let addr = s.split('/').next().unwrap_or_default();
                addr.parse::<IpAddr>().is_ok()
            }
            Self::Timestamp | Self::Json => true,
        }
    }
}

/// Prepends the declarations of the AppSync scalars and directives to a
/// user-provided schema.
pub fn wrap_schema(sdl: &str) -> String {
    let mut wrapped = String::new();
    for scalar in ScalarType::ALL {
        wrapped.push_str("scalar ");
        wrapped.push_str(scalar.name());
        wrapped.push('\n');
    }
    wrapped.push_str("directive @aws_subscribe(mutations: [String]) on FIELD_DEFINITION\n");
    wrapped.push_str(sdl);
    wrapped
}

/// Subscription fields and the mutations that feed them, as declared with
/// `@aws_subscribe(mutations: [...])`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionRegistry {
    fields: BTreeMap<String, BTreeSet<String>>,
}

impl SubscriptionRegistry {
    /// Scans the given schema for `@aws_subscribe` annotations. Applying the
    /// directive to a field more than once, e.g. in a type extension, adds
    /// to its mutations.
    pub fn from_sdl(sdl: &str) -> Result<Self, Error> {
        let tree = Parser::new(sdl).parse();
        let errors = tree
            .errors()
            .map(|e| e.message().to_string())
            .collect::<Vec<String>>();
        if !errors.is_empty() {
            return Err(Error::SchemaParse(errors.join("; ")));
        }

        let mut registry = Self::default();
        for definition in tree.document().definitions() {
            let fields = match definition {
                cst::Definition::ObjectTypeDefinition(def) => def.fields_definition(),
                cst::Definition::ObjectTypeExtension(ext) => ext.fields_definition(),
                _ => None,
            };
            for field in fields.iter().flat_map(|f| f.field_definitions()) {
                let name = match field.name() {
                    Some(name) => name.text().to_string(),
                    None => continue,
                };
                for directive in field.directives().iter().flat_map(|d| d.directives()) {
                    let is_subscribe = directive
                        .name()
                        .map(|n| n.text().to_string() == SUBSCRIBE_DIRECTIVE)
                        .unwrap_or(false);
                    if is_subscribe {
                        let mutations = registry.fields.entry(name.clone()).or_default();
                        mutations.extend(mutation_names(&directive));
                    }
                }
            }
        }
        debug!("Found subscriptions: {:?}", registry.fields);
        Ok(registry)
    }

    /// The mutations of a subscription field, if it is annotated at all.
    pub fn mutations(&self, field: &str) -> Option<&BTreeSet<String>> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.fields.iter()
    }

    /// Every mutation some subscription listens to, without duplicates.
    pub fn topics(&self) -> Vec<String> {
        self.fields
            .values()
            .flatten()
            .cloned()
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect()
    }
}

fn mutation_names(directive: &cst::Directive) -> Vec<String> {
    let value = directive
        .arguments()
        .iter()
        .flat_map(|args| args.arguments())
        .find(|arg| {
            arg.name()
                .map(|n| n.text().to_string() == "mutations")
                .unwrap_or(false)
        })
        .and_then(|arg| arg.value());
    match value {
        Some(cst::Value::ListValue(list)) => list
            .values()
            .filter_map(|v| match v {
                cst::Value::StringValue(s) => Some(String::from(s)),
                _ => None,
            })
            .collect(),
        Some(cst::Value::StringValue(s)) => vec![String::from(s)],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    const SDL: &str = r#"
        type Mutation {
            createPost(title: String!): Post
            updatePost(id: ID!): Post
            deletePost(id: ID!): Post
        }
        type Subscription {
            onPostChange: Post @aws_subscribe(mutations: ["createPost", "updatePost"])
            onPostDelete: Post @aws_subscribe(mutations: "deletePost")
            onNothing: Post @aws_subscribe
            plain: Post
        }
        extend type Subscription {
            onEverything: Post @aws_subscribe(mutations: ["createPost"]) @aws_subscribe(mutations: ["deletePost", "createPost"])
        }
        type Post { id: ID! created: AWSDateTime }
    "#;

    #[test]
    fn collects_subscriptions_and_topics() {
        let registry = SubscriptionRegistry::from_sdl(&wrap_schema(SDL)).unwrap();
        let names = |field: &str| {
            registry
                .mutations(field)
                .map(|m| m.iter().cloned().collect::<Vec<_>>())
        };
        assert_eq!(names("onPostChange"), Some(vec!["createPost".to_string(), "updatePost".to_string()]));
        assert_eq!(names("onPostDelete"), Some(vec!["deletePost".to_string()]));
        assert_eq!(names("onNothing"), Some(Vec::new()));
        assert_eq!(names("plain"), None);
        assert_eq!(
            names("onEverything"),
            Some(vec!["createPost".to_string(), "deletePost".to_string()])
        );
        assert_eq!(registry.topics(), vec!["createPost", "deletePost", "updatePost"]);
    }

    #[test]
    fn invalid_schema_is_rejected() {
        let err = SubscriptionRegistry::from_sdl("type Query {").unwrap_err();
        assert!(matches!(err, Error::SchemaParse(_)));
    }

    #[test]
    fn wrapped_schema_declares_scalars_and_directive() {
        let wrapped = wrap_schema("type Query { now: AWSDateTime }");
        assert!(wrapped.starts_with("scalar AWSDate\n"));
        assert!(wrapped.contains("directive @aws_subscribe(mutations: [String]) on FIELD_DEFINITION"));
        assert!(wrapped.ends_with("type Query { now: AWSDateTime }"));
    }

    #[test]
    fn scalar_validation() {
        let ok = |s: ScalarType, v: JsonValue| s.parse_value(v).is_ok();
        assert!(ok(ScalarType::Date, json!("2021-03-04")));
        assert!(!ok(ScalarType::Date, json!("04/03/2021")));
        assert!(ok(ScalarType::Time, json!("05:06:07.089Z")));
        assert!(ok(ScalarType::DateTime, json!("2021-03-04T05:06:07.089Z")));
        assert!(!ok(ScalarType::DateTime, json!("2021-03-04")));
        assert!(ok(ScalarType::Timestamp, json!(1614834367)));
        assert!(!ok(ScalarType::Timestamp, json!("1614834367")));
        assert!(ok(ScalarType::Email, json!("a@example.com")));
        assert!(ok(ScalarType::Url, json!("https://example.com/x")));
        assert!(ok(ScalarType::Phone, json!("+1 (555) 010-0000")));
        assert!(!ok(ScalarType::Time, json!("5 past noon")));
        assert!(!ok(ScalarType::Email, json!("a@b")));
        assert!(!ok(ScalarType::Url, json!("example.com")));
        assert!(!ok(ScalarType::Phone, json!("call me")));
        assert!(ok(ScalarType::IpAddress, json!("10.0.0.0/8")));
        assert!(!ok(ScalarType::IpAddress, json!("not-an-ip")));
        assert_eq!(
            ScalarType::Json.parse_value(json!("{\"a\":1}")).unwrap(),
            json!({"a": 1})
        );
        assert_eq!(ScalarType::Json.serialize(json!({"a": 1})), json!("{\"a\":1}"));
        assert_eq!(ScalarType::from_name("AWSURL"), Some(ScalarType::Url));
    }
}
