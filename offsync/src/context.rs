//! The data that mapping templates are evaluated against.

use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::value::{coerce, Map};
use crate::{GraphQLError, PathSegment, Util};

/// Request-scoped state supplied by the surrounding GraphQL server.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    claims: Option<Map>,
    headers: Option<Map>,
    errors: Mutex<Vec<GraphQLError>>,
}

impl ExecutionContext {
    /// A context without identity or request information.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the verified token claims of the caller.
    pub fn with_claims(mut self, claims: Map) -> Self {
        self.claims = Some(claims);
        self
    }

    /// Sets the headers of the incoming HTTP request.
    pub fn with_headers(mut self, headers: Map) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn claims(&self) -> Option<&Map> {
        self.claims.as_ref()
    }

    pub fn has_identity(&self) -> bool {
        self.claims.is_some()
    }

    /// Records errors to be surfaced alongside the error that aborted a
    /// field.
    pub fn attach_errors(&self, errors: Vec<GraphQLError>) {
        self.errors.lock().extend(errors);
    }

    /// All errors attached so far.
    pub fn errors(&self) -> Vec<GraphQLError> {
        self.errors.lock().clone()
    }
}

/// Metadata about the field being resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub parent_type: String,
    pub field_name: String,
    pub path: Vec<PathSegment>,
}

impl FieldInfo {
    /// Field metadata for a field directly below a root type.
    pub fn root<T, F>(parent_type: T, field_name: F) -> Self
    where
        T: AsRef<str>,
        F: AsRef<str>,
    {
        let field_name = field_name.as_ref().to_string();
        Self {
            parent_type: parent_type.as_ref().to_string(),
            path: vec![PathSegment::Key(field_name.clone())],
            field_name,
        }
    }

    /// `Parent.field`, the key used to group batched loads.
    pub fn field_path(&self) -> String {
        format!("{}.{}", self.parent_type, self.field_name)
    }
}

/// A single call of a field resolver.
#[derive(Debug, Clone)]
pub struct ResolverInvocation {
    /// The parent object.
    pub source: JsonValue,
    pub arguments: Map,
    pub context: Arc<ExecutionContext>,
    pub info: FieldInfo,
}

impl ResolverInvocation {
    pub fn new(info: FieldInfo, context: Arc<ExecutionContext>) -> Self {
        Self {
            source: JsonValue::Null,
            arguments: Map::new(),
            context,
            info,
        }
    }

    pub fn with_arguments(mut self, arguments: Map) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_source(mut self, source: JsonValue) -> Self {
        self.source = source;
        self
    }
}

/// Scratch space shared by the templates of one resolution.
#[derive(Debug, Clone, Default)]
pub struct Stash(Arc<Mutex<Map>>);

impl Stash {
    pub fn new(values: Map) -> Self {
        Self(Arc::new(Mutex::new(values)))
    }

    pub fn put<K: Into<String>>(&self, key: K, value: JsonValue) -> Option<JsonValue> {
        self.0.lock().insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<JsonValue> {
        self.0.lock().get(key).cloned()
    }

    /// A copy of the current contents.
    pub fn snapshot(&self) -> Map {
        self.0.lock().clone()
    }
}

#[derive(Debug, Clone, Serialize)]
struct Prev {
    result: JsonValue,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextData {
    arguments: JsonValue,
    args: JsonValue,
    identity: JsonValue,
    request: JsonValue,
    source: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    prev: Option<Prev>,
    result: JsonValue,
    stash: JsonValue,
}

/// The evaluation context of one resolution step: the `context`/`ctx` data
/// plus the utility namespace whose error list is shared by the request and
/// response renders of that step.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    data: ContextData,
    util: Util,
    stash: Stash,
}

impl TemplateContext {
    /// Assembles a fresh context for the given invocation.
    pub fn build(
        invocation: &ResolverInvocation,
        prev_result: Option<JsonValue>,
        stash: Option<Map>,
    ) -> Self {
        let args = coerce(JsonValue::Object(invocation.arguments.clone()));
        let claims = invocation.context.claims();
        let claim = |name: &str| {
            claims
                .and_then(|c| c.get(name))
                .cloned()
                .unwrap_or(JsonValue::Null)
        };
        let identity = coerce(json!({
            "sub": claim("sub"),
            "issuer": claim("iss"),
            "username": claim("cognito:username"),
            "sourceIp": ["0.0.0.0"],
            "defaultAuthStrategy": "ALLOW",
            "claims": claims.cloned().map(JsonValue::Object).unwrap_or(JsonValue::Null),
        }));
        let request = match &invocation.context.headers {
            Some(headers) => json!({ "headers": headers }),
            None => json!({}),
        };
        let source = match &invocation.source {
            JsonValue::Null => json!({}),
            other => other.clone(),
        };
        Self {
            data: ContextData {
                arguments: args.clone(),
                args,
                identity,
                request,
                source,
                prev: prev_result.map(|result| Prev {
                    result: coerce(result),
                }),
                result: JsonValue::Null,
                stash: JsonValue::Null,
            },
            util: Util::new(),
            stash: Stash::new(stash.unwrap_or_default()),
        }
    }

    /// Sets the value the response template transforms. It is visible as
    /// both `ctx.result` and `ctx.prev.result`.
    pub fn set_result(&mut self, result: JsonValue) {
        let result = coerce(result);
        self.data.prev = Some(Prev {
            result: result.clone(),
        });
        self.data.result = result;
    }

    pub fn util(&self) -> &Util {
        &self.util
    }

    pub fn stash(&self) -> &Stash {
        &self.stash
    }

    /// The data handed to the renderer, reachable as both `context` and
    /// `ctx`.
    pub fn to_json(&self) -> JsonValue {
        let mut data = self.data.clone();
        data.stash = JsonValue::Object(self.stash.snapshot());
        // ContextData only holds JSON values, so this cannot fail.
        let data = serde_json::to_value(data).unwrap_or(JsonValue::Null);
        trace!("Template context: {}", data);
        json!({ "context": data, "ctx": data })
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> TemplateContext {
    let inv = ResolverInvocation::new(
        FieldInfo::root("Query", "getPost"),
        Arc::new(ExecutionContext::new()),
    );
    TemplateContext::build(&inv, None, None)
}

#[cfg(test)]
mod test {
    use super::*;

    fn claims() -> Map {
        match json!({"sub": "user-1", "iss": "issuer", "cognito:username": "alice"}) {
            JsonValue::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn context_without_identity_or_request() {
        let inv = ResolverInvocation::new(
            FieldInfo::root("Query", "getPost"),
            Arc::new(ExecutionContext::new()),
        );
        let ctx = TemplateContext::build(&inv, None, None).to_json();
        assert_eq!(ctx["ctx"]["identity"]["sub"], JsonValue::Null);
        assert_eq!(ctx["ctx"]["identity"]["sourceIp"], json!(["0.0.0.0"]));
        assert_eq!(ctx["ctx"]["identity"]["defaultAuthStrategy"], "ALLOW");
        assert_eq!(ctx["ctx"]["request"], json!({}));
        assert_eq!(ctx["ctx"]["source"], json!({}));
        assert_eq!(ctx["ctx"]["stash"], json!({}));
        assert!(ctx["ctx"].get("prev").is_none());
        assert_eq!(ctx["context"], ctx["ctx"]);
    }

    #[test]
    fn context_with_identity_prior_result_and_stash() {
        let exec = ExecutionContext::new()
            .with_claims(claims())
            .with_headers(match json!({"x-api-key": "k"}) {
                JsonValue::Object(m) => m,
                _ => unreachable!(),
            });
        let inv = ResolverInvocation::new(FieldInfo::root("Query", "getPost"), Arc::new(exec))
            .with_arguments(match json!({"id": 1.0}) {
                JsonValue::Object(m) => m,
                _ => unreachable!(),
            })
            .with_source(json!({"parent": true}));
        let mut stash = Map::new();
        stash.insert("seen".to_string(), json!(1));
        let mut ctx = TemplateContext::build(&inv, Some(json!({"n": 2.0})), Some(stash));
        ctx.stash().put("more", json!("x"));
        assert_eq!(ctx.to_json()["ctx"]["prev"]["result"], json!({"n": 2}));
        ctx.set_result(json!([1.0]));
        let data = ctx.to_json();
        assert_eq!(data["ctx"]["identity"]["sub"], "user-1");
        assert_eq!(data["ctx"]["identity"]["issuer"], "issuer");
        assert_eq!(data["ctx"]["identity"]["username"], "alice");
        assert_eq!(data["ctx"]["request"]["headers"]["x-api-key"], "k");
        assert!(data["ctx"]["arguments"]["id"].is_i64());
        assert_eq!(data["ctx"]["args"], data["ctx"]["arguments"]);
        assert_eq!(data["ctx"]["source"], json!({"parent": true}));
        assert_eq!(data["ctx"]["prev"]["result"], json!([1]));
        assert_eq!(data["ctx"]["result"], json!([1]));
        assert_eq!(data["ctx"]["stash"], json!({"seen": 1, "more": "x"}));
    }

    #[test]
    fn every_build_gets_a_fresh_error_list() {
        let inv = ResolverInvocation::new(
            FieldInfo::root("Query", "getPost"),
            Arc::new(ExecutionContext::new()),
        );
        let first = TemplateContext::build(&inv, None, None);
        first.util().append_error("oops", None, None, None);
        let second = TemplateContext::build(&inv, None, None);
        assert_eq!(first.util().errors().len(), 1);
        assert!(second.util().errors().is_empty());
    }
}
