//! Routing rendered requests to backend adapters.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::WrapErr;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::pubsub::{BroadcastPubSub, PubSub};
use crate::value::Map;
use crate::{DataSourceConfig, Error, SourceType, ValueType};

/// The operation tag that routes a request through the batch dispatcher.
pub const BATCH_INVOKE: &str = "BatchInvoke";

/// The parsed output of a request template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default)]
    pub payload: JsonValue,
    /// Everything else the backend may need (`key`, `version`, `method`...).
    #[serde(flatten)]
    pub fields: Map,
}

impl RenderedRequest {
    pub fn is_batch(&self) -> bool {
        self.operation.as_deref() == Some(BATCH_INVOKE)
    }

    pub fn to_json(&self) -> JsonValue {
        // Every field is a JSON value, so this cannot fail.
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

impl TryFrom<JsonValue> for RenderedRequest {
    type Error = Error;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        match value {
            JsonValue::Object(_) => Ok(serde_json::from_value(value)?),
            other => Err(Error::MalformedRequest(ValueType::of(&other))),
        }
    }
}

/// Talks to a key-value store.
#[async_trait]
pub trait KeyValueAdapter: Send + Sync {
    /// `table` is the data source's table; `tables` maps the aliases a
    /// multi-table request may use to real table names.
    async fn invoke(
        &self,
        table: &str,
        tables: &HashMap<String, String>,
        request: &RenderedRequest,
    ) -> eyre::Result<JsonValue>;
}

/// Invokes a serverless function.
#[async_trait]
pub trait FunctionAdapter: Send + Sync {
    async fn invoke(
        &self,
        config: &FunctionInvokeConfig,
        function_name: &str,
        request: &RenderedRequest,
    ) -> eyre::Result<JsonValue>;
}

/// Queries a search index.
#[async_trait]
pub trait SearchAdapter: Send + Sync {
    async fn invoke(&self, endpoint: &str, request: &RenderedRequest) -> eyre::Result<JsonValue>;
}

/// Calls an HTTP endpoint.
#[async_trait]
pub trait HttpAdapter: Send + Sync {
    async fn invoke(&self, endpoint: &str, request: &RenderedRequest) -> eyre::Result<JsonValue>;
}

/// What a function adapter needs to run functions locally.
#[derive(Debug, Clone, Default)]
pub struct FunctionInvokeConfig {
    /// The directory of the deployment descriptor.
    pub directory: PathBuf,
    /// The full deployment descriptor.
    pub service_config: JsonValue,
    /// Where functions should reach the key-value store.
    pub key_value_endpoint: Option<String>,
    pub tables: HashMap<String, String>,
}

/// The adapters and settings shared by every resolver.
#[derive(Clone)]
pub struct Backends {
    pub key_value: Option<Arc<dyn KeyValueAdapter>>,
    pub function: Option<Arc<dyn FunctionAdapter>>,
    pub search: Option<Arc<dyn SearchAdapter>>,
    pub http: Option<Arc<dyn HttpAdapter>>,
    /// Table aliases handed to key-value and function adapters.
    pub tables: HashMap<String, String>,
    /// Takes precedence over the endpoint of every search data source.
    pub search_endpoint: Option<String>,
    pub function_config: FunctionInvokeConfig,
    pub pubsub: Arc<dyn PubSub>,
}

impl Default for Backends {
    fn default() -> Self {
        Self {
            key_value: None,
            function: None,
            search: None,
            http: None,
            tables: HashMap::new(),
            search_endpoint: None,
            function_config: FunctionInvokeConfig::default(),
            pubsub: Arc::new(BroadcastPubSub::default()),
        }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("key_value", &self.key_value.is_some())
            .field("function", &self.function.is_some())
            .field("search", &self.search.is_some())
            .field("http", &self.http.is_some())
            .field("tables", &self.tables)
            .field("search_endpoint", &self.search_endpoint)
            .finish()
    }
}

impl Backends {
    pub fn with_key_value<A: KeyValueAdapter + 'static>(mut self, adapter: A) -> Self {
        self.key_value = Some(Arc::new(adapter));
        self
    }

    pub fn with_function<A: FunctionAdapter + 'static>(mut self, adapter: A) -> Self {
        self.function = Some(Arc::new(adapter));
        self
    }

    pub fn with_search<A: SearchAdapter + 'static>(mut self, adapter: A) -> Self {
        self.search = Some(Arc::new(adapter));
        self
    }

    pub fn with_http<A: HttpAdapter + 'static>(mut self, adapter: A) -> Self {
        self.http = Some(Arc::new(adapter));
        self
    }

    pub fn with_pubsub<P: PubSub + 'static>(mut self, pubsub: P) -> Self {
        self.pubsub = Arc::new(pubsub);
        self
    }

    /// Sets the table aliases for both key-value and function adapters.
    pub fn with_tables(mut self, tables: HashMap<String, String>) -> Self {
        self.function_config.tables = tables.clone();
        self.tables = tables;
        self
    }
}

/// Sends a rendered request to the backend of `source`.
pub async fn dispatch(
    source: &DataSourceConfig,
    backends: &Backends,
    request: &RenderedRequest,
) -> Result<JsonValue, Error> {
    info!("Dispatch to source {} ({})", source.name, source.source_type);
    let settings = &source.config;
    let result = match &source.source_type {
        SourceType::KeyValueStore => {
            let adapter = adapter(&backends.key_value, &source.source_type)?;
            let table = settings.table_name.as_deref().unwrap_or_default();
            adapter.invoke(table, &backends.tables, request).await
        }
        SourceType::FunctionInvoke => {
            let adapter = adapter(&backends.function, &source.source_type)?;
            let function_name = settings.function_name.as_deref().unwrap_or_default();
            adapter
                .invoke(&backends.function_config, function_name, request)
                .await
        }
        SourceType::SearchIndex => {
            let adapter = adapter(&backends.search, &source.source_type)?;
            let endpoint = backends
                .search_endpoint
                .as_deref()
                .or(settings.endpoint.as_deref())
                .unwrap_or_default();
            adapter.invoke(endpoint, request).await
        }
        SourceType::HttpEndpoint => {
            let adapter = adapter(&backends.http, &source.source_type)?;
            let endpoint = settings.endpoint.as_deref().unwrap_or_default();
            adapter.invoke(endpoint, request).await
        }
        SourceType::None => Ok(request.payload.clone()),
        SourceType::Unsupported(tag) => return Err(Error::UnsupportedSourceType(tag.clone())),
    };
    let result = result.map_err(Error::Downstream)?;
    debug!("Result from {}: {}", source.name, result);
    Ok(result)
}

fn adapter<'a, A: ?Sized>(
    adapter: &'a Option<Arc<A>>,
    source_type: &SourceType,
) -> Result<&'a A, Error> {
    adapter.as_deref().ok_or(Error::AdapterNotConfigured(match source_type {
        SourceType::KeyValueStore => "AMAZON_DYNAMODB",
        SourceType::FunctionInvoke => "AWS_LAMBDA",
        SourceType::SearchIndex => "AMAZON_ELASTICSEARCH",
        SourceType::HttpEndpoint => "HTTP",
        SourceType::None | SourceType::Unsupported(_) => "NONE",
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpParams {
    #[serde(default)]
    query: Map,
    #[serde(default)]
    headers: Map,
    #[serde(default)]
    body: JsonValue,
}

/// Performs HTTP data source requests with [`reqwest`].
///
/// Requests follow the HTTP resolver shape (`method`, `resourcePath`,
/// `params.query`, `params.headers`, `params.body`); the result is
/// `{statusCode, headers, body}` with the body as text.
#[derive(Debug, Clone, Default)]
pub struct ReqwestHttpAdapter {
    client: reqwest::Client,
}

impl ReqwestHttpAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpAdapter for ReqwestHttpAdapter {
    async fn invoke(&self, endpoint: &str, request: &RenderedRequest) -> eyre::Result<JsonValue> {
        let method = request
            .fields
            .get("method")
            .and_then(JsonValue::as_str)
            .unwrap_or("GET");
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .wrap_err_with(|| format!("invalid HTTP method {}", method))?;
        let resource_path = request
            .fields
            .get("resourcePath")
            .and_then(JsonValue::as_str)
            .unwrap_or("");
        let params = match request.fields.get("params") {
            Some(params) => serde_json::from_value::<HttpParams>(params.clone())
                .wrap_err("invalid HTTP request params")?,
            None => HttpParams::default(),
        };
        let url = format!("{}{}", endpoint.trim_end_matches('/'), resource_path);
        debug!("HTTP {} {}", method, url);

        let query = params
            .query
            .iter()
            .map(|(k, v)| (k.clone(), crate::value::to_js_string(v)))
            .collect::<Vec<(String, String)>>();
        let mut builder = self.client.request(method, &url).query(&query);
        for (name, value) in &params.headers {
            builder = builder.header(name.as_str(), crate::value::to_js_string(value));
        }
        builder = match params.body {
            JsonValue::Null => builder,
            JsonValue::String(body) => builder.body(body),
            body => builder.json(&body),
        };

        let response = builder
            .send()
            .await
            .wrap_err_with(|| format!("HTTP request to {} failed", url))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    JsonValue::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
                )
            })
            .collect::<Map>();
        let body = response
            .text()
            .await
            .wrap_err_with(|| format!("failed to read response body from {}", url))?;
        Ok(json!({
            "statusCode": status,
            "headers": headers,
            "body": body,
        }))
    }
}
