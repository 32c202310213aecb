//! Coalescing of `BatchInvoke` requests.
//!
//! Loads issued for the same field path while a batch is still open are
//! dispatched together as one request whose payload is the list of the
//! individual payloads. The backend must answer with a list of the same
//! length; its elements are handed back to the loads in order. Nothing is
//! cached: every load ends up in a dispatched batch.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio::sync::oneshot;

use crate::source::{dispatch, Backends, RenderedRequest};
use crate::{DataSourceConfig, Error, ValueType};

type Waiter = oneshot::Sender<Result<JsonValue, Arc<Error>>>;

#[derive(Default)]
struct PendingBatch {
    requests: Vec<RenderedRequest>,
    waiters: Vec<Waiter>,
}

/// The batching front of one field path.
pub struct BatchLoader {
    field_path: String,
    source: DataSourceConfig,
    pending: Mutex<Option<PendingBatch>>,
}

impl std::fmt::Debug for BatchLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchLoader")
            .field("field_path", &self.field_path)
            .field("source", &self.source.name)
            .finish()
    }
}

impl BatchLoader {
    pub fn new<P: Into<String>>(field_path: P, source: DataSourceConfig) -> Self {
        Self {
            field_path: field_path.into(),
            source,
            pending: Mutex::new(None),
        }
    }

    pub fn field_path(&self) -> &str {
        &self.field_path
    }

    /// Adds `request` to the open batch, or opens one, and waits for this
    /// request's element of the batch result.
    pub async fn load(&self, backends: &Backends, request: RenderedRequest) -> Result<JsonValue, Error> {
        let (tx, rx) = oneshot::channel();
        let leader = {
            let mut pending = self.pending.lock();
            let batch = pending.get_or_insert_with(PendingBatch::default);
            batch.requests.push(request);
            batch.waiters.push(tx);
            batch.requests.len() == 1
        };
        if leader {
            let mut guard = AbandonGuard {
                pending: &self.pending,
                armed: true,
            };
            // Let every other load that is ready to run join the batch.
            tokio::task::yield_now().await;
            let batch = self.pending.lock().take();
            guard.armed = false;
            if let Some(batch) = batch {
                self.flush(backends, batch).await;
            }
        }
        match rx.await {
            Ok(result) => result.map_err(Error::Batch),
            Err(_) => Err(Error::BatchMismatch(
                self.field_path.clone(),
                1,
                "no result".to_string(),
            )),
        }
    }

    async fn flush(&self, backends: &Backends, batch: PendingBatch) {
        let PendingBatch { requests, waiters } = batch;
        let count = requests.len();
        let mut payloads = Vec::with_capacity(count);
        let mut first = None;
        for request in requests {
            payloads.push(request.payload.clone());
            first.get_or_insert(request);
        }
        let mut request = match first {
            Some(request) => request,
            None => return,
        };
        request.payload = JsonValue::Array(payloads);
        info!("Dispatching batch of {} for {}", count, self.field_path);
        debug!("Rendered batch request: {}", request.to_json());

        match dispatch(&self.source, backends, &request).await {
            Ok(JsonValue::Array(items)) if items.len() == count => {
                for (waiter, item) in waiters.into_iter().zip(items) {
                    let _ = waiter.send(Ok(item));
                }
            }
            Ok(other) => {
                let got = match &other {
                    JsonValue::Array(items) => format!("a list of {}", items.len()),
                    value => format!("a value of type {}", ValueType::of(value)),
                };
                let err = Arc::new(Error::BatchMismatch(self.field_path.clone(), count, got));
                fail_all(waiters, err);
            }
            Err(e) => fail_all(waiters, Arc::new(e)),
        }
    }
}

// Discards the open batch when its leader is cancelled before taking it.
struct AbandonGuard<'a> {
    pending: &'a Mutex<Option<PendingBatch>>,
    armed: bool,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pending.lock().take();
        }
    }
}

fn fail_all(waiters: Vec<Waiter>, err: Arc<Error>) {
    for waiter in waiters {
        let _ = waiter.send(Err(err.clone()));
    }
}

/// Lazily created loaders, one per field path and data source. Lives as long
/// as the resolver table that owns it.
#[derive(Debug, Default)]
pub struct LoaderRegistry {
    loaders: Mutex<HashMap<(String, String), Arc<BatchLoader>>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The loader for `field_path`, created on first use.
    pub fn get_or_create(&self, field_path: &str, source: &DataSourceConfig) -> Arc<BatchLoader> {
        let mut loaders = self.loaders.lock();
        loaders
            .entry((field_path.to_string(), source.name.clone()))
            .or_insert_with(|| {
                debug!("Creating batch loader for {} ({})", field_path, source.name);
                Arc::new(BatchLoader::new(field_path, source.clone()))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.loaders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::source::test::{source, MockKeyValue};
    use futures::future::join_all;
    use serde_json::json;

    fn batch_request(id: i64) -> RenderedRequest {
        RenderedRequest::try_from(json!({
            "operation": "BatchInvoke",
            "payload": {"id": id},
            "table": "posts",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_dispatch() {
        let adapter = Arc::new(MockKeyValue::new(|req| {
            Ok(JsonValue::Array(
                req.payload
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|p| json!({"name": format!("post-{}", p["id"])}))
                    .collect(),
            ))
        }));
        let backends = Backends::default().with_key_value(adapter.clone());
        let loader = BatchLoader::new("Post.author", source("posts", "AMAZON_DYNAMODB"));
        let results = join_all((1..=3).map(|id| loader.load(&backends, batch_request(id)))).await;
        let names = results
            .into_iter()
            .map(|r| r.unwrap()["name"].as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["post-1", "post-2", "post-3"]);

        let calls = adapter.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.payload, json!([{"id": 1}, {"id": 2}, {"id": 3}]));
        assert_eq!(calls[0].1.fields["table"], "posts");
    }

    #[tokio::test]
    async fn sequential_loads_are_not_cached() {
        let adapter = Arc::new(MockKeyValue::new(|req| Ok(req.payload.clone())));
        let backends = Backends::default().with_key_value(adapter.clone());
        let loader = BatchLoader::new("Post.author", source("posts", "AMAZON_DYNAMODB"));
        assert_eq!(loader.load(&backends, batch_request(1)).await.unwrap(), json!({"id": 1}));
        assert_eq!(loader.load(&backends, batch_request(1)).await.unwrap(), json!({"id": 1}));
        assert_eq!(adapter.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn misaligned_results_fail_every_load() {
        let backends = Backends::default()
            .with_key_value(MockKeyValue::new(|_| Ok(json!([{"only": "one"}]))));
        let loader = BatchLoader::new("Post.author", source("posts", "AMAZON_DYNAMODB"));
        let results = join_all((1..=2).map(|id| loader.load(&backends, batch_request(id)))).await;
        for result in results {
            let err = result.unwrap_err();
            assert_eq!(
                err.to_string(),
                "batch dispatch for Post.author expected a list of 2 results, but got a list of 1"
            );
        }
    }

    #[tokio::test]
    async fn cancelled_leader_releases_the_batch() {
        let adapter = Arc::new(MockKeyValue::new(|req| Ok(req.payload.clone())));
        let backends = Backends::default().with_key_value(adapter.clone());
        let loader = BatchLoader::new("Post.author", source("posts", "AMAZON_DYNAMODB"));
        let mut leader = Box::pin(loader.load(&backends, batch_request(1)));
        assert!(futures::poll!(leader.as_mut()).is_pending());
        let mut follower = Box::pin(loader.load(&backends, batch_request(2)));
        assert!(futures::poll!(follower.as_mut()).is_pending());
        drop(leader);

        let err = follower.await.unwrap_err();
        assert!(matches!(err, Error::BatchMismatch(_, 1, ref got) if got == "no result"));
        assert!(adapter.calls.lock().is_empty());
        // The next load opens a fresh batch.
        assert_eq!(loader.load(&backends, batch_request(3)).await.unwrap(), json!({"id": 3}));
    }

    #[test]
    fn registry_reuses_loaders_per_field_path() {
        let registry = LoaderRegistry::new();
        let posts = source("posts", "AMAZON_DYNAMODB");
        let a = registry.get_or_create("Post.author", &posts);
        let b = registry.get_or_create("Post.author", &posts);
        let c = registry.get_or_create("Post.comments", &posts);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.field_path(), "Post.comments");
        assert_eq!(registry.len(), 2);
    }
}
