use std::sync::Arc;

use futures::stream::BoxStream;
use serde_json::Value as JsonValue;

use super::{log_start, require_identity, Runtime, Step};
use crate::{Error, ResolverInvocation};

/// Resolves a subscription field.
///
/// Events are the responses published by the mutations in `topics`. Each
/// event is resolved with the event itself as both the parent object and the
/// arguments.
#[derive(Debug)]
pub struct SubscriptionResolver {
    rt: Arc<Runtime>,
    step: Step,
    topics: Vec<String>,
}

impl SubscriptionResolver {
    pub fn new(rt: Arc<Runtime>, step: Step, topics: Vec<String>) -> Self {
        Self { rt, step, topics }
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    /// The mutation field names this subscription listens to.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn subscribe(&self) -> BoxStream<'static, JsonValue> {
        self.rt.backends.pubsub.subscribe(&self.topics)
    }

    pub(crate) async fn resolve(&self, invocation: &ResolverInvocation) -> Result<JsonValue, Error> {
        log_start(invocation);
        require_identity(invocation)?;
        let mut invocation = invocation.clone();
        invocation.arguments = match &invocation.source {
            JsonValue::Object(source) => source.clone(),
            _ => Default::default(),
        };
        let output = self.step.run_unbatched(&self.rt, &invocation).await?;
        Ok(output.response)
    }
}
