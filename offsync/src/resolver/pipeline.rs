use std::sync::Arc;

use log::debug;
use serde_json::Value as JsonValue;

use super::{log_start, require_identity, Runtime, Step};
use crate::template::{render_mapping, Template};
use crate::{Error, ResolverInvocation, TemplateContext};

/// Resolves a field by running its steps one after the other.
///
/// The before template only seeds the stash; its output is discarded. Each
/// step sees the previous step's response as `ctx.prev.result` and the stash
/// as the previous step left it. On `Mutation` every step's response is
/// published as it completes. The field resolves to the last step's
/// response, transformed by the after template when the runtime enables it.
#[derive(Debug)]
pub struct PipelineResolver {
    rt: Arc<Runtime>,
    before: Template,
    after: Template,
    steps: Vec<Step>,
}

impl PipelineResolver {
    pub fn new(rt: Arc<Runtime>, before: Template, after: Template, steps: Vec<Step>) -> Self {
        Self {
            rt,
            before,
            after,
            steps,
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub(crate) async fn resolve(&self, invocation: &ResolverInvocation) -> Result<JsonValue, Error> {
        log_start(invocation);
        require_identity(invocation)?;
        let rt = self.rt.as_ref();

        let ctx = TemplateContext::build(invocation, None, None);
        render_mapping(rt.renderer.as_ref(), &self.before, &ctx, &rt.substitutions)?;
        let mut stash = ctx.stash().snapshot();

        let mut prev = None;
        for step in &self.steps {
            debug!("Running pipeline function {}", step.name());
            let output = step.run(rt, invocation, prev.take(), Some(stash)).await?;
            rt.publish_if_mutation(invocation, &output.response);
            prev = Some(output.response);
            stash = output.stash;
        }
        let mut response = prev.unwrap_or(JsonValue::Null);

        if rt.evaluate_after_template {
            let mut ctx = TemplateContext::build(invocation, Some(response.clone()), Some(stash));
            ctx.set_result(response);
            response = render_mapping(rt.renderer.as_ref(), &self.after, &ctx, &rt.substitutions)?;
        }
        Ok(response)
    }
}
