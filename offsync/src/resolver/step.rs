use std::sync::Arc;

use log::debug;
use serde_json::Value as JsonValue;

use super::{log_start, require_identity, Runtime};
use crate::source::{dispatch, RenderedRequest};
use crate::template::{render_mapping, Template};
use crate::value::Map;
use crate::{DataSourceConfig, Error, ResolverInvocation, TemplateContext};

/// The result of one step: its response and the stash as the step left it.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub response: JsonValue,
    pub stash: Map,
}

/// A request template, a data source and a response template.
#[derive(Debug, Clone)]
pub struct Step {
    name: String,
    data_source: DataSourceConfig,
    request: Template,
    response: Template,
}

impl Step {
    pub fn new<N: Into<String>>(
        name: N,
        data_source: DataSourceConfig,
        request: Template,
        response: Template,
    ) -> Self {
        Self {
            name: name.into(),
            data_source,
            request,
            response,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_source(&self) -> &DataSourceConfig {
        &self.data_source
    }

    /// Runs the step. `prev` is the result of the preceding pipeline step,
    /// `stash` the stash it left behind.
    pub async fn run(
        &self,
        rt: &Runtime,
        invocation: &ResolverInvocation,
        prev: Option<JsonValue>,
        stash: Option<Map>,
    ) -> Result<StepOutput, Error> {
        let mut ctx = TemplateContext::build(invocation, prev, stash);
        let request = self.render_request(rt, &ctx)?;
        let result = if request.is_batch() {
            rt.loaders
                .get_or_create(&invocation.info.field_path(), &self.data_source)
                .load(&rt.backends, request)
                .await?
        } else {
            debug!("Rendered request: {}", request.to_json());
            dispatch(&self.data_source, &rt.backends, &request).await?
        };
        ctx.set_result(result);
        self.render_response(rt, &ctx)
    }

    /// Like [`Step::run`] but never batched, and a null dispatch result is
    /// replaced by an empty object.
    pub(crate) async fn run_unbatched(
        &self,
        rt: &Runtime,
        invocation: &ResolverInvocation,
    ) -> Result<StepOutput, Error> {
        let mut ctx = TemplateContext::build(invocation, None, None);
        let request = self.render_request(rt, &ctx)?;
        debug!("Rendered request: {}", request.to_json());
        let result = match dispatch(&self.data_source, &rt.backends, &request).await? {
            JsonValue::Null => JsonValue::Object(Map::new()),
            result => result,
        };
        ctx.set_result(result);
        self.render_response(rt, &ctx)
    }

    fn render_request(&self, rt: &Runtime, ctx: &TemplateContext) -> Result<RenderedRequest, Error> {
        let request = render_mapping(rt.renderer.as_ref(), &self.request, ctx, &rt.substitutions)?;
        RenderedRequest::try_from(request)
    }

    fn render_response(&self, rt: &Runtime, ctx: &TemplateContext) -> Result<StepOutput, Error> {
        let response =
            render_mapping(rt.renderer.as_ref(), &self.response, ctx, &rt.substitutions)?;
        debug!("Rendered response: {}", response);
        Ok(StepOutput {
            response,
            stash: ctx.stash().snapshot(),
        })
    }
}

/// Resolves a field through a single step.
#[derive(Debug)]
pub struct UnitResolver {
    rt: Arc<Runtime>,
    step: Step,
}

impl UnitResolver {
    pub fn new(rt: Arc<Runtime>, step: Step) -> Self {
        Self { rt, step }
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    pub(crate) async fn resolve(&self, invocation: &ResolverInvocation) -> Result<JsonValue, Error> {
        log_start(invocation);
        require_identity(invocation)?;
        let output = self.step.run(&self.rt, invocation, None, None).await?;
        self.rt.publish_if_mutation(invocation, &output.response);
        Ok(output.response)
    }
}
