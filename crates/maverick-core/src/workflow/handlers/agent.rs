//! Agent and generate step handlers.
//!
//! Both resolve the step's `inputs`, assemble the component context (via a
//! named context builder when one is given, either as the explicit
//! `context_builder` field or the reserved `_context_builder` inputs key),
//! and await the component.

use serde_json::Value;

use crate::expression;
use crate::workflow::context::WorkflowContext;

use super::{HandlerError, RunDeps};

pub(super) async fn run_agent(
    agent_name: &str,
    inputs: &serde_json::Map<String, Value>,
    context_builder: Option<&str>,
    ctx: &mut WorkflowContext,
    deps: &RunDeps,
) -> Result<Value, HandlerError> {
    let context = build_component_context(inputs, context_builder, ctx, deps)?;
    let agent = deps.registry.agents.get(agent_name)?;

    agent
        .execute(context)
        .await
        .map_err(|e| HandlerError::failed(format!("agent '{agent_name}' failed: {e}")))
}

pub(super) async fn run_generate(
    generator_name: &str,
    inputs: &serde_json::Map<String, Value>,
    context_builder: Option<&str>,
    ctx: &mut WorkflowContext,
    deps: &RunDeps,
) -> Result<Value, HandlerError> {
    let context = build_component_context(inputs, context_builder, ctx, deps)?;
    let generator = deps.registry.generators.get(generator_name)?;

    generator
        .generate(context)
        .await
        .map(Value::String)
        .map_err(|e| HandlerError::failed(format!("generator '{generator_name}' failed: {e}")))
}

/// Resolve step inputs and produce the component's context payload.
///
/// With a context builder: invoke it with `(inputs, step_outputs)` where
/// step outputs map names to `{"output": ...}`. Without one, the resolved
/// inputs map is the context.
fn build_component_context(
    inputs: &serde_json::Map<String, Value>,
    explicit_builder: Option<&str>,
    ctx: &WorkflowContext,
    deps: &RunDeps,
) -> Result<Value, HandlerError> {
    let mut resolved = expression::resolve_map(inputs, &ctx.scope())?;

    let builder_name = match resolved.remove("_context_builder") {
        Some(Value::String(name)) => Some(name),
        Some(other) => {
            return Err(HandlerError::failed(format!(
                "_context_builder must name a context builder, got {other}"
            )));
        }
        None => None,
    };
    let builder_name = explicit_builder.map(str::to_string).or(builder_name);

    match builder_name {
        Some(name) => {
            let builder = deps.registry.context_builders.get(&name)?;
            Ok(builder.build(
                &Value::Object(ctx.inputs().clone()),
                &ctx.step_outputs_by_name(),
            ))
        }
        None => Ok(Value::Object(resolved)),
    }
}
