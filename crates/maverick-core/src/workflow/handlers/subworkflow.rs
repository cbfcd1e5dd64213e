//! Sub-workflow step handler.
//!
//! Looks up the registered workflow, validates the resolved inputs against
//! its declarations, and runs its steps inline against a fresh context.
//! Nested step events flow through the shared emitter with the caller
//! step's path prefix; the step's output is the nested run's final output.
//! Nesting depth is capped to keep recursive registrations from running
//! away.

use serde_json::Value;

use crate::expression;
use crate::workflow::context::WorkflowContext;
use crate::workflow::parser;

use super::{run_step_list, HandlerError, RunDeps, StepListFlow};

pub(super) async fn run(
    workflow_name: &str,
    inputs: &serde_json::Map<String, Value>,
    path: &str,
    ctx: &mut WorkflowContext,
    deps: &RunDeps,
    depth: u32,
) -> Result<Value, HandlerError> {
    if depth >= deps.config.max_subworkflow_depth {
        return Err(HandlerError::failed(format!(
            "sub-workflow depth {depth} exceeds maximum {}",
            deps.config.max_subworkflow_depth
        )));
    }

    let workflow = deps.registry.workflows.get(workflow_name)?.clone();
    let resolved = expression::resolve_map(inputs, &ctx.scope())?;
    let validated = parser::validate_inputs(&workflow, &resolved)
        .map_err(|e| HandlerError::failed(format!("sub-workflow '{workflow_name}': {e}")))?;

    tracing::debug!(
        workflow = workflow_name,
        parent = deps.workflow_name.as_str(),
        depth,
        "entering sub-workflow"
    );

    let mut sub_ctx = WorkflowContext::new(validated);
    match run_step_list(
        &workflow.steps,
        &format!("{path}/"),
        &mut sub_ctx,
        deps,
        depth + 1,
    )
    .await
    {
        StepListFlow::Completed => Ok(sub_ctx.last_output()),
        StepListFlow::Failed(error) => Err(HandlerError::failed(format!(
            "sub-workflow '{workflow_name}' failed: {error}"
        ))),
        StepListFlow::Cancelled => Err(HandlerError::Cancelled),
    }
}
