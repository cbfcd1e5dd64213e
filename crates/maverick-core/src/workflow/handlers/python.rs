//! Python-action step handler: resolve `kwargs`, look up the action, call it.

use serde_json::Value;

use crate::expression;
use crate::workflow::context::WorkflowContext;

use super::{HandlerError, RunDeps};

pub(super) async fn run(
    action_name: &str,
    kwargs: &serde_json::Map<String, Value>,
    ctx: &mut WorkflowContext,
    deps: &RunDeps,
) -> Result<Value, HandlerError> {
    let resolved = expression::resolve_map(kwargs, &ctx.scope())?;
    let action = deps.registry.actions.get(action_name)?;

    action
        .call(resolved)
        .await
        .map_err(|e| HandlerError::failed(format!("action '{action_name}' failed: {e}")))
}
