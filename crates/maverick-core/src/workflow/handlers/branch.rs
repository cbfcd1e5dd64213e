//! Branch step handler: first-match conditional dispatch.
//!
//! Predicates are evaluated strictly in declaration order; the first truthy
//! one wins and its inner step executes under the branch's path prefix. No
//! match is a successful null result (index -1 in the BranchSelected event),
//! never a failure.

use maverick_types::event::WorkflowEventKind;
use maverick_types::result::BranchResult;
use maverick_types::workflow::BranchOptionRecord;
use serde_json::Value;

use crate::expression;
use crate::workflow::context::WorkflowContext;

use super::{execute_step, HandlerError, RunDeps, StepFlow};

pub(super) async fn run(
    options: &[BranchOptionRecord],
    path: &str,
    ctx: &mut WorkflowContext,
    deps: &RunDeps,
    depth: u32,
) -> Result<Value, HandlerError> {
    for (index, option) in options.iter().enumerate() {
        let predicate = expression::resolve_template(&option.when, &ctx.scope())?;
        if !expression::is_truthy(&predicate) {
            continue;
        }

        deps.emitter.emit(
            Some(path.to_string()),
            WorkflowEventKind::BranchSelected {
                index: index as i64,
                selected_step: Some(option.step.name.clone()),
            },
        );

        let inner_name = option.step.name.clone();
        let inner_path = format!("{path}/{inner_name}");
        return match execute_step(
            (*option.step).clone(),
            format!("{path}/"),
            ctx,
            deps.clone(),
            depth,
        )
        .await
        {
            StepFlow::Continue => {
                let inner_output = ctx
                    .get_result(&inner_path)
                    .map(|result| result.output.clone())
                    .unwrap_or(Value::Null);
                let result = BranchResult {
                    selected_index: index,
                    selected_step_name: inner_name,
                    inner_output,
                };
                Ok(serde_json::to_value(&result).unwrap_or(Value::Null))
            }
            StepFlow::Halt { error, .. } => Err(HandlerError::failed(format!(
                "branch option {index} step '{inner_name}' failed: {error}"
            ))),
            StepFlow::Cancelled => Err(HandlerError::Cancelled),
        };
    }

    tracing::debug!(path, "no branch predicate matched");
    deps.emitter.emit(
        Some(path.to_string()),
        WorkflowEventKind::BranchSelected {
            index: -1,
            selected_step: None,
        },
    );
    Ok(Value::Null)
}
