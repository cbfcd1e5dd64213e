//! Per-kind step handlers and the shared dispatch wrapper.
//!
//! `execute_step` is the single entry point the executor (and composite
//! handlers, recursively) use to run one step: it computes the step path,
//! honors resume skips and `when` guards, emits the step lifecycle events,
//! dispatches to the kind handler, and records the `StepResult`.

mod agent;
mod branch;
mod checkpoint_step;
mod loop_step;
mod python;
mod subworkflow;
mod validate;

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use maverick_types::event::WorkflowEventKind;
use maverick_types::result::StepResult;
use maverick_types::workflow::{StepKind, StepRecord};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;
use crate::expression;
use crate::registry::ComponentRegistry;

use super::checkpoint::BoxCheckpointStore;
use super::context::WorkflowContext;
use super::events::EventEmitter;

// ---------------------------------------------------------------------------
// Shared handler plumbing
// ---------------------------------------------------------------------------

/// Everything a handler needs besides the context. Cheap to clone; all the
/// heavy members are shared behind `Arc`.
#[derive(Clone)]
pub(crate) struct RunDeps {
    pub registry: Arc<ComponentRegistry>,
    pub config: Arc<RunConfig>,
    pub store: Option<Arc<BoxCheckpointStore>>,
    pub emitter: Arc<EventEmitter>,
    pub cancel: CancellationToken,
    pub workflow_name: String,
}

/// Control-flow outcome of one step execution.
#[derive(Debug)]
pub(crate) enum StepFlow {
    /// The step completed or was skipped; its result is recorded.
    Continue,
    /// The step failed; its result is recorded. The run halts unless an
    /// enclosing composite recovers.
    Halt { path: String, error: String },
    /// Cancellation was observed; nothing further is recorded.
    Cancelled,
}

/// Failure from a kind handler. `output` carries the kind-specific payload
/// of the failed attempt when one exists (validate keeps its last
/// `ValidationResult`).
pub(crate) enum HandlerError {
    Failed { error: String, output: Value },
    Cancelled,
}

impl HandlerError {
    fn failed(error: impl Into<String>) -> Self {
        HandlerError::Failed {
            error: error.into(),
            output: Value::Null,
        }
    }
}

impl From<expression::ExpressionError> for HandlerError {
    fn from(error: expression::ExpressionError) -> Self {
        HandlerError::failed(error.to_string())
    }
}

impl From<crate::registry::RegistryError> for HandlerError {
    fn from(error: crate::registry::RegistryError) -> Self {
        HandlerError::failed(error.to_string())
    }
}

// ---------------------------------------------------------------------------
// execute_step
// ---------------------------------------------------------------------------

/// Execute one step at `prefix` + its name.
///
/// Boxed because composite steps (branch, loop, validate `on_failure`,
/// subworkflow) recurse through it.
pub(crate) fn execute_step<'a>(
    step: StepRecord,
    prefix: String,
    ctx: &'a mut WorkflowContext,
    deps: RunDeps,
    depth: u32,
) -> BoxFuture<'a, StepFlow> {
    Box::pin(async move {
        let path = if prefix.is_empty() {
            step.name.clone()
        } else {
            format!("{prefix}{}", step.name)
        };
        let step_type = step.step_type();

        // A path recorded by a checkpoint restore is not re-executed.
        if ctx.has_result(&path) {
            tracing::debug!(path = path.as_str(), "step already has a result; skipping");
            return StepFlow::Continue;
        }

        if deps.cancel.is_cancelled() {
            return StepFlow::Cancelled;
        }

        // `when` guard: falsy skips, evaluation failure fails the step.
        if let Some(when) = &step.when {
            match expression::resolve_template(when, &ctx.scope()) {
                Ok(value) if !expression::is_truthy(&value) => {
                    let reason = format!("when guard was falsy: {when}");
                    deps.emitter.emit(
                        Some(path.clone()),
                        WorkflowEventKind::StepSkipped {
                            step_name: step.name.clone(),
                            reason: reason.clone(),
                        },
                    );
                    ctx.record(StepResult::skipped(path, step_type, reason));
                    return StepFlow::Continue;
                }
                Ok(_) => {}
                Err(e) => {
                    let error = e.to_string();
                    ctx.record(StepResult::failed(path.clone(), step_type, error.clone(), 0));
                    deps.emitter.emit(
                        Some(path.clone()),
                        WorkflowEventKind::StepFailed {
                            step_name: step.name.clone(),
                            step_type,
                            error: error.clone(),
                        },
                    );
                    return StepFlow::Halt { path, error };
                }
            }
        }

        deps.emitter.emit(
            Some(path.clone()),
            WorkflowEventKind::StepStarted {
                step_name: step.name.clone(),
                step_type,
            },
        );
        let start = Instant::now();

        // Checkpoint writes run to completion: aborting one mid-write could
        // leave a staged temp file behind.
        let outcome = if matches!(step.kind, StepKind::Checkpoint { .. }) {
            dispatch(&step, &path, ctx, &deps, depth).await
        } else {
            tokio::select! {
                biased;
                _ = deps.cancel.cancelled() => return StepFlow::Cancelled,
                outcome = dispatch(&step, &path, ctx, &deps, depth) => outcome,
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                ctx.record(StepResult::succeeded(
                    path.clone(),
                    step_type,
                    output,
                    duration_ms,
                ));
                deps.emitter.emit(
                    Some(path.clone()),
                    WorkflowEventKind::StepCompleted {
                        step_name: step.name.clone(),
                        step_type,
                        duration_ms,
                    },
                );
                StepFlow::Continue
            }
            Err(HandlerError::Cancelled) => StepFlow::Cancelled,
            Err(HandlerError::Failed { error, output }) => {
                ctx.record(StepResult {
                    name: path.clone(),
                    step_type,
                    success: false,
                    output,
                    duration_ms,
                    error: Some(error.clone()),
                });
                deps.emitter.emit(
                    Some(path.clone()),
                    WorkflowEventKind::StepFailed {
                        step_name: step.name.clone(),
                        step_type,
                        error: error.clone(),
                    },
                );
                StepFlow::Halt { path, error }
            }
        }
    })
}

async fn dispatch(
    step: &StepRecord,
    path: &str,
    ctx: &mut WorkflowContext,
    deps: &RunDeps,
    depth: u32,
) -> Result<Value, HandlerError> {
    match &step.kind {
        StepKind::Python { action, kwargs } => python::run(action, kwargs, ctx, deps).await,
        StepKind::Agent {
            agent,
            inputs,
            context_builder,
        } => agent::run_agent(agent, inputs, context_builder.as_deref(), ctx, deps).await,
        StepKind::Generate {
            generator,
            inputs,
            context_builder,
        } => agent::run_generate(generator, inputs, context_builder.as_deref(), ctx, deps).await,
        StepKind::Validate {
            stages,
            retry,
            on_failure,
        } => {
            validate::run(
                stages.as_ref(),
                *retry,
                on_failure.as_deref(),
                path,
                ctx,
                deps,
                depth,
            )
            .await
        }
        StepKind::Branch { options } => branch::run(options, path, ctx, deps, depth).await,
        StepKind::Loop {
            over,
            until,
            max_iterations,
            parallel,
            max_concurrent,
            continue_on_error,
            steps,
        } => {
            loop_step::run(
                loop_step::LoopSpec {
                    over: over.as_deref(),
                    until: until.as_deref(),
                    max_iterations: *max_iterations,
                    parallel: *parallel,
                    max_concurrent: *max_concurrent,
                    continue_on_error: *continue_on_error,
                    body: steps,
                },
                path,
                ctx,
                deps,
                depth,
            )
            .await
        }
        StepKind::Subworkflow { workflow, inputs } => {
            subworkflow::run(workflow, inputs, path, ctx, deps, depth).await
        }
        StepKind::Checkpoint { checkpoint_id } => {
            checkpoint_step::run(checkpoint_id, path, ctx, deps).await
        }
    }
}

/// Run a list of steps under a path prefix, stopping at the first failure.
pub(crate) async fn run_step_list(
    steps: &[StepRecord],
    prefix: &str,
    ctx: &mut WorkflowContext,
    deps: &RunDeps,
    depth: u32,
) -> StepListFlow {
    for step in steps {
        match execute_step(step.clone(), prefix.to_string(), ctx, deps.clone(), depth).await {
            StepFlow::Continue => {}
            StepFlow::Halt { error, .. } => return StepListFlow::Failed(error),
            StepFlow::Cancelled => return StepListFlow::Cancelled,
        }
    }
    StepListFlow::Completed
}

#[derive(Debug)]
pub(crate) enum StepListFlow {
    Completed,
    Failed(String),
    Cancelled,
}
