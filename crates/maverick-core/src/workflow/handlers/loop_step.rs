//! Loop step handler.
//!
//! Two termination modes: `over` iterates a resolved collection, `until`
//! runs the body first and then checks the predicate. Both are hard-capped
//! by `max_iterations`. Body steps execute under `"{path}/[{index}]/"`
//! path prefixes with `{item, index}` pushed onto the iteration stack.
//!
//! `parallel: true` (over-mode only) runs iterations in a `JoinSet` bounded
//! by a semaphore; each iteration executes against a forked context and the
//! deltas are merged back in iteration order on the control task.
//! LoopIterationCompleted events are buffered and released in index order.

use std::collections::BTreeMap;
use std::sync::Arc;

use maverick_types::event::WorkflowEventKind;
use maverick_types::result::{LoopIterationOutcome, StepResult};
use maverick_types::workflow::StepRecord;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::expression;
use crate::workflow::context::WorkflowContext;

use super::{run_step_list, HandlerError, RunDeps, StepListFlow};

pub(super) struct LoopSpec<'a> {
    pub over: Option<&'a str>,
    pub until: Option<&'a str>,
    pub max_iterations: u32,
    pub parallel: bool,
    pub max_concurrent: Option<usize>,
    pub continue_on_error: bool,
    pub body: &'a [StepRecord],
}

pub(super) async fn run(
    spec: LoopSpec<'_>,
    path: &str,
    ctx: &mut WorkflowContext,
    deps: &RunDeps,
    depth: u32,
) -> Result<Value, HandlerError> {
    let Some(over) = spec.over else {
        return match spec.until {
            Some(until) => run_until(until, &spec, path, ctx, deps, depth).await,
            // The parser rejects loops with neither termination form.
            None => Err(HandlerError::failed(
                "loop step declares neither 'over' nor 'until'",
            )),
        };
    };

    let items = match expression::resolve_template(over, &ctx.scope())? {
        Value::Array(items) => items,
        other => {
            return Err(HandlerError::failed(format!(
                "loop 'over' expression must produce an array, got {other}"
            )));
        }
    };
    let total = items.len().min(spec.max_iterations as usize);
    if items.len() > total {
        tracing::warn!(
            path,
            items = items.len(),
            max_iterations = spec.max_iterations,
            "loop collection truncated by max_iterations"
        );
    }
    let items: Vec<Value> = items.into_iter().take(total).collect();

    if spec.parallel {
        run_parallel(items, &spec, path, ctx, deps, depth).await
    } else {
        run_over(items, &spec, path, ctx, deps, depth).await
    }
}

// ---------------------------------------------------------------------------
// Sequential over
// ---------------------------------------------------------------------------

async fn run_over(
    items: Vec<Value>,
    spec: &LoopSpec<'_>,
    path: &str,
    ctx: &mut WorkflowContext,
    deps: &RunDeps,
    depth: u32,
) -> Result<Value, HandlerError> {
    let mut outcomes: Vec<Value> = Vec::with_capacity(items.len());

    for (index, item) in items.into_iter().enumerate() {
        if deps.cancel.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        let outcome = run_iteration(item, index, spec, path, ctx, deps, depth).await?;
        let failed = !outcome.success;
        outcomes.push(serde_json::to_value(&outcome).unwrap_or(Value::Null));
        if failed && !spec.continue_on_error {
            return Err(iteration_failure(&outcome));
        }
    }

    Ok(Value::Array(outcomes))
}

// ---------------------------------------------------------------------------
// Until
// ---------------------------------------------------------------------------

async fn run_until(
    until: &str,
    spec: &LoopSpec<'_>,
    path: &str,
    ctx: &mut WorkflowContext,
    deps: &RunDeps,
    depth: u32,
) -> Result<Value, HandlerError> {
    let mut outcomes: Vec<Value> = Vec::new();
    let mut index = 0usize;

    // Body first, then check: a condition that is already true still runs
    // one iteration.
    loop {
        if deps.cancel.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        let outcome = run_iteration(Value::Null, index, spec, path, ctx, deps, depth).await?;
        let failed = !outcome.success;
        outcomes.push(serde_json::to_value(&outcome).unwrap_or(Value::Null));
        if failed && !spec.continue_on_error {
            return Err(iteration_failure(&outcome));
        }

        let condition = expression::resolve_template(until, &ctx.scope())?;
        let condition_met = expression::is_truthy(&condition);
        deps.emitter.emit(
            Some(path.to_string()),
            WorkflowEventKind::LoopConditionChecked {
                iteration_index: index,
                condition_met,
            },
        );
        if condition_met {
            break;
        }

        index += 1;
        if index >= spec.max_iterations as usize {
            tracing::warn!(
                path,
                max_iterations = spec.max_iterations,
                "until loop hit max iterations cap"
            );
            break;
        }
    }

    Ok(Value::Array(outcomes))
}

// ---------------------------------------------------------------------------
// One sequential iteration
// ---------------------------------------------------------------------------

async fn run_iteration(
    item: Value,
    index: usize,
    spec: &LoopSpec<'_>,
    path: &str,
    ctx: &mut WorkflowContext,
    deps: &RunDeps,
    depth: u32,
) -> Result<LoopIterationOutcome, HandlerError> {
    deps.emitter.emit(
        Some(path.to_string()),
        WorkflowEventKind::LoopIterationStarted {
            iteration_index: index,
        },
    );

    ctx.push_iteration(item, index);
    let baseline = ctx.result_count();
    let flow = run_step_list(spec.body, &format!("{path}/[{index}]/"), ctx, deps, depth).await;
    ctx.pop_iteration();

    let (success, error) = match flow {
        StepListFlow::Completed => (true, None),
        StepListFlow::Failed(error) => (false, Some(error)),
        StepListFlow::Cancelled => return Err(HandlerError::Cancelled),
    };

    let outcome = build_outcome(index, success, error, &ctx.results_since(baseline));
    deps.emitter.emit(
        Some(path.to_string()),
        WorkflowEventKind::LoopIterationCompleted {
            iteration_index: index,
            success,
        },
    );
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Parallel over
// ---------------------------------------------------------------------------

enum IterationStatus {
    Completed,
    Failed(String),
    Cancelled,
}

async fn run_parallel(
    items: Vec<Value>,
    spec: &LoopSpec<'_>,
    path: &str,
    ctx: &mut WorkflowContext,
    deps: &RunDeps,
    depth: u32,
) -> Result<Value, HandlerError> {
    let total = items.len();
    let bound = spec.max_concurrent.unwrap_or(total).max(1);
    let semaphore = Arc::new(Semaphore::new(bound));
    // Loop-scoped token: a failing iteration (without continue_on_error)
    // cancels its siblings; parent cancellation propagates through it.
    let loop_token = deps.cancel.child_token();

    let mut join_set: JoinSet<(usize, IterationStatus, Vec<StepResult>)> = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let mut iteration_ctx = ctx.fork_for_iteration(item, index);
        let baseline = iteration_ctx.result_count();
        let body: Vec<StepRecord> = spec.body.to_vec();
        let loop_path = path.to_string();
        let prefix = format!("{path}/[{index}]/");
        let mut task_deps = deps.clone();
        task_deps.cancel = loop_token.clone();

        join_set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (index, IterationStatus::Cancelled, Vec::new()),
            };
            if task_deps.cancel.is_cancelled() {
                return (index, IterationStatus::Cancelled, Vec::new());
            }

            task_deps.emitter.emit(
                Some(loop_path),
                WorkflowEventKind::LoopIterationStarted {
                    iteration_index: index,
                },
            );
            let flow =
                run_step_list(&body, &prefix, &mut iteration_ctx, &task_deps, depth).await;
            let delta = iteration_ctx.results_since(baseline);
            let status = match flow {
                StepListFlow::Completed => IterationStatus::Completed,
                StepListFlow::Failed(error) => IterationStatus::Failed(error),
                StepListFlow::Cancelled => IterationStatus::Cancelled,
            };
            (index, status, delta)
        });
    }

    // Buffer completions and release them in iteration-index order:
    // merge each iteration's results into the parent context, then emit its
    // LoopIterationCompleted.
    let mut pending: BTreeMap<usize, (IterationStatus, Vec<StepResult>)> = BTreeMap::new();
    let mut next_merge = 0usize;
    let mut outcomes: Vec<Value> = Vec::with_capacity(total);
    let mut failure: Option<String> = None;
    let mut saw_cancelled = false;

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, status, delta)) => {
                if let IterationStatus::Failed(error) = &status {
                    if !spec.continue_on_error && failure.is_none() {
                        failure = Some(format!("loop iteration {index} failed: {error}"));
                        loop_token.cancel();
                    }
                }
                pending.insert(index, (status, delta));
            }
            Err(join_error) => {
                if failure.is_none() {
                    failure = Some(format!("loop iteration task panicked: {join_error}"));
                    loop_token.cancel();
                }
            }
        }

        while let Some((status, delta)) = pending.remove(&next_merge) {
            match status {
                IterationStatus::Completed => {
                    let outcome = build_outcome(next_merge, true, None, &delta);
                    merge_results(ctx, delta);
                    deps.emitter.emit(
                        Some(path.to_string()),
                        WorkflowEventKind::LoopIterationCompleted {
                            iteration_index: next_merge,
                            success: true,
                        },
                    );
                    outcomes.push(serde_json::to_value(&outcome).unwrap_or(Value::Null));
                }
                IterationStatus::Failed(error) => {
                    let outcome = build_outcome(next_merge, false, Some(error), &delta);
                    merge_results(ctx, delta);
                    deps.emitter.emit(
                        Some(path.to_string()),
                        WorkflowEventKind::LoopIterationCompleted {
                            iteration_index: next_merge,
                            success: false,
                        },
                    );
                    outcomes.push(serde_json::to_value(&outcome).unwrap_or(Value::Null));
                }
                IterationStatus::Cancelled => {
                    saw_cancelled = true;
                }
            }
            next_merge += 1;
        }
    }

    if deps.cancel.is_cancelled() {
        return Err(HandlerError::Cancelled);
    }
    if let Some(error) = failure {
        return Err(HandlerError::failed(error));
    }
    if saw_cancelled {
        // Iterations were cancelled without a recorded failure or parent
        // cancellation; surface it as cancellation.
        return Err(HandlerError::Cancelled);
    }
    Ok(Value::Array(outcomes))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_outcome(
    index: usize,
    success: bool,
    error: Option<String>,
    results: &[StepResult],
) -> LoopIterationOutcome {
    let mut steps = serde_json::Map::new();
    for result in results {
        let name = result.name.rsplit('/').next().unwrap_or(&result.name);
        steps.insert(name.to_string(), result.output.clone());
    }
    LoopIterationOutcome {
        index,
        success,
        steps,
        error,
    }
}

fn merge_results(ctx: &mut WorkflowContext, delta: Vec<StepResult>) {
    for result in delta {
        ctx.record(result);
    }
}

fn iteration_failure(outcome: &LoopIterationOutcome) -> HandlerError {
    HandlerError::failed(format!(
        "loop iteration {} failed: {}",
        outcome.index,
        outcome.error.as_deref().unwrap_or("unknown error")
    ))
}
