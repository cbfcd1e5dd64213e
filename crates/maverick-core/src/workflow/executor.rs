//! Workflow executor.
//!
//! Drives a parsed workflow through its phases: synchronous validation
//! (structure, inputs, semantic references), then -- on a spawned control
//! task -- preflight, optional checkpoint resume, and step iteration. The
//! caller receives a [`WorkflowExecution`] handle: an ordered event
//! sequence, a cancellation handle, and the final [`WorkflowResult`] once
//! the sequence ends.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use maverick_types::event::{WorkflowEvent, WorkflowEventKind};
use maverick_types::result::{StepResult, WorkflowResult};
use maverick_types::workflow::{StepType, WorkflowFile};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RunConfig;
use crate::prerequisites::{PrerequisiteCollector, PrerequisiteRegistry, PrerequisiteRunner};
use crate::registry::ComponentRegistry;

use super::checkpoint::{snapshot_matches_inputs, BoxCheckpointStore, CheckpointStore};
use super::context::WorkflowContext;
use super::events::EventEmitter;
use super::handlers::{execute_step, RunDeps, StepFlow};
use super::parser::{validate_inputs, validate_structure, WorkflowError};
use super::validation::validate_semantics;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-call execution options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    /// Load the workflow's most recent checkpoint and skip the steps it
    /// recorded. Fails the run when the snapshot's inputs hash differs.
    pub resume_from_checkpoint: bool,
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Executes workflows against a frozen component registry.
pub struct WorkflowExecutor {
    registry: Arc<ComponentRegistry>,
    prerequisites: Arc<PrerequisiteRegistry>,
    store: Option<Arc<BoxCheckpointStore>>,
    config: Arc<RunConfig>,
}

impl WorkflowExecutor {
    pub fn new(registry: ComponentRegistry, prerequisites: PrerequisiteRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            prerequisites: Arc::new(prerequisites),
            store: None,
            config: Arc::new(RunConfig::default()),
        }
    }

    pub fn with_checkpoint_store<S: CheckpointStore + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(BoxCheckpointStore::new(store)));
        self
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Start a run with default options.
    ///
    /// Parse/validation errors are returned synchronously; no events are
    /// produced for them.
    pub fn execute(
        &self,
        workflow: WorkflowFile,
        inputs: Map<String, Value>,
    ) -> Result<WorkflowExecution, WorkflowError> {
        self.execute_with_options(workflow, inputs, ExecuteOptions::default())
    }

    /// Start a run.
    pub fn execute_with_options(
        &self,
        workflow: WorkflowFile,
        inputs: Map<String, Value>,
        options: ExecuteOptions,
    ) -> Result<WorkflowExecution, WorkflowError> {
        validate_structure(&workflow)?;
        let inputs = validate_inputs(&workflow, &inputs)?;
        if self.config.semantic_validation {
            validate_semantics(&workflow, &self.registry)?;
        }

        let (emitter, events) = EventEmitter::channel();
        let cancel = CancellationToken::new();
        let result_slot: Arc<Mutex<Option<WorkflowResult>>> = Arc::new(Mutex::new(None));

        let deps = RunDeps {
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
            store: self.store.clone(),
            emitter: Arc::new(emitter),
            cancel: cancel.clone(),
            workflow_name: workflow.name.clone(),
        };
        let prerequisites = Arc::clone(&self.prerequisites);
        let slot = Arc::clone(&result_slot);

        tokio::spawn(run_workflow(workflow, inputs, options, deps, prerequisites, slot));

        Ok(WorkflowExecution {
            events,
            cancel,
            result: result_slot,
        })
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecution handle
// ---------------------------------------------------------------------------

/// Handle to a running workflow: the ordered event sequence plus
/// cancellation and result access.
pub struct WorkflowExecution {
    events: mpsc::UnboundedReceiver<WorkflowEvent>,
    cancel: CancellationToken,
    result: Arc<Mutex<Option<WorkflowResult>>>,
}

impl WorkflowExecution {
    /// Next event, or `None` once the terminal event has been delivered and
    /// the run is finished.
    pub async fn next_event(&mut self) -> Option<WorkflowEvent> {
        self.events.recv().await
    }

    /// Request cooperative cancellation. In-flight loop iterations stop, no
    /// partial checkpoint is written, and the terminal event is
    /// `WorkflowCancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The run result. `Some` once the event sequence has ended.
    pub fn result(&self) -> Option<WorkflowResult> {
        self.result
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Collect all remaining events until the stream ends.
    pub async fn drain(&mut self) -> Vec<WorkflowEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }

    /// Drain the event stream and return the final result.
    pub async fn wait(mut self) -> Option<WorkflowResult> {
        while self.next_event().await.is_some() {}
        self.result()
    }
}

impl futures_util::Stream for WorkflowExecution {
    type Item = WorkflowEvent;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

// ---------------------------------------------------------------------------
// Control task
// ---------------------------------------------------------------------------

async fn run_workflow(
    workflow: WorkflowFile,
    inputs: Map<String, Value>,
    options: ExecuteOptions,
    deps: RunDeps,
    prerequisites: Arc<PrerequisiteRegistry>,
    result_slot: Arc<Mutex<Option<WorkflowResult>>>,
) {
    let run_id = Uuid::now_v7();
    let started = Instant::now();

    deps.emitter.emit(
        None,
        WorkflowEventKind::WorkflowStarted {
            workflow_name: workflow.name.clone(),
            run_id,
        },
    );
    tracing::info!(
        run_id = %run_id,
        workflow = workflow.name.as_str(),
        "starting workflow execution"
    );

    let mut ctx = WorkflowContext::new(inputs.clone());
    let mut final_output = Value::Null;
    let finish = Finisher {
        workflow_name: workflow.name.clone(),
        inputs,
        deps: &deps,
        result_slot: &result_slot,
    };

    // Phase: preflight.
    let plan = match PrerequisiteCollector::collect(&workflow, &deps.registry, &prerequisites) {
        Ok(plan) => plan,
        Err(e) => {
            finish.failed(&ctx, &final_output, format!("preflight error: {e}"));
            return;
        }
    };
    let runner =
        PrerequisiteRunner::new(&prerequisites).with_timeout(deps.config.check_timeout);
    match runner.run_with_events(&plan, deps.emitter.as_ref()).await {
        Ok(preflight) if preflight.success => {}
        Ok(preflight) => {
            finish.failed(&ctx, &final_output, preflight.format_error());
            return;
        }
        Err(e) => {
            finish.failed(&ctx, &final_output, format!("preflight error: {e}"));
            return;
        }
    }

    // Phase: resume.
    if options.resume_from_checkpoint {
        let Some(store) = &deps.store else {
            finish.failed(&ctx, &final_output, "resume requested but no checkpoint store is configured");
            return;
        };
        match store.load_latest(&workflow.name).await {
            Err(e) => {
                finish.failed(&ctx, &final_output, format!("failed to load checkpoint: {e}"));
                return;
            }
            Ok(None) => {
                tracing::warn!(
                    workflow = workflow.name.as_str(),
                    "resume requested but no checkpoint exists; running from the start"
                );
            }
            Ok(Some(snapshot)) => {
                if !snapshot_matches_inputs(&snapshot, finish.inputs()) {
                    finish.failed(
                        &ctx,
                        &final_output,
                        format!(
                            "cannot resume workflow '{}' from checkpoint '{}': \
                             inputs differ from the snapshot (input hash mismatch)",
                            workflow.name, snapshot.checkpoint_id
                        ),
                    );
                    return;
                }
                let restored_steps = snapshot.step_results.len();
                for result in snapshot.step_results {
                    if !result.name.contains('/') {
                        update_final_output(&mut final_output, &result);
                    }
                    ctx.record(result);
                }
                tracing::info!(
                    workflow = workflow.name.as_str(),
                    checkpoint_id = snapshot.checkpoint_id.as_str(),
                    restored_steps,
                    "resuming from checkpoint"
                );
                deps.emitter.emit(
                    None,
                    WorkflowEventKind::CheckpointRestored {
                        checkpoint_id: snapshot.checkpoint_id,
                        restored_steps,
                    },
                );
            }
        }
    }

    // Phase: step iteration.
    for step in &workflow.steps {
        if deps.cancel.is_cancelled() {
            finish.cancelled(&ctx, &final_output);
            return;
        }
        match execute_step(step.clone(), String::new(), &mut ctx, deps.clone(), 0).await {
            StepFlow::Continue => {
                if let Some(result) = ctx.get_result(&step.name) {
                    update_final_output(&mut final_output, result);
                }
            }
            StepFlow::Halt { path, error } => {
                finish.failed(&ctx, &final_output, format!("step '{path}' failed: {error}"));
                return;
            }
            StepFlow::Cancelled => {
                finish.cancelled(&ctx, &final_output);
                return;
            }
        }
    }

    finish.completed(&ctx, &final_output, started.elapsed().as_millis() as u64);
}

/// Builds the final result, stores it, and emits the terminal event. The
/// result is visible before the terminal event so a consumer that has just
/// read it can immediately call `result()`.
struct Finisher<'a> {
    workflow_name: String,
    inputs: Map<String, Value>,
    deps: &'a RunDeps,
    result_slot: &'a Mutex<Option<WorkflowResult>>,
}

impl Finisher<'_> {
    fn inputs(&self) -> &Map<String, Value> {
        &self.inputs
    }

    fn store_result(
        &self,
        ctx: &WorkflowContext,
        final_output: &Value,
        success: bool,
        error: Option<String>,
    ) {
        let result = WorkflowResult {
            success,
            workflow_name: self.workflow_name.clone(),
            inputs: self.inputs.clone(),
            step_results: ctx.results_in_order(),
            final_output: final_output.clone(),
            error,
        };
        *self
            .result_slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(result);
    }

    fn completed(&self, ctx: &WorkflowContext, final_output: &Value, duration_ms: u64) {
        self.store_result(ctx, final_output, true, None);
        tracing::info!(
            workflow = self.workflow_name.as_str(),
            duration_ms,
            "workflow completed"
        );
        self.deps.emitter.emit(
            None,
            WorkflowEventKind::WorkflowCompleted {
                workflow_name: self.workflow_name.clone(),
                duration_ms,
            },
        );
    }

    fn failed(&self, ctx: &WorkflowContext, final_output: &Value, error: impl Into<String>) {
        let error = error.into();
        self.store_result(ctx, final_output, false, Some(error.clone()));
        tracing::warn!(
            workflow = self.workflow_name.as_str(),
            error = error.as_str(),
            "workflow failed"
        );
        self.deps.emitter.emit(
            None,
            WorkflowEventKind::WorkflowFailed {
                workflow_name: self.workflow_name.clone(),
                error,
            },
        );
    }

    fn cancelled(&self, ctx: &WorkflowContext, final_output: &Value) {
        self.store_result(ctx, final_output, false, Some("workflow cancelled".to_string()));
        tracing::info!(
            workflow = self.workflow_name.as_str(),
            "workflow cancelled"
        );
        self.deps.emitter.emit(
            None,
            WorkflowEventKind::WorkflowCancelled {
                workflow_name: self.workflow_name.clone(),
            },
        );
    }
}

/// Advance the run's final output with a completed top-level step.
///
/// Validate and checkpoint steps are gates, not producers; a matched branch
/// contributes its inner step's output; skipped steps (recorded with a
/// reason in `error`) leave the output unchanged.
fn update_final_output(current: &mut Value, result: &StepResult) {
    if !result.success || result.error.is_some() {
        return;
    }
    match result.step_type {
        StepType::Validate | StepType::Checkpoint => {}
        StepType::Branch => {
            *current = result
                .output
                .get("inner_output")
                .cloned()
                .unwrap_or_else(|| result.output.clone());
        }
        _ => *current = result.output.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
