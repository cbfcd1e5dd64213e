//! Checkpoint step handler: snapshot the run state through the store.

use chrono::Utc;
use maverick_types::checkpoint::CheckpointSnapshot;
use maverick_types::event::WorkflowEventKind;
use serde_json::{json, Value};

use crate::workflow::checkpoint::inputs_hash;
use crate::workflow::context::WorkflowContext;

use super::{HandlerError, RunDeps};

pub(super) async fn run(
    checkpoint_id: &str,
    path: &str,
    ctx: &mut WorkflowContext,
    deps: &RunDeps,
) -> Result<Value, HandlerError> {
    let Some(store) = &deps.store else {
        return Err(HandlerError::failed(format!(
            "checkpoint '{checkpoint_id}' requires a checkpoint store; none is configured"
        )));
    };

    let snapshot = CheckpointSnapshot {
        workflow_name: deps.workflow_name.clone(),
        checkpoint_id: checkpoint_id.to_string(),
        inputs_hash: inputs_hash(ctx.inputs()),
        step_results: ctx.results_in_order(),
        saved_at: Utc::now(),
    };

    store
        .save(&snapshot)
        .await
        .map_err(|e| HandlerError::failed(format!("checkpoint write failed: {e}")))?;

    deps.emitter.emit(
        Some(path.to_string()),
        WorkflowEventKind::CheckpointSaved {
            checkpoint_id: checkpoint_id.to_string(),
        },
    );

    Ok(json!({
        "checkpoint_id": checkpoint_id,
        "steps_recorded": snapshot.step_results.len(),
    }))
}
