//! Validate step handler: run stages through the configured runner with
//! retry and an optional recovery step before each retry.

use std::time::Instant;

use maverick_types::event::WorkflowEventKind;
use maverick_types::result::{StageResult, ValidationResult};
use maverick_types::workflow::StagesSpec;
use serde_json::Value;

use crate::workflow::context::WorkflowContext;

use super::{execute_step, HandlerError, RunDeps, StepFlow};

pub(super) async fn run(
    stages_spec: Option<&StagesSpec>,
    retry: u32,
    on_failure: Option<&maverick_types::workflow::StepRecord>,
    path: &str,
    ctx: &mut WorkflowContext,
    deps: &RunDeps,
    depth: u32,
) -> Result<Value, HandlerError> {
    let stages = resolve_stages(stages_spec, deps)?;

    let mut fix_attempts: u32 = 0;
    let mut retries_remaining = retry;

    loop {
        let result = run_stages(&stages, fix_attempts, path, deps).await?;

        if result.success {
            return Ok(serde_json::to_value(&result).unwrap_or(Value::Null));
        }

        if retries_remaining == 0 {
            // Exhausted: the failed attempt's ValidationResult is still the
            // step's output.
            return Err(HandlerError::Failed {
                error: format!("Validation failed after {retry} retries"),
                output: serde_json::to_value(&result).unwrap_or(Value::Null),
            });
        }

        if let Some(on_failure) = on_failure {
            // Each attempt gets its own path segment so retried recovery
            // steps record distinct results.
            let prefix = format!("{path}/[{fix_attempts}]/");
            match execute_step(on_failure.clone(), prefix, ctx, deps.clone(), depth).await {
                StepFlow::Continue => {}
                StepFlow::Halt { error, .. } => {
                    tracing::warn!(
                        step = path,
                        error = error.as_str(),
                        "on_failure step failed; retrying validation anyway"
                    );
                }
                StepFlow::Cancelled => return Err(HandlerError::Cancelled),
            }
        }

        retries_remaining -= 1;
        fix_attempts += 1;
    }
}

/// Explicit list, named stage set from the run config, or the configured
/// default stages.
fn resolve_stages(
    spec: Option<&StagesSpec>,
    deps: &RunDeps,
) -> Result<Vec<String>, HandlerError> {
    match spec {
        Some(StagesSpec::List(stages)) => Ok(stages.clone()),
        Some(StagesSpec::Key(key)) => {
            deps.config.stage_sets.get(key).cloned().ok_or_else(|| {
                HandlerError::failed(format!(
                    "validation stages '{key}' not found in run configuration"
                ))
            })
        }
        None => Ok(deps.config.validation_stages.clone()),
    }
}

/// One validation attempt over all stages.
async fn run_stages(
    stages: &[String],
    fix_attempts: u32,
    path: &str,
    deps: &RunDeps,
) -> Result<ValidationResult, HandlerError> {
    let Some(runner) = &deps.config.validation_runner else {
        // No runner configured: trivial pass.
        let mut result = ValidationResult::trivial_pass(stages.to_vec());
        result.fix_attempts = fix_attempts;
        return Ok(result);
    };

    let mut stage_results: Vec<StageResult> = Vec::with_capacity(stages.len());
    for stage in stages {
        if deps.cancel.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }

        deps.emitter.emit(
            Some(path.to_string()),
            WorkflowEventKind::ValidateStageStarted {
                stage: stage.clone(),
            },
        );
        let start = Instant::now();

        let stage_result = match runner.run_stage(stage).await {
            Ok(result) => result,
            Err(e) => StageResult {
                name: stage.clone(),
                passed: false,
                output: String::new(),
                error: Some(e.to_string()),
            },
        };

        deps.emitter.emit(
            Some(path.to_string()),
            WorkflowEventKind::ValidateStageFinished {
                stage: stage.clone(),
                passed: stage_result.passed,
                duration_ms: start.elapsed().as_millis() as u64,
            },
        );
        stage_results.push(stage_result);
    }

    let success = stage_results.iter().all(|r| r.passed);
    Ok(ValidationResult {
        success,
        stages: stages.to_vec(),
        stage_results,
        fix_attempts,
    })
}
