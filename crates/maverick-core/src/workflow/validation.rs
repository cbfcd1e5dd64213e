//! Semantic validation: every component a workflow references must exist in
//! the registry before execution starts.
//!
//! Structural checks (step-name uniqueness, loop termination exclusivity,
//! non-empty branches) happen at parse time in `parser`; this pass only
//! resolves names against the populated `ComponentRegistry`. It is enabled
//! by default and can be switched off via `RunConfig` for callers that
//! register components late.

use maverick_types::workflow::{StepKind, StepRecord, WorkflowFile};
use serde_json::Value;

use crate::registry::ComponentRegistry;

use super::parser::WorkflowError;

/// Verify that every referenced action, agent, generator, context builder,
/// and sub-workflow name exists in the registry.
pub fn validate_semantics(
    workflow: &WorkflowFile,
    registry: &ComponentRegistry,
) -> Result<(), WorkflowError> {
    validate_steps(&workflow.steps, registry)
}

fn validate_steps(
    steps: &[StepRecord],
    registry: &ComponentRegistry,
) -> Result<(), WorkflowError> {
    for step in steps {
        validate_step(step, registry)?;
    }
    Ok(())
}

fn validate_step(step: &StepRecord, registry: &ComponentRegistry) -> Result<(), WorkflowError> {
    match &step.kind {
        StepKind::Python { action, .. } => {
            if !registry.actions.has(action) {
                return Err(unknown_reference(step, "action", action, registry.actions.list_names()));
            }
        }
        StepKind::Agent {
            agent,
            inputs,
            context_builder,
        } => {
            if !registry.agents.has(agent) {
                return Err(unknown_reference(step, "agent", agent, registry.agents.list_names()));
            }
            validate_context_builder(step, context_builder.as_deref(), inputs, registry)?;
        }
        StepKind::Generate {
            generator,
            inputs,
            context_builder,
        } => {
            if !registry.generators.has(generator) {
                return Err(unknown_reference(
                    step,
                    "generator",
                    generator,
                    registry.generators.list_names(),
                ));
            }
            validate_context_builder(step, context_builder.as_deref(), inputs, registry)?;
        }
        StepKind::Subworkflow { workflow, .. } => {
            if !registry.workflows.has(workflow) {
                return Err(unknown_reference(
                    step,
                    "workflow",
                    workflow,
                    registry.workflows.list_names(),
                ));
            }
        }
        StepKind::Branch { options } => {
            for option in options {
                validate_step(&option.step, registry)?;
            }
        }
        StepKind::Loop { steps, .. } => {
            validate_steps(steps, registry)?;
        }
        StepKind::Validate { on_failure, .. } => {
            if let Some(on_failure) = on_failure {
                validate_step(on_failure, registry)?;
            }
        }
        StepKind::Checkpoint { .. } => {}
    }
    Ok(())
}

/// Resolve the context builder named by the explicit field or the reserved
/// `_context_builder` inputs key (when it is a plain string literal; an
/// expression-valued key can only be checked at execution time).
fn validate_context_builder(
    step: &StepRecord,
    explicit: Option<&str>,
    inputs: &serde_json::Map<String, Value>,
    registry: &ComponentRegistry,
) -> Result<(), WorkflowError> {
    let from_inputs = inputs
        .get("_context_builder")
        .and_then(Value::as_str)
        .filter(|s| !s.contains("${{"));
    if let Some(name) = explicit.or(from_inputs) {
        if !registry.context_builders.has(name) {
            return Err(unknown_reference(
                step,
                "context builder",
                name,
                registry.context_builders.list_names(),
            ));
        }
    }
    Ok(())
}

fn unknown_reference(
    step: &StepRecord,
    kind: &str,
    name: &str,
    known: Vec<String>,
) -> WorkflowError {
    WorkflowError::Validation(format!(
        "step '{}' references unknown {kind} '{name}'; registered: {}",
        step.name,
        if known.is_empty() {
            "(none)".to_string()
        } else {
            known.join(", ")
        }
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
