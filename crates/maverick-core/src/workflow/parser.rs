//! Workflow file parsing and structural validation.
//!
//! Converts YAML (or JSON) documents into validated `WorkflowFile` values
//! and checks the inputs a caller supplies against the declarations,
//! applying defaults. Parse errors cite the document location reported by
//! the YAML parser; validation errors cite the offending step or input by
//! name.

use std::collections::HashSet;

use maverick_types::workflow::{
    InputDef, InputType, StepKind, StepRecord, WorkflowFile,
};
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from workflow parsing, validation, and input checking.
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    /// YAML/JSON shape or value violation.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural or semantic validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Supplied inputs do not satisfy the workflow's declarations.
    #[error("input error: {0}")]
    Input(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated [`WorkflowFile`].
///
/// Runs [`validate_structure`] after deserialization, so the returned value
/// is guaranteed structurally valid.
pub fn parse_workflow(yaml: &str) -> Result<WorkflowFile, WorkflowError> {
    let workflow: WorkflowFile = serde_yaml_ng::from_str(yaml).map_err(|e| {
        // serde_yaml_ng error display includes "at line L column C" when the
        // location is known.
        WorkflowError::Parse(e.to_string())
    })?;
    validate_structure(&workflow)?;
    Ok(workflow)
}

/// Serialize a workflow back to YAML.
pub fn serialize_workflow(workflow: &WorkflowFile) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(workflow).map_err(|e| WorkflowError::Parse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Structural validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a parsed workflow.
///
/// Checks:
/// - `version` is "1.0"
/// - `name` is a lowercase identifier
/// - at least one step exists
/// - required inputs declare no default; `choices` only on enum inputs
/// - step names are unique within each composite parent
/// - loops declare exactly one of `over`/`until` and a non-empty body
/// - branches declare at least one option
pub fn validate_structure(workflow: &WorkflowFile) -> Result<(), WorkflowError> {
    if workflow.version != "1.0" {
        return Err(WorkflowError::Validation(format!(
            "unsupported workflow version '{}' (expected \"1.0\")",
            workflow.version
        )));
    }

    if !is_lowercase_identifier(&workflow.name) {
        return Err(WorkflowError::Validation(format!(
            "workflow name '{}' must be a lowercase identifier \
             (letters, digits, '-', '_', starting with a letter)",
            workflow.name
        )));
    }

    if workflow.steps.is_empty() {
        return Err(WorkflowError::Validation(
            "workflow must have at least one step".to_string(),
        ));
    }

    for (name, def) in &workflow.inputs {
        validate_input_def(name, def)?;
    }

    validate_step_list(&workflow.steps, "workflow")?;
    Ok(())
}

fn is_lowercase_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

fn validate_input_def(name: &str, def: &InputDef) -> Result<(), WorkflowError> {
    if def.required && def.default.is_some() {
        return Err(WorkflowError::Validation(format!(
            "input '{name}' is required and must not declare a default"
        )));
    }
    if def.choices.is_some() && def.input_type != InputType::Enum {
        return Err(WorkflowError::Validation(format!(
            "input '{name}' declares choices but is not an enum"
        )));
    }
    if def.input_type == InputType::Enum {
        match &def.choices {
            Some(choices) if !choices.is_empty() => {}
            _ => {
                return Err(WorkflowError::Validation(format!(
                    "enum input '{name}' must declare a non-empty choices list"
                )));
            }
        }
    }
    Ok(())
}

/// Validate one sibling list: unique names, then recurse per kind.
fn validate_step_list(steps: &[StepRecord], parent: &str) -> Result<(), WorkflowError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for step in steps {
        if !seen.insert(step.name.as_str()) {
            return Err(WorkflowError::Validation(format!(
                "duplicate step name '{}' in {parent}",
                step.name
            )));
        }
        validate_step(step)?;
    }
    Ok(())
}

fn validate_step(step: &StepRecord) -> Result<(), WorkflowError> {
    if step.name.is_empty() {
        return Err(WorkflowError::Validation(
            "step name must not be empty".to_string(),
        ));
    }

    match &step.kind {
        StepKind::Loop {
            over,
            until,
            max_iterations,
            parallel,
            steps,
            ..
        } => {
            match (over, until) {
                (Some(_), Some(_)) => {
                    return Err(WorkflowError::Validation(format!(
                        "loop step '{}' declares both 'over' and 'until'; they are mutually exclusive",
                        step.name
                    )));
                }
                (None, None) => {
                    return Err(WorkflowError::Validation(format!(
                        "loop step '{}' must declare 'over' or 'until'",
                        step.name
                    )));
                }
                _ => {}
            }
            if *parallel && until.is_some() {
                return Err(WorkflowError::Validation(format!(
                    "loop step '{}' cannot be parallel with 'until' termination",
                    step.name
                )));
            }
            if *max_iterations == 0 {
                return Err(WorkflowError::Validation(format!(
                    "loop step '{}' must allow at least one iteration",
                    step.name
                )));
            }
            if steps.is_empty() {
                return Err(WorkflowError::Validation(format!(
                    "loop step '{}' must have a non-empty body",
                    step.name
                )));
            }
            validate_step_list(steps, &format!("loop step '{}'", step.name))?;
        }
        StepKind::Branch { options } => {
            if options.is_empty() {
                return Err(WorkflowError::Validation(format!(
                    "branch step '{}' must declare at least one option",
                    step.name
                )));
            }
            let nested: Vec<StepRecord> =
                options.iter().map(|o| o.step.as_ref().clone()).collect();
            validate_step_list(&nested, &format!("branch step '{}'", step.name))?;
        }
        StepKind::Validate {
            on_failure: Some(on_failure),
            ..
        } => {
            validate_step(on_failure)?;
        }
        StepKind::Checkpoint { checkpoint_id } => {
            if checkpoint_id.is_empty() {
                return Err(WorkflowError::Validation(format!(
                    "checkpoint step '{}' must declare a checkpoint_id",
                    step.name
                )));
            }
        }
        _ => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Input validation
// ---------------------------------------------------------------------------

/// Check supplied inputs against the workflow's declarations.
///
/// Returns the validated map with defaults applied. Unknown keys, missing
/// required inputs, type mismatches, and enum values outside `choices` are
/// rejected.
pub fn validate_inputs(
    workflow: &WorkflowFile,
    supplied: &serde_json::Map<String, Value>,
) -> Result<serde_json::Map<String, Value>, WorkflowError> {
    for key in supplied.keys() {
        if !workflow.inputs.contains_key(key) {
            let mut declared: Vec<&str> = workflow.inputs.keys().map(String::as_str).collect();
            declared.sort_unstable();
            return Err(WorkflowError::Input(format!(
                "unexpected input '{key}'; declared inputs: {}",
                if declared.is_empty() {
                    "(none)".to_string()
                } else {
                    declared.join(", ")
                }
            )));
        }
    }

    let mut validated = serde_json::Map::new();
    let mut names: Vec<&String> = workflow.inputs.keys().collect();
    names.sort();

    for name in names {
        let def = &workflow.inputs[name];
        match supplied.get(name) {
            Some(value) => {
                check_input_type(name, def, value)?;
                validated.insert(name.clone(), value.clone());
            }
            None => {
                if let Some(default) = &def.default {
                    validated.insert(name.clone(), default.clone());
                } else if def.required {
                    return Err(WorkflowError::Input(format!(
                        "missing required input '{name}'"
                    )));
                }
            }
        }
    }
    Ok(validated)
}

fn check_input_type(name: &str, def: &InputDef, value: &Value) -> Result<(), WorkflowError> {
    let ok = match def.input_type {
        InputType::String => value.is_string(),
        InputType::Integer => value.is_i64() || value.is_u64(),
        InputType::Boolean => value.is_boolean(),
        InputType::Number => value.is_number(),
        InputType::Array => value.is_array(),
        InputType::Object => value.is_object(),
        InputType::Enum => {
            return match &def.choices {
                Some(choices) if choices.contains(value) => Ok(()),
                Some(choices) => Err(WorkflowError::Input(format!(
                    "input '{name}' must be one of {choices:?}, got {value}"
                ))),
                None => Err(WorkflowError::Input(format!(
                    "enum input '{name}' has no choices declared"
                ))),
            };
        }
    };
    if !ok {
        return Err(WorkflowError::Input(format!(
            "input '{name}' has the wrong type: expected {:?}, got {value}",
            def.input_type
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
