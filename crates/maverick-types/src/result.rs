//! Step and workflow result types.
//!
//! `StepResult` is the per-step execution record stored in the workflow
//! context (keyed by step path) and serialized into checkpoints. Composite
//! steps wrap their kind-specific payloads (`BranchResult`,
//! `ValidationResult`, `LoopIterationOutcome`) as JSON in `StepResult::output`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflow::StepType;

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

/// The immutable record of one step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Step path (e.g. `"load"` or `"each/[0]/body"`).
    pub name: String,
    pub step_type: StepType,
    pub success: bool,
    /// Kind-specific output value; `null` when the step produced nothing.
    #[serde(default)]
    pub output: Value,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    /// A successful result with the given output.
    pub fn succeeded(name: impl Into<String>, step_type: StepType, output: Value, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            step_type,
            success: true,
            output,
            duration_ms,
            error: None,
        }
    }

    /// A failed result carrying the error message.
    pub fn failed(
        name: impl Into<String>,
        step_type: StepType,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            name: name.into(),
            step_type,
            success: false,
            output: Value::Null,
            duration_ms,
            error: Some(error.into()),
        }
    }

    /// A skipped result (falsy `when` guard). Skips count as successful.
    pub fn skipped(name: impl Into<String>, step_type: StepType, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            step_type,
            success: true,
            output: Value::Null,
            duration_ms: 0,
            error: Some(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Kind-specific outputs
// ---------------------------------------------------------------------------

/// Output of a branch step when an option matched.
///
/// A branch with no matching option records `success=true` with a `null`
/// output instead of a `BranchResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchResult {
    /// Zero-based index of the selected option.
    pub selected_index: usize,
    /// Name of the executed inner step.
    pub selected_step_name: String,
    /// The inner step's output.
    pub inner_output: Value,
}

/// Per-stage outcome from a validation runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub name: String,
    pub passed: bool,
    /// Captured stage output (stdout/stderr tail or summary).
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate output of a validate step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub success: bool,
    /// Stage names that were requested to run.
    pub stages: Vec<String>,
    /// Per-stage results from the final attempt.
    #[serde(default)]
    pub stage_results: Vec<StageResult>,
    /// How many retry attempts (with their `on_failure` fixes) were used.
    #[serde(default)]
    pub fix_attempts: u32,
}

impl ValidationResult {
    /// The trivial pass recorded when no validation runner is configured.
    pub fn trivial_pass(stages: Vec<String>) -> Self {
        Self {
            success: true,
            stages,
            stage_results: Vec::new(),
            fix_attempts: 0,
        }
    }
}

/// Summary of one loop iteration, collected into the loop's output array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopIterationOutcome {
    pub index: usize,
    pub success: bool,
    /// Body step name -> output for this iteration.
    pub steps: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// WorkflowResult
// ---------------------------------------------------------------------------

/// Final result of a workflow run, available once the event stream ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub success: bool,
    pub workflow_name: String,
    /// The validated inputs the run used (defaults applied).
    pub inputs: serde_json::Map<String, Value>,
    /// Step results in execution order, keyed internally by step path.
    pub step_results: Vec<StepResult>,
    /// Output of the last completed step, `null` if none ran.
    #[serde(default)]
    pub final_output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_result_roundtrip() {
        let result = StepResult::succeeded("load", StepType::Python, json!({"files": ["a"]}), 12);
        let text = serde_json::to_string(&result).unwrap();
        let parsed: StepResult = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.name, "load");
        assert!(parsed.success);
        assert_eq!(parsed.output["files"][0], json!("a"));
        assert!(parsed.error.is_none());
    }

    #[test]
    fn failed_result_has_null_output() {
        let result = StepResult::failed("load", StepType::Python, "boom", 3);
        assert!(!result.success);
        assert_eq!(result.output, Value::Null);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[test]
    fn skipped_result_counts_as_success() {
        let result = StepResult::skipped("opt", StepType::Agent, "when guard was falsy");
        assert!(result.success);
        assert_eq!(result.duration_ms, 0);
    }

    #[test]
    fn branch_result_as_step_output() {
        let branch = BranchResult {
            selected_index: 1,
            selected_step_name: "path_b".to_string(),
            inner_output: json!("Result B"),
        };
        let output = serde_json::to_value(&branch).unwrap();
        assert_eq!(output["selected_index"], json!(1));
        assert_eq!(output["selected_step_name"], json!("path_b"));
        assert_eq!(output["inner_output"], json!("Result B"));
    }

    #[test]
    fn validation_result_trivial_pass() {
        let result = ValidationResult::trivial_pass(vec!["lint".to_string()]);
        assert!(result.success);
        assert_eq!(result.stages, vec!["lint"]);
        assert!(result.stage_results.is_empty());
        assert_eq!(result.fix_attempts, 0);
    }

    #[test]
    fn loop_iteration_outcome_roundtrip() {
        let mut steps = serde_json::Map::new();
        steps.insert("body".to_string(), json!(3));
        let outcome = LoopIterationOutcome {
            index: 2,
            success: true,
            steps,
            error: None,
        };
        let text = serde_json::to_string(&outcome).unwrap();
        let parsed: LoopIterationOutcome = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.index, 2);
        assert_eq!(parsed.steps["body"], json!(3));
    }
}
