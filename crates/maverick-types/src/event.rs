//! Event vocabulary for workflow execution.
//!
//! `WorkflowEvent` is the single event type the executor emits. Events are
//! totally ordered by a monotonic sequence number and carry the step path
//! they pertain to when applicable. All variants are Clone + Send + Sync for
//! use with tokio channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::StepType;

/// One event in a workflow run's ordered event sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// Monotonic sequence number, unique within a run.
    pub seq: u64,
    /// Step path this event pertains to, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_path: Option<String>,
    /// Kind discriminator plus kind-specific payload.
    #[serde(flatten)]
    pub kind: WorkflowEventKind,
}

/// Events emitted during workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEventKind {
    // -- Run lifecycle --
    /// Emitted exactly once, before any other event.
    WorkflowStarted { workflow_name: String, run_id: Uuid },
    /// Terminal: the run finished with every step accounted for.
    WorkflowCompleted {
        workflow_name: String,
        duration_ms: u64,
    },
    /// Terminal: the run aborted.
    WorkflowFailed { workflow_name: String, error: String },
    /// Terminal: the caller cancelled the run.
    WorkflowCancelled { workflow_name: String },

    // -- Step lifecycle --
    StepStarted {
        step_name: String,
        step_type: StepType,
    },
    StepCompleted {
        step_name: String,
        step_type: StepType,
        duration_ms: u64,
    },
    StepFailed {
        step_name: String,
        step_type: StepType,
        error: String,
    },
    /// The step's `when` guard was falsy.
    StepSkipped { step_name: String, reason: String },

    // -- Loop progress --
    LoopIterationStarted { iteration_index: usize },
    LoopIterationCompleted {
        iteration_index: usize,
        success: bool,
    },
    /// Emitted after each `until` predicate evaluation.
    LoopConditionChecked {
        iteration_index: usize,
        condition_met: bool,
    },

    // -- Branch --
    /// `index` is -1 when no option matched.
    BranchSelected {
        index: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selected_step: Option<String>,
    },

    // -- Validation stages --
    ValidateStageStarted { stage: String },
    ValidateStageFinished {
        stage: String,
        passed: bool,
        duration_ms: u64,
    },

    // -- Preflight --
    PreflightStarted { prerequisites: Vec<String> },
    PreflightCheckPassed {
        name: String,
        display_name: String,
        duration_ms: u64,
        message: String,
    },
    PreflightCheckFailed {
        name: String,
        display_name: String,
        duration_ms: u64,
        message: String,
        remediation: String,
        affected_steps: Vec<String>,
    },
    PreflightCompleted {
        success: bool,
        total_duration_ms: u64,
        passed_count: usize,
        failed_count: usize,
    },

    // -- Checkpoints --
    CheckpointSaved { checkpoint_id: String },
    CheckpointRestored {
        checkpoint_id: String,
        restored_steps: usize,
    },
}

impl WorkflowEventKind {
    /// Whether this event terminates the run's event sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowEventKind::WorkflowCompleted { .. }
                | WorkflowEventKind::WorkflowFailed { .. }
                | WorkflowEventKind::WorkflowCancelled { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_carries_type_seq_and_path() {
        let event = WorkflowEvent {
            seq: 7,
            step_path: Some("each/[0]/body".to_string()),
            kind: WorkflowEventKind::StepCompleted {
                step_name: "body".to_string(),
                step_type: StepType::Python,
                duration_ms: 5,
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "step_completed");
        assert_eq!(value["seq"], 7);
        assert_eq!(value["step_path"], "each/[0]/body");
        assert_eq!(value["step_type"], "python");
    }

    #[test]
    fn step_path_omitted_when_absent() {
        let event = WorkflowEvent {
            seq: 0,
            step_path: None,
            kind: WorkflowEventKind::WorkflowStarted {
                workflow_name: "demo".to_string(),
                run_id: Uuid::now_v7(),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "workflow_started");
        assert!(value.get("step_path").is_none());
    }

    #[test]
    fn terminal_classification() {
        assert!(WorkflowEventKind::WorkflowCompleted {
            workflow_name: "w".to_string(),
            duration_ms: 1,
        }
        .is_terminal());
        assert!(WorkflowEventKind::WorkflowCancelled {
            workflow_name: "w".to_string(),
        }
        .is_terminal());
        assert!(!WorkflowEventKind::StepStarted {
            step_name: "s".to_string(),
            step_type: StepType::Agent,
        }
        .is_terminal());
    }

    #[test]
    fn branch_no_match_uses_negative_index() {
        let event = WorkflowEvent {
            seq: 3,
            step_path: Some("route".to_string()),
            kind: WorkflowEventKind::BranchSelected {
                index: -1,
                selected_step: None,
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["index"], -1);
        assert!(value.get("selected_step").is_none());
    }

    #[test]
    fn event_json_roundtrip() {
        let event = WorkflowEvent {
            seq: 12,
            step_path: Some("check".to_string()),
            kind: WorkflowEventKind::PreflightCheckFailed {
                name: "gh_auth".to_string(),
                display_name: "GitHub Auth".to_string(),
                duration_ms: 40,
                message: "not logged in".to_string(),
                remediation: "Run: gh auth login".to_string(),
                affected_steps: vec!["create_pr".to_string()],
            },
        };
        let text = serde_json::to_string(&event).unwrap();
        let parsed: WorkflowEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.seq, 12);
        match parsed.kind {
            WorkflowEventKind::PreflightCheckFailed {
                name, remediation, ..
            } => {
                assert_eq!(name, "gh_auth");
                assert!(remediation.contains("gh auth login"));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
