//! Checkpoint snapshot type.
//!
//! One snapshot per `(workflow_name, checkpoint_id)`: the canonical-input
//! hash, the step results recorded so far (in execution order), and the save
//! timestamp. Stores persist snapshots as single JSON documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::result::StepResult;

/// A durable snapshot of a workflow run at a named checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointSnapshot {
    pub workflow_name: String,
    pub checkpoint_id: String,
    /// Hex SHA-256 of the run's canonicalized inputs. Resume fails when the
    /// resuming caller's inputs hash differently.
    pub inputs_hash: String,
    /// Step results recorded up to the checkpoint, in execution order.
    pub step_results: Vec<StepResult>,
    /// RFC-3339 save time.
    pub saved_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::StepType;
    use serde_json::json;

    fn sample() -> CheckpointSnapshot {
        CheckpointSnapshot {
            workflow_name: "test-checkpoint".to_string(),
            checkpoint_id: "after_step1".to_string(),
            inputs_hash: "ab".repeat(32),
            step_results: vec![StepResult::succeeded(
                "step1",
                StepType::Python,
                json!("step1_result_test"),
                4,
            )],
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn snapshot_json_roundtrip_is_structural_equality() {
        let snapshot = sample();
        let text = serde_json::to_string(&snapshot).unwrap();
        let parsed: CheckpointSnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn snapshot_wire_keys() {
        let value = serde_json::to_value(sample()).unwrap();
        for key in [
            "workflow_name",
            "checkpoint_id",
            "inputs_hash",
            "step_results",
            "saved_at",
        ] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
        // chrono serializes DateTime<Utc> as RFC-3339
        let saved_at = value["saved_at"].as_str().unwrap();
        assert!(saved_at.contains('T'));
    }
}
