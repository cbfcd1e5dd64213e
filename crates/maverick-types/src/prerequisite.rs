//! Prerequisite check data types.
//!
//! The check *definitions* (with their async check functions) live in
//! maverick-core; this module holds the pure data that flows between the
//! collector, the runner, and callers: per-check results, the preflight
//! plan, and the aggregated preflight report.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// PrerequisiteResult
// ---------------------------------------------------------------------------

/// Result of a single prerequisite check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrerequisiteResult {
    pub success: bool,
    /// Human-readable status message (success or error description).
    pub message: String,
    #[serde(default)]
    pub duration_ms: u64,
    /// Optional structured details for debugging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl PrerequisiteResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            duration_ms: 0,
            details: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            duration_ms: 0,
            details: None,
        }
    }
}

// ---------------------------------------------------------------------------
// PreflightPlan
// ---------------------------------------------------------------------------

/// The computed set of prerequisites a workflow needs.
///
/// Produced by the collector: `prerequisites` are the names steps asked for,
/// `step_requirements` maps every name in `execution_order` to the step
/// paths that demanded it (empty for transitive-only dependencies), and
/// `execution_order` is a dependency-first topological order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreflightPlan {
    pub prerequisites: Vec<String>,
    pub step_requirements: HashMap<String, Vec<String>>,
    pub execution_order: Vec<String>,
}

impl PreflightPlan {
    /// A plan with nothing to check.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.execution_order.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Preflight outcome
// ---------------------------------------------------------------------------

/// One check's outcome with the definition metadata needed for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightCheckOutcome {
    pub name: String,
    pub display_name: String,
    pub result: PrerequisiteResult,
    /// User-facing fix instructions from the prerequisite definition.
    #[serde(default)]
    pub remediation: String,
    /// Step paths that required this prerequisite.
    #[serde(default)]
    pub affected_steps: Vec<String>,
}

/// Aggregated result of all prerequisite checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightResult {
    pub success: bool,
    pub check_results: Vec<PreflightCheckOutcome>,
    pub total_duration_ms: u64,
}

impl PreflightResult {
    /// The empty, successful preflight.
    pub fn passed_trivially() -> Self {
        Self {
            success: true,
            check_results: Vec::new(),
            total_duration_ms: 0,
        }
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &PreflightCheckOutcome> {
        self.check_results.iter().filter(|c| !c.result.success)
    }

    pub fn passed_checks(&self) -> impl Iterator<Item = &PreflightCheckOutcome> {
        self.check_results.iter().filter(|c| c.result.success)
    }

    /// Multi-line report of every failed check with remediation hints and
    /// affected steps. Empty when the preflight passed.
    pub fn format_error(&self) -> String {
        if self.success {
            return String::new();
        }

        let mut lines = vec!["Preflight checks failed:".to_string()];
        for check in self.failed_checks() {
            lines.push(format!("\n  {}:", check.display_name));
            lines.push(format!("    Error: {}", check.result.message));
            if !check.affected_steps.is_empty() {
                lines.push(format!(
                    "    Affects steps: {}",
                    check.affected_steps.join(", ")
                ));
            }
            if !check.remediation.is_empty() {
                lines.push(format!("    Fix: {}", check.remediation));
            }
        }
        lines.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
