//! Executes a preflight plan's checks with dependency ordering.
//!
//! Checks run strictly sequentially in the plan's topological order, so
//! user-visible output never interleaves. A check whose declared dependency
//! already failed is skipped with a synthetic failure naming the first
//! failed dependency.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use maverick_types::event::WorkflowEventKind;
use maverick_types::prerequisite::{
    PreflightCheckOutcome, PreflightPlan, PreflightResult, PrerequisiteResult,
};

use crate::workflow::events::EventEmitter;

use super::{Prerequisite, PrerequisiteError, PrerequisiteRegistry};

/// Default per-check timeout.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs preflight checks in dependency order with per-check timeout.
pub struct PrerequisiteRunner<'a> {
    registry: &'a PrerequisiteRegistry,
    timeout: Duration,
}

impl<'a> PrerequisiteRunner<'a> {
    pub fn new(registry: &'a PrerequisiteRegistry) -> Self {
        Self {
            registry,
            timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute every check in the plan.
    ///
    /// Checks are invoked at most once; dependents of a failed check are
    /// skipped, not executed.
    pub async fn run(&self, plan: &PreflightPlan) -> Result<PreflightResult, PrerequisiteError> {
        self.run_inner(plan, None).await
    }

    /// Like [`run`](Self::run), but emits per-check progress events through
    /// the executor's emitter for live display.
    pub(crate) async fn run_with_events(
        &self,
        plan: &PreflightPlan,
        emitter: &EventEmitter,
    ) -> Result<PreflightResult, PrerequisiteError> {
        self.run_inner(plan, Some(emitter)).await
    }

    async fn run_inner(
        &self,
        plan: &PreflightPlan,
        emitter: Option<&EventEmitter>,
    ) -> Result<PreflightResult, PrerequisiteError> {
        if plan.is_empty() {
            return Ok(PreflightResult::passed_trivially());
        }

        if let Some(emitter) = emitter {
            emitter.emit(
                None,
                WorkflowEventKind::PreflightStarted {
                    prerequisites: plan.execution_order.clone(),
                },
            );
        }

        let start = Instant::now();
        let mut outcomes: Vec<PreflightCheckOutcome> = Vec::new();
        let mut failed: HashSet<String> = HashSet::new();

        for name in &plan.execution_order {
            let prerequisite = self.registry.get(name)?;
            let affected_steps = plan
                .step_requirements
                .get(name)
                .cloned()
                .unwrap_or_default();

            let result = match prerequisite
                .dependencies
                .iter()
                .find(|dep| failed.contains(dep.as_str()))
            {
                Some(failed_dep) => {
                    failed.insert(name.clone());
                    PrerequisiteResult::fail(format!("Skipped: dependency '{failed_dep}' failed"))
                }
                None => {
                    let result = self.run_check(prerequisite).await;
                    if !result.success {
                        failed.insert(name.clone());
                    }
                    result
                }
            };

            tracing::debug!(
                prerequisite = name.as_str(),
                success = result.success,
                duration_ms = result.duration_ms,
                "prerequisite check finished"
            );

            if let Some(emitter) = emitter {
                let kind = if result.success {
                    WorkflowEventKind::PreflightCheckPassed {
                        name: name.clone(),
                        display_name: prerequisite.display_name.clone(),
                        duration_ms: result.duration_ms,
                        message: result.message.clone(),
                    }
                } else {
                    WorkflowEventKind::PreflightCheckFailed {
                        name: name.clone(),
                        display_name: prerequisite.display_name.clone(),
                        duration_ms: result.duration_ms,
                        message: result.message.clone(),
                        remediation: prerequisite.remediation.clone(),
                        affected_steps: affected_steps.clone(),
                    }
                };
                emitter.emit(None, kind);
            }

            outcomes.push(PreflightCheckOutcome {
                name: name.clone(),
                display_name: prerequisite.display_name.clone(),
                result,
                remediation: prerequisite.remediation.clone(),
                affected_steps,
            });
        }

        let total_duration_ms = start.elapsed().as_millis() as u64;
        let success = failed.is_empty();

        if let Some(emitter) = emitter {
            emitter.emit(
                None,
                WorkflowEventKind::PreflightCompleted {
                    success,
                    total_duration_ms,
                    passed_count: outcomes.len() - failed.len(),
                    failed_count: failed.len(),
                },
            );
        }

        Ok(PreflightResult {
            success,
            check_results: outcomes,
            total_duration_ms,
        })
    }

    /// Run one check under the per-check timeout.
    async fn run_check(&self, prerequisite: &Prerequisite) -> PrerequisiteResult {
        let start = Instant::now();
        match tokio::time::timeout(self.timeout, prerequisite.run_check()).await {
            Ok(result) => result,
            Err(_) => PrerequisiteResult {
                success: false,
                message: format!("Check timed out after {}s", self.timeout.as_secs()),
                duration_ms: start.elapsed().as_millis() as u64,
                details: None,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
