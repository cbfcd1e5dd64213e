//! Per-run configuration.
//!
//! `RunConfig` carries everything the executor reads at runtime that is not
//! part of the workflow file: named validation stage sets, the default
//! stages, the optional validation runner, the prerequisite check timeout,
//! and the engine caps. It is plain data handed to the executor at
//! construction; there are no process-wide globals besides the host's
//! logging setup.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use maverick_types::result::StageResult;

use crate::prerequisites::DEFAULT_CHECK_TIMEOUT;

/// Maximum sub-workflow nesting depth.
pub const DEFAULT_MAX_SUBWORKFLOW_DEPTH: u32 = 5;

// ---------------------------------------------------------------------------
// ValidationRunner
// ---------------------------------------------------------------------------

/// External collaborator that runs one named validation stage (e.g. "lint",
/// "test") as a subprocess, streams its output, and reports pass/fail.
///
/// The engine only orchestrates: it emits stage events around each call and
/// aggregates the results. Uses native async fn in traits (RPITIT); the
/// `BoxValidationRunner` wrapper provides dynamic dispatch.
pub trait ValidationRunner: Send + Sync {
    fn run_stage(&self, stage: &str) -> impl Future<Output = anyhow::Result<StageResult>> + Send;
}

trait ValidationRunnerDyn: Send + Sync {
    fn run_stage_boxed<'a>(
        &'a self,
        stage: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<StageResult>> + Send + 'a>>;
}

impl<T: ValidationRunner> ValidationRunnerDyn for T {
    fn run_stage_boxed<'a>(
        &'a self,
        stage: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<StageResult>> + Send + 'a>> {
        Box::pin(self.run_stage(stage))
    }
}

/// Type-erased validation runner.
pub struct BoxValidationRunner {
    inner: Box<dyn ValidationRunnerDyn>,
}

impl BoxValidationRunner {
    pub fn new<T: ValidationRunner + 'static>(runner: T) -> Self {
        Self {
            inner: Box::new(runner),
        }
    }

    pub async fn run_stage(&self, stage: &str) -> anyhow::Result<StageResult> {
        self.inner.run_stage_boxed(stage).await
    }
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

/// Configuration for workflow execution.
pub struct RunConfig {
    /// Default validation stages when a validate step names none.
    pub validation_stages: Vec<String>,
    /// Named stage sets a validate step can reference by key.
    pub stage_sets: HashMap<String, Vec<String>>,
    /// Stage runner. When absent, validate steps pass trivially.
    pub validation_runner: Option<BoxValidationRunner>,
    /// Per-prerequisite-check timeout.
    pub check_timeout: Duration,
    /// Sub-workflow nesting cap.
    pub max_subworkflow_depth: u32,
    /// Validate component references before execution (on by default).
    pub semantic_validation: bool,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validation_stages(
        mut self,
        stages: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.validation_stages = stages.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stage_set(
        mut self,
        key: impl Into<String>,
        stages: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.stage_sets
            .insert(key.into(), stages.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_validation_runner<T: ValidationRunner + 'static>(mut self, runner: T) -> Self {
        self.validation_runner = Some(BoxValidationRunner::new(runner));
        self
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    pub fn without_semantic_validation(mut self) -> Self {
        self.semantic_validation = false;
        self
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            validation_stages: Vec::new(),
            stage_sets: HashMap::new(),
            validation_runner: None,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            max_subworkflow_depth: DEFAULT_MAX_SUBWORKFLOW_DEPTH,
            semantic_validation: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysPass;

    impl ValidationRunner for AlwaysPass {
        async fn run_stage(&self, stage: &str) -> anyhow::Result<StageResult> {
            Ok(StageResult {
                name: stage.to_string(),
                passed: true,
                output: String::new(),
                error: None,
            })
        }
    }

    #[test]
    fn defaults() {
        let config = RunConfig::default();
        assert!(config.validation_stages.is_empty());
        assert!(config.validation_runner.is_none());
        assert_eq!(config.check_timeout, DEFAULT_CHECK_TIMEOUT);
        assert_eq!(config.max_subworkflow_depth, DEFAULT_MAX_SUBWORKFLOW_DEPTH);
        assert!(config.semantic_validation);
    }

    #[test]
    fn builder_methods() {
        let config = RunConfig::new()
            .with_validation_stages(["format", "lint", "test"])
            .with_stage_set("quick", ["lint"])
            .with_validation_runner(AlwaysPass)
            .without_semantic_validation();
        assert_eq!(config.validation_stages.len(), 3);
        assert_eq!(config.stage_sets["quick"], vec!["lint"]);
        assert!(config.validation_runner.is_some());
        assert!(!config.semantic_validation);
    }

    #[tokio::test]
    async fn boxed_runner_delegates() {
        let runner = BoxValidationRunner::new(AlwaysPass);
        let result = runner.run_stage("lint").await.unwrap();
        assert_eq!(result.name, "lint");
        assert!(result.passed);
    }
}
