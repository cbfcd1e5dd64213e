//! Prerequisite checks: definitions, registry, workflow collector, and the
//! ordered runner.
//!
//! A prerequisite is a named async check (e.g. "git CLI present", "gh
//! authenticated") with declared dependencies on other checks, a relative
//! cost, and user-facing remediation text. Workflow steps and registered
//! components declare the prerequisite names they need; before any step
//! runs, the collector derives the deduplicated, topologically ordered
//! check set and the runner executes it with dependent-skip semantics.

mod collector;
mod registry;
mod runner;

pub use collector::PrerequisiteCollector;
pub use registry::PrerequisiteRegistry;
pub use runner::{PrerequisiteRunner, DEFAULT_CHECK_TIMEOUT};

use futures_util::future::BoxFuture;
use maverick_types::prerequisite::PrerequisiteResult;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from prerequisite registration and dependency resolution.
#[derive(Debug, Clone, Error)]
pub enum PrerequisiteError {
    #[error("prerequisite '{0}' is already registered")]
    Duplicate(String),

    #[error("unknown prerequisite '{name}'; available: {}", format_available(available))]
    Unknown { name: String, available: Vec<String> },

    #[error("circular dependency detected involving '{0}'")]
    CircularDependency(String),
}

fn format_available(names: &[String]) -> String {
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join(", ")
    }
}

// ---------------------------------------------------------------------------
// Prerequisite definition
// ---------------------------------------------------------------------------

/// The boxed async nullary check function.
pub type CheckFn = Box<dyn Fn() -> BoxFuture<'static, PrerequisiteResult> + Send + Sync>;

/// A single prerequisite check definition.
pub struct Prerequisite {
    /// Unique identifier (e.g. "git_identity").
    pub name: String,
    /// Human-readable name for UI display (e.g. "Git Identity").
    pub display_name: String,
    /// Names of prerequisites that must pass before this one runs.
    pub dependencies: Vec<String>,
    /// Relative cost (1=cheap/local, 2=moderate, 3=expensive/network).
    pub cost: u8,
    /// User-facing instructions for fixing a failed check.
    pub remediation: String,
    check_fn: CheckFn,
}

impl Prerequisite {
    /// Define a prerequisite from an async closure.
    ///
    /// ```
    /// use maverick_core::prerequisites::Prerequisite;
    /// use maverick_types::prerequisite::PrerequisiteResult;
    ///
    /// let prereq = Prerequisite::new("git", "Git CLI", || async {
    ///     PrerequisiteResult::ok("git found")
    /// })
    /// .with_remediation("Install Git from https://git-scm.com/");
    /// ```
    pub fn new<F, Fut>(
        name: impl Into<String>,
        display_name: impl Into<String>,
        check: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = PrerequisiteResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            dependencies: Vec::new(),
            cost: 1,
            remediation: String::new(),
            check_fn: Box::new(move || Box::pin(check())),
        }
    }

    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cost(mut self, cost: u8) -> Self {
        self.cost = cost.clamp(1, 3);
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = remediation.into();
        self
    }

    /// Start the check. Invoked at most once per run by the runner.
    pub(crate) fn run_check(&self) -> BoxFuture<'static, PrerequisiteResult> {
        (self.check_fn)()
    }
}

impl std::fmt::Debug for Prerequisite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prerequisite")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("dependencies", &self.dependencies)
            .field("cost", &self.cost)
            .finish_non_exhaustive()
    }
}
