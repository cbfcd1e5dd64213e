//! Derives a workflow's preflight plan.
//!
//! Walks the step tree depth-first, unions step-level `requires` with the
//! component-level requires recorded in the registry, deduplicates, drops
//! names the prerequisite registry does not know (warned, never fatal), and
//! resolves transitive dependencies into a topological execution order.

use std::collections::{BTreeSet, HashMap};

use maverick_types::prerequisite::PreflightPlan;
use maverick_types::workflow::{StepKind, StepRecord, WorkflowFile};

use crate::registry::ComponentRegistry;

use super::{PrerequisiteError, PrerequisiteRegistry};

/// Collects and resolves the prerequisites a workflow needs.
pub struct PrerequisiteCollector;

impl PrerequisiteCollector {
    /// Scan `workflow` and produce the deduplicated, ordered preflight plan.
    ///
    /// Unknown prerequisite names are dropped with a warning. Cycles and
    /// unknown *dependencies* of known prerequisites are errors.
    pub fn collect(
        workflow: &WorkflowFile,
        components: &ComponentRegistry,
        prerequisites: &PrerequisiteRegistry,
    ) -> Result<PreflightPlan, PrerequisiteError> {
        // First-seen order of prerequisite names, and name -> requesting steps.
        let mut order: Vec<String> = Vec::new();
        let mut requested: HashMap<String, BTreeSet<String>> = HashMap::new();

        scan_steps(&workflow.steps, components, "", &mut order, &mut requested);

        if order.is_empty() {
            return Ok(PreflightPlan::empty());
        }

        // Drop names the prerequisite registry does not know.
        let known: Vec<String> = order
            .iter()
            .filter(|name| {
                let is_known = prerequisites.has(name);
                if !is_known {
                    tracing::warn!(
                        prerequisite = name.as_str(),
                        "unknown prerequisite referenced by workflow; skipping"
                    );
                }
                is_known
            })
            .cloned()
            .collect();

        if known.is_empty() {
            return Ok(PreflightPlan::empty());
        }

        let execution_order = prerequisites.get_all_dependencies(&known)?;

        let mut step_requirements: HashMap<String, Vec<String>> = requested
            .iter()
            .filter(|(name, _)| prerequisites.has(name))
            .map(|(name, steps)| (name.clone(), steps.iter().cloned().collect()))
            .collect();

        // Transitive-only dependencies appear in the order with no
        // requesting steps.
        for name in &execution_order {
            step_requirements.entry(name.clone()).or_default();
        }

        Ok(PreflightPlan {
            prerequisites: known,
            step_requirements,
            execution_order,
        })
    }
}

/// Recursively accumulate prerequisites from a step list.
fn scan_steps(
    steps: &[StepRecord],
    components: &ComponentRegistry,
    prefix: &str,
    order: &mut Vec<String>,
    requested: &mut HashMap<String, BTreeSet<String>>,
) {
    for step in steps {
        let step_path = if prefix.is_empty() {
            step.name.clone()
        } else {
            format!("{prefix}{}", step.name)
        };

        for name in &step.requires {
            record(name, &step_path, order, requested);
        }
        for name in component_requires(step, components) {
            record(&name, &step_path, order, requested);
        }

        match &step.kind {
            // Loop bodies are iteration-independent for preflight purposes;
            // the first iteration's path stands in for all of them.
            StepKind::Loop { steps, .. } => {
                scan_steps(steps, components, &format!("{step_path}/[0]/"), order, requested);
            }
            StepKind::Branch { options } => {
                let nested: Vec<StepRecord> =
                    options.iter().map(|o| o.step.as_ref().clone()).collect();
                scan_steps(&nested, components, &format!("{step_path}/"), order, requested);
            }
            StepKind::Validate {
                on_failure: Some(on_failure),
                ..
            } => {
                scan_steps(
                    std::slice::from_ref(on_failure.as_ref()),
                    components,
                    &format!("{step_path}/"),
                    order,
                    requested,
                );
            }
            _ => {}
        }
    }
}

fn record(
    name: &str,
    step_path: &str,
    order: &mut Vec<String>,
    requested: &mut HashMap<String, BTreeSet<String>>,
) {
    if !requested.contains_key(name) {
        order.push(name.to_string());
    }
    requested
        .entry(name.to_string())
        .or_default()
        .insert(step_path.to_string());
}

/// Component-level requires for a step, read from the registry.
///
/// Only actions, agents, and generators carry component prerequisites;
/// validate, checkpoint, branch, loop, and subworkflow steps contribute
/// none of their own.
fn component_requires(step: &StepRecord, components: &ComponentRegistry) -> Vec<String> {
    match &step.kind {
        StepKind::Python { action, .. } => components
            .actions
            .get_requires(action)
            .map(|r| r.to_vec())
            .unwrap_or_default(),
        StepKind::Agent { agent, .. } => components
            .agents
            .get_requires(agent)
            .map(|r| r.to_vec())
            .unwrap_or_default(),
        StepKind::Generate { generator, .. } => components
            .generators
            .get_requires(generator)
            .map(|r| r.to_vec())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prerequisites::Prerequisite;
    use crate::registry::BoxAction;
    use maverick_types::prerequisite::PrerequisiteResult;
    use maverick_types::workflow::BranchOptionRecord;
    use serde_json::json;

    fn prereq_registry(entries: &[(&str, &[&str])]) -> PrerequisiteRegistry {
        let mut registry = PrerequisiteRegistry::new();
        for (name, deps) in entries {
            registry
                .register(
                    Prerequisite::new(*name, name.to_uppercase(), || async {
                        PrerequisiteResult::ok("ok")
                    })
                    .with_dependencies(deps.iter().copied()),
                )
                .unwrap();
        }
        registry
    }

    fn python_step(name: &str, action: &str, requires: &[&str]) -> StepRecord {
        StepRecord {
            name: name.to_string(),
            requires: requires.iter().map(|s| s.to_string()).collect(),
            when: None,
            kind: StepKind::Python {
                action: action.to_string(),
                kwargs: serde_json::Map::new(),
            },
        }
    }

    fn workflow(steps: Vec<StepRecord>) -> WorkflowFile {
        WorkflowFile {
            version: "1.0".to_string(),
            name: "test".to_string(),
            description: None,
            inputs: Default::default(),
            steps,
        }
    }

    fn noop() -> BoxAction {
        BoxAction::from_fn(|_| async { Ok(json!(null)) })
    }

    #[test]
    fn unions_step_and_component_requires() {
        let mut components = ComponentRegistry::new();
        components
            .actions
            .register_with_requires("commit", noop(), vec!["git".to_string()])
            .unwrap();
        let prereqs = prereq_registry(&[("git", &[]), ("gh", &[])]);

        let wf = workflow(vec![python_step("save", "commit", &["gh"])]);
        let plan = PrerequisiteCollector::collect(&wf, &components, &prereqs).unwrap();

        assert_eq!(plan.prerequisites, vec!["gh", "git"]);
        assert_eq!(plan.step_requirements["gh"], vec!["save"]);
        assert_eq!(plan.step_requirements["git"], vec!["save"]);
    }

    #[test]
    fn deduplicates_across_steps() {
        let components = ComponentRegistry::new();
        let prereqs = prereq_registry(&[("git", &[])]);

        let wf = workflow(vec![
            python_step("a", "x", &["git"]),
            python_step("b", "y", &["git"]),
        ]);
        let plan = PrerequisiteCollector::collect(&wf, &components, &prereqs).unwrap();

        assert_eq!(plan.prerequisites, vec!["git"]);
        assert_eq!(plan.step_requirements["git"], vec!["a", "b"]);
        assert_eq!(plan.execution_order, vec!["git"]);
    }

    #[test]
    fn unknown_prerequisites_dropped_with_warning() {
        let components = ComponentRegistry::new();
        let prereqs = prereq_registry(&[("git", &[])]);

        let wf = workflow(vec![python_step("a", "x", &["git", "nonexistent"])]);
        let plan = PrerequisiteCollector::collect(&wf, &components, &prereqs).unwrap();

        assert_eq!(plan.prerequisites, vec!["git"]);
        assert!(!plan.step_requirements.contains_key("nonexistent"));
    }

    #[test]
    fn all_unknown_yields_empty_plan() {
        let components = ComponentRegistry::new();
        let prereqs = prereq_registry(&[]);
        let wf = workflow(vec![python_step("a", "x", &["ghost"])]);
        let plan = PrerequisiteCollector::collect(&wf, &components, &prereqs).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn transitive_dependencies_get_empty_step_lists() {
        let components = ComponentRegistry::new();
        let prereqs = prereq_registry(&[("git", &[]), ("git_identity", &["git"])]);

        let wf = workflow(vec![python_step("commit", "x", &["git_identity"])]);
        let plan = PrerequisiteCollector::collect(&wf, &components, &prereqs).unwrap();

        assert_eq!(plan.execution_order, vec!["git", "git_identity"]);
        assert_eq!(plan.step_requirements["git_identity"], vec!["commit"]);
        assert!(plan.step_requirements["git"].is_empty());
    }

    #[test]
    fn nested_steps_use_path_qualified_names() {
        let components = ComponentRegistry::new();
        let prereqs = prereq_registry(&[("git", &[]), ("gh", &[])]);

        let loop_step = StepRecord {
            name: "each".to_string(),
            requires: vec![],
            when: None,
            kind: StepKind::Loop {
                over: Some("${{ inputs.items }}".to_string()),
                until: None,
                max_iterations: 10,
                parallel: false,
                max_concurrent: None,
                continue_on_error: false,
                steps: vec![python_step("body", "x", &["git"])],
            },
        };
        let branch_step = StepRecord {
            name: "route".to_string(),
            requires: vec![],
            when: None,
            kind: StepKind::Branch {
                options: vec![BranchOptionRecord {
                    when: "${{ true }}".to_string(),
                    step: Box::new(python_step("path_a", "x", &["gh"])),
                }],
            },
        };

        let wf = workflow(vec![loop_step, branch_step]);
        let plan = PrerequisiteCollector::collect(&wf, &components, &prereqs).unwrap();

        assert_eq!(plan.step_requirements["git"], vec!["each/[0]/body"]);
        assert_eq!(plan.step_requirements["gh"], vec!["route/path_a"]);
    }

    #[test]
    fn cycle_in_dependencies_is_error() {
        let components = ComponentRegistry::new();
        let prereqs = prereq_registry(&[("a", &["b"]), ("b", &["a"])]);
        let wf = workflow(vec![python_step("s", "x", &["a"])]);
        let err = PrerequisiteCollector::collect(&wf, &components, &prereqs).unwrap_err();
        assert!(matches!(err, PrerequisiteError::CircularDependency(_)));
    }
}
