//! Workflow file IR for Maverick.
//!
//! Defines the canonical representation of a parsed workflow file: input
//! declarations, the eight-kind step union, and branch/loop composites. YAML
//! and JSON workflow files both deserialize into `WorkflowFile`; the engine
//! never looks at the raw document again after parsing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Workflow file (canonical IR)
// ---------------------------------------------------------------------------

/// A parsed workflow definition.
///
/// Immutable after parsing. Step names are unique at the top level; composite
/// steps namespace their children, so uniqueness is per parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowFile {
    /// Schema version. Only "1.0" is accepted.
    pub version: String,
    /// Lowercase workflow identifier.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared inputs, keyed by input name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub inputs: HashMap<String, InputDef>,
    /// Ordered step sequence.
    pub steps: Vec<StepRecord>,
}

/// Declaration of a single workflow input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDef {
    /// Value type expected for this input.
    #[serde(rename = "type")]
    pub input_type: InputType,
    /// Whether the caller must supply this input.
    #[serde(default)]
    pub required: bool,
    /// Default applied when the caller omits the input. Invalid on required
    /// inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Allowed values for `enum` inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Value>>,
}

/// The value type of a workflow input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    String,
    Integer,
    Boolean,
    Number,
    Array,
    Object,
    Enum,
}

// ---------------------------------------------------------------------------
// Step records
// ---------------------------------------------------------------------------

/// A single step declaration.
///
/// Every step carries a name (unique within its parent), an optional list of
/// prerequisite names, and an optional `when` guard expression. The
/// kind-specific payload is flattened into the same mapping, matching the
/// workflow file layout:
///
/// ```yaml
/// - name: load
///   type: python
///   action: load_files
///   kwargs:
///     path: ${{ inputs.path }}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step identifier, unique among siblings.
    pub name: String,
    /// Prerequisite names this step requires beyond its component's.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    /// Guard expression. A falsy result skips the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    /// Kind discriminator plus kind-specific fields.
    #[serde(flatten)]
    pub kind: StepKind,
}

/// The tagged union of step kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Invoke a registered action with keyword-style arguments.
    Python {
        action: String,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        kwargs: serde_json::Map<String, Value>,
    },
    /// Invoke a registered agent.
    Agent {
        agent: String,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        inputs: serde_json::Map<String, Value>,
        /// Named context builder that assembles the agent's context from
        /// workflow inputs and prior step outputs.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context_builder: Option<String>,
    },
    /// Invoke a registered generator, recording the produced text.
    Generate {
        generator: String,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        inputs: serde_json::Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context_builder: Option<String>,
    },
    /// Run validation stages with retry and optional recovery step.
    Validate {
        /// Explicit stage list, a named stage-set key, or absent for the
        /// configured default stages.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stages: Option<StagesSpec>,
        /// Additional attempts after the first failure.
        #[serde(default)]
        retry: u32,
        /// Step executed before each retry (e.g. an auto-formatter).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_failure: Option<Box<StepRecord>>,
    },
    /// Invoke a registered sub-workflow with forwarded inputs.
    Subworkflow {
        workflow: String,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        inputs: serde_json::Map<String, Value>,
    },
    /// First-match conditional dispatch over ordered options.
    Branch { options: Vec<BranchOptionRecord> },
    /// Bounded iteration over a collection or until a predicate holds.
    Loop {
        /// Expression producing the collection to iterate (mutually
        /// exclusive with `until`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        over: Option<String>,
        /// Termination predicate checked after each iteration (mutually
        /// exclusive with `over`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        until: Option<String>,
        #[serde(default = "default_max_iterations")]
        max_iterations: u32,
        /// Run iterations concurrently. Only valid with `over`.
        #[serde(default)]
        parallel: bool,
        /// Concurrency bound for parallel loops. Defaults to the iteration
        /// count.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_concurrent: Option<usize>,
        /// Record failing iterations and keep going instead of aborting.
        #[serde(default)]
        continue_on_error: bool,
        /// Body steps, executed in order each iteration.
        steps: Vec<StepRecord>,
    },
    /// Write a durable snapshot of the run state.
    Checkpoint { checkpoint_id: String },
}

/// One option of a branch step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchOptionRecord {
    /// Predicate expression, evaluated in declaration order.
    pub when: String,
    /// Step executed when the predicate is the first truthy one.
    pub step: Box<StepRecord>,
}

/// Stage selection for a validate step: an explicit list or a named
/// stage-set key looked up on the run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StagesSpec {
    List(Vec<String>),
    Key(String),
}

fn default_max_iterations() -> u32 {
    30
}

/// Default iteration cap for loops.
pub const DEFAULT_MAX_ITERATIONS: u32 = 30;

// ---------------------------------------------------------------------------
// Step type discriminator
// ---------------------------------------------------------------------------

/// The kind of a step, as a flat discriminator for results and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Python,
    Agent,
    Generate,
    Validate,
    Subworkflow,
    Branch,
    Loop,
    Checkpoint,
}

impl StepType {
    /// Wire-format name of this step type.
    pub fn as_str(self) -> &'static str {
        match self {
            StepType::Python => "python",
            StepType::Agent => "agent",
            StepType::Generate => "generate",
            StepType::Validate => "validate",
            StepType::Subworkflow => "subworkflow",
            StepType::Branch => "branch",
            StepType::Loop => "loop",
            StepType::Checkpoint => "checkpoint",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StepRecord {
    /// Flat discriminator for this step's kind.
    pub fn step_type(&self) -> StepType {
        match &self.kind {
            StepKind::Python { .. } => StepType::Python,
            StepKind::Agent { .. } => StepType::Agent,
            StepKind::Generate { .. } => StepType::Generate,
            StepKind::Validate { .. } => StepType::Validate,
            StepKind::Subworkflow { .. } => StepType::Subworkflow,
            StepKind::Branch { .. } => StepType::Branch,
            StepKind::Loop { .. } => StepType::Loop,
            StepKind::Checkpoint { .. } => StepType::Checkpoint,
        }
    }

    /// Directly nested steps: loop bodies, branch option steps, and a
    /// validate step's recovery step.
    pub fn nested_steps(&self) -> Vec<&StepRecord> {
        match &self.kind {
            StepKind::Loop { steps, .. } => steps.iter().collect(),
            StepKind::Branch { options } => {
                options.iter().map(|option| option.step.as_ref()).collect()
            }
            StepKind::Validate {
                on_failure: Some(step),
                ..
            } => vec![step.as_ref()],
            _ => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_minimal_workflow_yaml() {
        let yaml = r#"
version: "1.0"
name: smoke-test
steps:
  - name: load
    type: python
    action: load_files
    kwargs:
      path: ${{ inputs.path }}
"#;
        let wf: WorkflowFile = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(wf.version, "1.0");
        assert_eq!(wf.name, "smoke-test");
        assert_eq!(wf.steps.len(), 1);
        assert_eq!(wf.steps[0].step_type(), StepType::Python);
        match &wf.steps[0].kind {
            StepKind::Python { action, kwargs } => {
                assert_eq!(action, "load_files");
                assert_eq!(kwargs["path"], json!("${{ inputs.path }}"));
            }
            other => panic!("expected python step, got {other:?}"),
        }
    }

    #[test]
    fn parse_all_step_kinds() {
        let yaml = r#"
version: "1.0"
name: kinds
inputs:
  mode:
    type: enum
    required: true
    choices: [fast, slow]
steps:
  - name: act
    type: python
    action: do_thing
  - name: summarize
    type: agent
    agent: summarizer
    context_builder: build_summary_ctx
    inputs:
      hint: brief
  - name: commit_msg
    type: generate
    generator: commit_message
  - name: check
    type: validate
    stages: [lint, test]
    retry: 1
    on_failure:
      name: auto_fix
      type: python
      action: run_formatter
  - name: publish
    type: subworkflow
    workflow: publish-flow
    inputs:
      channel: main
  - name: route
    type: branch
    options:
      - when: ${{ inputs.mode == 'fast' }}
        step:
          name: fast_path
          type: python
          action: do_thing
  - name: each
    type: loop
    over: ${{ inputs.items }}
    max_iterations: 5
    parallel: true
    max_concurrent: 2
    steps:
      - name: body
        type: python
        action: do_thing
  - name: save
    type: checkpoint
    checkpoint_id: after_each
"#;
        let wf: WorkflowFile = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(wf.steps.len(), 8);
        let types: Vec<StepType> = wf.steps.iter().map(|s| s.step_type()).collect();
        assert_eq!(
            types,
            vec![
                StepType::Python,
                StepType::Agent,
                StepType::Generate,
                StepType::Validate,
                StepType::Subworkflow,
                StepType::Branch,
                StepType::Loop,
                StepType::Checkpoint,
            ]
        );
        assert_eq!(wf.inputs["mode"].input_type, InputType::Enum);
        assert_eq!(
            wf.inputs["mode"].choices.as_ref().unwrap(),
            &vec![json!("fast"), json!("slow")]
        );
    }

    #[test]
    fn validate_stages_spec_forms() {
        let list: StepRecord = serde_yaml_ng::from_str(
            "name: v\ntype: validate\nstages: [lint, test]\n",
        )
        .unwrap();
        match &list.kind {
            StepKind::Validate {
                stages: Some(StagesSpec::List(stages)),
                retry,
                ..
            } => {
                assert_eq!(stages, &vec!["lint".to_string(), "test".to_string()]);
                assert_eq!(*retry, 0);
            }
            other => panic!("expected explicit stage list, got {other:?}"),
        }

        let key: StepRecord =
            serde_yaml_ng::from_str("name: v\ntype: validate\nstages: quick_stages\n").unwrap();
        assert!(matches!(
            key.kind,
            StepKind::Validate {
                stages: Some(StagesSpec::Key(_)),
                ..
            }
        ));

        let none: StepRecord = serde_yaml_ng::from_str("name: v\ntype: validate\n").unwrap();
        assert!(matches!(
            none.kind,
            StepKind::Validate { stages: None, .. }
        ));
    }

    #[test]
    fn loop_defaults() {
        let step: StepRecord = serde_yaml_ng::from_str(
            r#"
name: l
type: loop
until: ${{ steps.check.output.done }}
steps:
  - name: check
    type: python
    action: poll
"#,
        )
        .unwrap();
        match step.kind {
            StepKind::Loop {
                over,
                until,
                max_iterations,
                parallel,
                max_concurrent,
                continue_on_error,
                ..
            } => {
                assert!(over.is_none());
                assert!(until.is_some());
                assert_eq!(max_iterations, DEFAULT_MAX_ITERATIONS);
                assert!(!parallel);
                assert!(max_concurrent.is_none());
                assert!(!continue_on_error);
            }
            other => panic!("expected loop, got {other:?}"),
        }
    }

    #[test]
    fn step_record_json_roundtrip() {
        let step = StepRecord {
            name: "route".to_string(),
            requires: vec!["git".to_string()],
            when: Some("${{ inputs.enabled }}".to_string()),
            kind: StepKind::Branch {
                options: vec![BranchOptionRecord {
                    when: "${{ inputs.kind == 'a' }}".to_string(),
                    step: Box::new(StepRecord {
                        name: "path_a".to_string(),
                        requires: vec![],
                        when: None,
                        kind: StepKind::Python {
                            action: "action_a".to_string(),
                            kwargs: serde_json::Map::new(),
                        },
                    }),
                }],
            },
        };
        let text = serde_json::to_string(&step).unwrap();
        assert!(text.contains("\"type\":\"branch\""));
        let parsed: StepRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.name, "route");
        assert_eq!(parsed.requires, vec!["git"]);
        assert_eq!(parsed.nested_steps().len(), 1);
        assert_eq!(parsed.nested_steps()[0].name, "path_a");
    }

    #[test]
    fn nested_steps_for_validate_on_failure() {
        let step: StepRecord = serde_yaml_ng::from_str(
            r#"
name: v
type: validate
stages: [lint]
on_failure:
  name: fix
  type: python
  action: run_formatter
"#,
        )
        .unwrap();
        let nested = step.nested_steps();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].name, "fix");
    }

    #[test]
    fn required_input_parses_without_default() {
        let yaml = r#"
type: string
required: true
description: target path
"#;
        let def: InputDef = serde_yaml_ng::from_str(yaml).unwrap();
        assert!(def.required);
        assert!(def.default.is_none());
        assert_eq!(def.input_type, InputType::String);
    }
}
