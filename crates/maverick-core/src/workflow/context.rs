//! Workflow execution context.
//!
//! `WorkflowContext` is the mutable state that flows through a run: the
//! immutable validated inputs, an ordered map of step results keyed by step
//! path, and the iteration-variable stack for loop bodies. It builds the
//! immutable [`ExprScope`] expressions evaluate against.

use maverick_types::result::StepResult;
use serde_json::{Map, Value};

use crate::expression::ExprScope;

/// Loop variables for one nesting level.
#[derive(Debug, Clone)]
pub struct IterationFrame {
    /// Current element of the `over` collection (`null` for `until` loops).
    pub item: Value,
    /// Zero-based iteration index.
    pub index: usize,
}

/// Mutable per-run state.
///
/// `results` is append-only: a path is written once, when its step
/// completes. Composite steps namespace their children
/// (`each/[0]/body`), so distinct dynamic executions never collide.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    inputs: Map<String, Value>,
    results: std::collections::HashMap<String, StepResult>,
    result_order: Vec<String>,
    iteration_stack: Vec<IterationFrame>,
    env: Value,
}

impl WorkflowContext {
    /// Create a context over validated inputs. The process environment is
    /// snapshotted once here; expressions see a stable `env`.
    pub fn new(inputs: Map<String, Value>) -> Self {
        let env = Value::Object(
            std::env::vars()
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
        );
        Self {
            inputs,
            results: std::collections::HashMap::new(),
            result_order: Vec::new(),
            iteration_stack: Vec::new(),
            env,
        }
    }

    pub fn inputs(&self) -> &Map<String, Value> {
        &self.inputs
    }

    // -----------------------------------------------------------------------
    // Results
    // -----------------------------------------------------------------------

    /// Record a step result under its path.
    ///
    /// Paths are written once per run; a duplicate write (which would
    /// indicate an executor bug) is logged and keeps the first record.
    pub fn record(&mut self, result: StepResult) {
        if self.results.contains_key(&result.name) {
            tracing::warn!(path = result.name.as_str(), "duplicate step result ignored");
            return;
        }
        self.result_order.push(result.name.clone());
        self.results.insert(result.name.clone(), result);
    }

    pub fn has_result(&self, path: &str) -> bool {
        self.results.contains_key(path)
    }

    pub fn get_result(&self, path: &str) -> Option<&StepResult> {
        self.results.get(path)
    }

    /// All recorded results in execution order.
    pub fn results_in_order(&self) -> Vec<StepResult> {
        self.result_order
            .iter()
            .filter_map(|path| self.results.get(path))
            .cloned()
            .collect()
    }

    /// Number of recorded results (used to diff forked contexts).
    pub fn result_count(&self) -> usize {
        self.result_order.len()
    }

    /// Results recorded after the first `baseline` entries, in order.
    pub fn results_since(&self, baseline: usize) -> Vec<StepResult> {
        self.result_order[baseline.min(self.result_order.len())..]
            .iter()
            .filter_map(|path| self.results.get(path))
            .cloned()
            .collect()
    }

    /// Output of the most recently recorded step, `null` if none.
    pub fn last_output(&self) -> Value {
        self.result_order
            .last()
            .and_then(|path| self.results.get(path))
            .map(|result| result.output.clone())
            .unwrap_or(Value::Null)
    }

    // -----------------------------------------------------------------------
    // Iteration stack
    // -----------------------------------------------------------------------

    pub fn push_iteration(&mut self, item: Value, index: usize) {
        self.iteration_stack.push(IterationFrame { item, index });
    }

    pub fn pop_iteration(&mut self) {
        self.iteration_stack.pop();
    }

    /// Clone this context for one parallel loop iteration, with the
    /// iteration frame pushed. The clone's new results are merged back into
    /// the parent in iteration order by the loop handler.
    pub fn fork_for_iteration(&self, item: Value, index: usize) -> Self {
        let mut fork = self.clone();
        fork.push_iteration(item, index);
        fork
    }

    // -----------------------------------------------------------------------
    // Expression scope
    // -----------------------------------------------------------------------

    /// Build the immutable scope for expression evaluation.
    ///
    /// Step results are exposed by their final path segment as
    /// `{"output": ..., "success": ...}`; when the same segment was recorded
    /// more than once (loop iterations), the most recent record wins, which
    /// is what `until` conditions read.
    pub fn scope(&self) -> ExprScope {
        let mut steps = Map::new();
        for path in &self.result_order {
            if let Some(result) = self.results.get(path) {
                let name = path.rsplit('/').next().unwrap_or(path);
                steps.insert(
                    name.to_string(),
                    serde_json::json!({
                        "output": result.output,
                        "success": result.success,
                    }),
                );
            }
        }

        let frame = self.iteration_stack.last();
        ExprScope {
            inputs: Value::Object(self.inputs.clone()),
            steps: Value::Object(steps),
            item: frame.map(|f| f.item.clone()),
            index: frame.map(|f| f.index as u64),
            env: self.env.clone(),
        }
    }

    /// Step outputs keyed by final path segment, as context builders expect:
    /// `{step_name: {"output": ...}}`.
    pub fn step_outputs_by_name(&self) -> Value {
        let mut outputs = Map::new();
        for path in &self.result_order {
            if let Some(result) = self.results.get(path) {
                let name = path.rsplit('/').next().unwrap_or(path);
                outputs.insert(
                    name.to_string(),
                    serde_json::json!({"output": result.output}),
                );
            }
        }
        Value::Object(outputs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression;
    use maverick_types::workflow::StepType;
    use serde_json::json;

    fn ctx() -> WorkflowContext {
        let mut inputs = Map::new();
        inputs.insert("path".to_string(), json!("/tmp/x"));
        WorkflowContext::new(inputs)
    }

    #[test]
    fn record_and_order() {
        let mut ctx = ctx();
        ctx.record(StepResult::succeeded("a", StepType::Python, json!(1), 1));
        ctx.record(StepResult::succeeded("b", StepType::Python, json!(2), 1));

        assert!(ctx.has_result("a"));
        assert!(!ctx.has_result("c"));
        let ordered = ctx.results_in_order();
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].name, "a");
        assert_eq!(ordered[1].name, "b");
        assert_eq!(ctx.last_output(), json!(2));
    }

    #[test]
    fn duplicate_record_keeps_first() {
        let mut ctx = ctx();
        ctx.record(StepResult::succeeded("a", StepType::Python, json!(1), 1));
        ctx.record(StepResult::succeeded("a", StepType::Python, json!(99), 1));
        assert_eq!(ctx.get_result("a").unwrap().output, json!(1));
        assert_eq!(ctx.result_count(), 1);
    }

    #[test]
    fn scope_exposes_steps_by_final_segment() {
        let mut ctx = ctx();
        ctx.record(StepResult::succeeded(
            "each/[0]/check",
            StepType::Python,
            json!({"done": false}),
            1,
        ));
        ctx.record(StepResult::succeeded(
            "each/[1]/check",
            StepType::Python,
            json!({"done": true}),
            1,
        ));

        let scope = ctx.scope();
        // The latest iteration's record shadows the earlier one.
        let done = expression::evaluate("steps.check.output.done", &scope).unwrap();
        assert_eq!(done, json!(true));
        assert_eq!(
            expression::evaluate("steps.check.success", &scope).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn scope_inputs_and_missing_step_error() {
        let ctx = ctx();
        let scope = ctx.scope();
        assert_eq!(
            expression::evaluate("inputs.path", &scope).unwrap(),
            json!("/tmp/x")
        );
        assert!(expression::evaluate("steps.ghost.output", &scope).is_err());
    }

    #[test]
    fn iteration_frames_scope_item_and_index() {
        let mut ctx = ctx();
        ctx.push_iteration(json!("first"), 0);
        ctx.push_iteration(json!("inner"), 3);

        let scope = ctx.scope();
        assert_eq!(expression::evaluate("item", &scope).unwrap(), json!("inner"));
        assert_eq!(expression::evaluate("index", &scope).unwrap(), json!(3));

        ctx.pop_iteration();
        let scope = ctx.scope();
        assert_eq!(expression::evaluate("item", &scope).unwrap(), json!("first"));

        ctx.pop_iteration();
        assert!(expression::evaluate("item", &ctx.scope()).is_err());
    }

    #[test]
    fn fork_isolates_results() {
        let mut parent = ctx();
        parent.record(StepResult::succeeded("before", StepType::Python, json!(0), 1));

        let baseline = parent.result_count();
        let mut fork = parent.fork_for_iteration(json!(7), 0);
        fork.record(StepResult::succeeded("each/[0]/body", StepType::Python, json!(7), 1));

        assert!(!parent.has_result("each/[0]/body"));
        let delta = fork.results_since(baseline);
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].name, "each/[0]/body");
    }

    #[test]
    fn step_outputs_by_name_shape() {
        let mut ctx = ctx();
        ctx.record(StepResult::succeeded(
            "load",
            StepType::Python,
            json!({"files": ["a", "b"]}),
            1,
        ));
        let outputs = ctx.step_outputs_by_name();
        assert_eq!(outputs["load"]["output"]["files"], json!(["a", "b"]));
    }
}
