//! Checkpoint and resume integration tests: snapshot persistence, resume
//! skipping, and input-hash validation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use maverick_core::prerequisites::PrerequisiteRegistry;
use maverick_core::registry::{BoxAction, ComponentRegistry};
use maverick_core::workflow::checkpoint::{CheckpointStore, FileCheckpointStore};
use maverick_core::workflow::{parse_workflow, ExecuteOptions, WorkflowExecutor};
use maverick_types::event::WorkflowEventKind;
use serde_json::{json, Map, Value};

const CHECKPOINT_YAML: &str = r#"
version: "1.0"
name: test-checkpoint
description: Workflow with a mid-run checkpoint
inputs:
  value:
    type: string
    required: true
steps:
  - name: step1
    type: python
    action: mock_action_1
    kwargs:
      input: ${{ inputs.value }}
  - name: checkpoint1
    type: checkpoint
    checkpoint_id: after_step1
  - name: step2
    type: python
    action: mock_action_2
    kwargs:
      input: ${{ steps.step1.output }}
  - name: step3
    type: python
    action: mock_action_3
    kwargs:
      input: ${{ steps.step2.output }}
"#;

/// Registry whose three actions count their invocations.
fn tracked_registry() -> (ComponentRegistry, [Arc<AtomicUsize>; 3]) {
    let counters = [
        Arc::new(AtomicUsize::new(0)),
        Arc::new(AtomicUsize::new(0)),
        Arc::new(AtomicUsize::new(0)),
    ];
    let mut registry = ComponentRegistry::new();
    for (i, counter) in counters.iter().enumerate() {
        let n = i + 1;
        let counter = Arc::clone(counter);
        registry
            .actions
            .register(
                format!("mock_action_{n}"),
                BoxAction::from_fn(move |kwargs| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(json!(format!(
                            "step{n}_result_{}",
                            kwargs["input"].as_str().unwrap_or("")
                        )))
                    }
                }),
            )
            .unwrap();
    }
    (registry, counters)
}

fn value_inputs(value: &str) -> Map<String, Value> {
    let mut inputs = Map::new();
    inputs.insert("value".to_string(), json!(value));
    inputs
}

#[tokio::test]
async fn checkpoint_saves_state() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _) = tracked_registry();
    let executor = WorkflowExecutor::new(registry, PrerequisiteRegistry::new())
        .with_checkpoint_store(FileCheckpointStore::new(dir.path()));

    let workflow = parse_workflow(CHECKPOINT_YAML).unwrap();
    let mut execution = executor.execute(workflow, value_inputs("test")).unwrap();
    let events = execution.drain().await;
    assert!(execution.result().unwrap().success);

    assert!(events.iter().any(|e| matches!(
        &e.kind,
        WorkflowEventKind::CheckpointSaved { checkpoint_id } if checkpoint_id == "after_step1"
    )));

    let store = FileCheckpointStore::new(dir.path());
    let checkpoints = store.list_checkpoints("test-checkpoint").await.unwrap();
    assert!(checkpoints.contains("after_step1"));

    let snapshot = store
        .load("test-checkpoint", "after_step1")
        .await
        .unwrap()
        .expect("snapshot saved");
    assert_eq!(snapshot.workflow_name, "test-checkpoint");
    assert_eq!(snapshot.checkpoint_id, "after_step1");
    let names: Vec<&str> = snapshot.step_results.iter().map(|r| r.name.as_str()).collect();
    assert!(names.contains(&"step1"));
    assert!(!names.contains(&"step2"), "steps after the checkpoint are not in it");
}

#[tokio::test]
async fn resume_skips_steps_before_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, counters) = tracked_registry();
    let executor = WorkflowExecutor::new(registry, PrerequisiteRegistry::new())
        .with_checkpoint_store(FileCheckpointStore::new(dir.path()));
    let workflow = parse_workflow(CHECKPOINT_YAML).unwrap();

    // First run executes everything.
    let result = executor
        .execute(workflow.clone(), value_inputs("test"))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(
        [
            counters[0].load(Ordering::SeqCst),
            counters[1].load(Ordering::SeqCst),
            counters[2].load(Ordering::SeqCst),
        ],
        [1, 1, 1]
    );

    // Resume: step1 must not re-execute, step2/step3 run again.
    let mut execution = executor
        .execute_with_options(
            workflow,
            value_inputs("test"),
            ExecuteOptions {
                resume_from_checkpoint: true,
            },
        )
        .unwrap();
    let events = execution.drain().await;

    assert!(events.iter().any(|e| matches!(
        &e.kind,
        WorkflowEventKind::CheckpointRestored { checkpoint_id, .. } if checkpoint_id == "after_step1"
    )));

    let result = execution.result().unwrap();
    assert!(result.success);
    assert_eq!(counters[0].load(Ordering::SeqCst), 1, "step1 not recomputed");
    assert_eq!(counters[1].load(Ordering::SeqCst), 2);
    assert_eq!(counters[2].load(Ordering::SeqCst), 2);

    // Restored results are taken verbatim; the remaining steps extend them.
    let names: Vec<&str> = result.step_results.iter().map(|r| r.name.as_str()).collect();
    for name in ["step1", "step2", "step3"] {
        assert!(names.contains(&name), "missing {name} in {names:?}");
    }
    assert_eq!(result.final_output, json!("step3_result_step2_result_step1_result_test"));
}

#[tokio::test]
async fn resume_and_fresh_run_produce_same_result_keys() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _) = tracked_registry();
    let executor = WorkflowExecutor::new(registry, PrerequisiteRegistry::new())
        .with_checkpoint_store(FileCheckpointStore::new(dir.path()));
    let workflow = parse_workflow(CHECKPOINT_YAML).unwrap();

    let fresh = executor
        .execute(workflow.clone(), value_inputs("test"))
        .unwrap()
        .wait()
        .await
        .unwrap();
    let resumed = executor
        .execute_with_options(
            workflow,
            value_inputs("test"),
            ExecuteOptions {
                resume_from_checkpoint: true,
            },
        )
        .unwrap()
        .wait()
        .await
        .unwrap();

    let fresh_names: Vec<&str> = fresh.step_results.iter().map(|r| r.name.as_str()).collect();
    let resumed_names: Vec<&str> =
        resumed.step_results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(fresh_names, resumed_names);
    assert_eq!(fresh.final_output, resumed.final_output);
}

#[tokio::test]
async fn resume_with_mismatched_inputs_fails_without_touching_store() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, counters) = tracked_registry();
    let executor = WorkflowExecutor::new(registry, PrerequisiteRegistry::new())
        .with_checkpoint_store(FileCheckpointStore::new(dir.path()));
    let workflow = parse_workflow(CHECKPOINT_YAML).unwrap();

    let result = executor
        .execute(workflow.clone(), value_inputs("test"))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert!(result.success);

    let store = FileCheckpointStore::new(dir.path());
    let before = store
        .load("test-checkpoint", "after_step1")
        .await
        .unwrap()
        .unwrap();

    let mut execution = executor
        .execute_with_options(
            workflow,
            value_inputs("different"),
            ExecuteOptions {
                resume_from_checkpoint: true,
            },
        )
        .unwrap();
    let events = execution.drain().await;

    assert!(matches!(
        events.last().unwrap().kind,
        WorkflowEventKind::WorkflowFailed { .. }
    ));
    let result = execution.result().unwrap();
    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("inputs differ"), "got: {error}");
    assert!(error.contains("hash mismatch"), "got: {error}");

    // No step ran and the checkpoint is untouched.
    assert_eq!(counters[0].load(Ordering::SeqCst), 1);
    let after = store
        .load("test-checkpoint", "after_step1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn checkpoint_persists_required_keys_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _) = tracked_registry();
    let executor = WorkflowExecutor::new(registry, PrerequisiteRegistry::new())
        .with_checkpoint_store(FileCheckpointStore::new(dir.path()));

    let workflow = parse_workflow(CHECKPOINT_YAML).unwrap();
    executor
        .execute(workflow, value_inputs("test"))
        .unwrap()
        .wait()
        .await
        .unwrap();

    let path = dir.path().join("test-checkpoint").join("after_step1.json");
    assert!(path.exists());

    let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["workflow_name"], json!("test-checkpoint"));
    assert_eq!(raw["checkpoint_id"], json!("after_step1"));
    assert_eq!(raw["inputs_hash"].as_str().unwrap().len(), 64);
    assert!(raw["step_results"].is_array());
    assert!(raw["saved_at"].as_str().unwrap().contains('T'));
}

#[tokio::test]
async fn checkpoint_step_without_store_fails_the_run() {
    let (registry, counters) = tracked_registry();
    let executor = WorkflowExecutor::new(registry, PrerequisiteRegistry::new());

    let workflow = parse_workflow(CHECKPOINT_YAML).unwrap();
    let mut execution = executor.execute(workflow, value_inputs("test")).unwrap();
    let events = execution.drain().await;

    assert!(matches!(
        events.last().unwrap().kind,
        WorkflowEventKind::WorkflowFailed { .. }
    ));
    let result = execution.result().unwrap();
    assert!(!result.success);
    assert!(result
        .error
        .unwrap()
        .contains("requires a checkpoint store"));
    // step1 ran, the failed checkpoint halted the rest.
    assert_eq!(counters[0].load(Ordering::SeqCst), 1);
    assert_eq!(counters[1].load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn resume_without_existing_checkpoint_runs_from_start() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, counters) = tracked_registry();
    let executor = WorkflowExecutor::new(registry, PrerequisiteRegistry::new())
        .with_checkpoint_store(FileCheckpointStore::new(dir.path()));

    let workflow = parse_workflow(CHECKPOINT_YAML).unwrap();
    let result = executor
        .execute_with_options(
            workflow,
            value_inputs("test"),
            ExecuteOptions {
                resume_from_checkpoint: true,
            },
        )
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(counters[0].load(Ordering::SeqCst), 1);
}
