//! Checkpoint storage.
//!
//! The `CheckpointStore` trait is the durable-snapshot interface the
//! executor writes through; `FileCheckpointStore` is the default
//! filesystem-backed implementation with one JSON file per
//! `(workflow, checkpoint_id)` and a staged-write-then-rename discipline so
//! a partial write is never observable by a subsequent load.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use maverick_types::checkpoint::CheckpointSnapshot;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from checkpoint persistence.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization error: {0}")]
    Serialization(String),
}

// ---------------------------------------------------------------------------
// Input hashing
// ---------------------------------------------------------------------------

/// Hex SHA-256 of the canonicalized inputs map.
///
/// Canonical form sorts object keys recursively and serializes compactly,
/// so two equal input maps hash identically regardless of insertion order.
pub fn inputs_hash(inputs: &Map<String, Value>) -> String {
    let canonical = canonicalize(&Value::Object(inputs.clone()));
    let serialized = serde_json::to_string(&canonical).unwrap_or_default();
    let digest = Sha256::digest(serialized.as_bytes());
    format!("{digest:x}")
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Whether a snapshot was taken with these inputs.
pub fn snapshot_matches_inputs(snapshot: &CheckpointSnapshot, inputs: &Map<String, Value>) -> bool {
    snapshot.inputs_hash == inputs_hash(inputs)
}

// ---------------------------------------------------------------------------
// CheckpointStore trait
// ---------------------------------------------------------------------------

/// Durable snapshot storage for workflow runs.
///
/// `save` must be atomic: a concurrent or subsequent `load` observes either
/// the previous snapshot or the new one, never a partial write.
pub trait CheckpointStore: Send + Sync {
    fn save(
        &self,
        snapshot: &CheckpointSnapshot,
    ) -> impl Future<Output = Result<(), CheckpointError>> + Send;

    fn load(
        &self,
        workflow_name: &str,
        checkpoint_id: &str,
    ) -> impl Future<Output = Result<Option<CheckpointSnapshot>, CheckpointError>> + Send;

    /// The newest snapshot (by `saved_at`) for a workflow, if any.
    fn load_latest(
        &self,
        workflow_name: &str,
    ) -> impl Future<Output = Result<Option<CheckpointSnapshot>, CheckpointError>> + Send;

    fn list_checkpoints(
        &self,
        workflow_name: &str,
    ) -> impl Future<Output = Result<BTreeSet<String>, CheckpointError>> + Send;

    /// Delete one checkpoint, or all of a workflow's when `checkpoint_id`
    /// is `None`. Deleting something absent is not an error.
    fn delete(
        &self,
        workflow_name: &str,
        checkpoint_id: Option<&str>,
    ) -> impl Future<Output = Result<(), CheckpointError>> + Send;
}

// Object-safe twin with boxed futures, for `BoxCheckpointStore`.
trait CheckpointStoreDyn: Send + Sync {
    fn save_boxed<'a>(
        &'a self,
        snapshot: &'a CheckpointSnapshot,
    ) -> Pin<Box<dyn Future<Output = Result<(), CheckpointError>> + Send + 'a>>;

    fn load_boxed<'a>(
        &'a self,
        workflow_name: &'a str,
        checkpoint_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CheckpointSnapshot>, CheckpointError>> + Send + 'a>>;

    fn load_latest_boxed<'a>(
        &'a self,
        workflow_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CheckpointSnapshot>, CheckpointError>> + Send + 'a>>;

    fn list_boxed<'a>(
        &'a self,
        workflow_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<BTreeSet<String>, CheckpointError>> + Send + 'a>>;

    fn delete_boxed<'a>(
        &'a self,
        workflow_name: &'a str,
        checkpoint_id: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<(), CheckpointError>> + Send + 'a>>;
}

impl<T: CheckpointStore> CheckpointStoreDyn for T {
    fn save_boxed<'a>(
        &'a self,
        snapshot: &'a CheckpointSnapshot,
    ) -> Pin<Box<dyn Future<Output = Result<(), CheckpointError>> + Send + 'a>> {
        Box::pin(self.save(snapshot))
    }

    fn load_boxed<'a>(
        &'a self,
        workflow_name: &'a str,
        checkpoint_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CheckpointSnapshot>, CheckpointError>> + Send + 'a>>
    {
        Box::pin(self.load(workflow_name, checkpoint_id))
    }

    fn load_latest_boxed<'a>(
        &'a self,
        workflow_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CheckpointSnapshot>, CheckpointError>> + Send + 'a>>
    {
        Box::pin(self.load_latest(workflow_name))
    }

    fn list_boxed<'a>(
        &'a self,
        workflow_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<BTreeSet<String>, CheckpointError>> + Send + 'a>> {
        Box::pin(self.list_checkpoints(workflow_name))
    }

    fn delete_boxed<'a>(
        &'a self,
        workflow_name: &'a str,
        checkpoint_id: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<(), CheckpointError>> + Send + 'a>> {
        Box::pin(self.delete(workflow_name, checkpoint_id))
    }
}

/// Type-erased checkpoint store held by the executor.
pub struct BoxCheckpointStore {
    inner: Box<dyn CheckpointStoreDyn>,
}

impl BoxCheckpointStore {
    pub fn new<T: CheckpointStore + 'static>(store: T) -> Self {
        Self {
            inner: Box::new(store),
        }
    }

    pub async fn save(&self, snapshot: &CheckpointSnapshot) -> Result<(), CheckpointError> {
        self.inner.save_boxed(snapshot).await
    }

    pub async fn load(
        &self,
        workflow_name: &str,
        checkpoint_id: &str,
    ) -> Result<Option<CheckpointSnapshot>, CheckpointError> {
        self.inner.load_boxed(workflow_name, checkpoint_id).await
    }

    pub async fn load_latest(
        &self,
        workflow_name: &str,
    ) -> Result<Option<CheckpointSnapshot>, CheckpointError> {
        self.inner.load_latest_boxed(workflow_name).await
    }

    pub async fn list_checkpoints(
        &self,
        workflow_name: &str,
    ) -> Result<BTreeSet<String>, CheckpointError> {
        self.inner.list_boxed(workflow_name).await
    }

    pub async fn delete(
        &self,
        workflow_name: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<(), CheckpointError> {
        self.inner.delete_boxed(workflow_name, checkpoint_id).await
    }
}

// ---------------------------------------------------------------------------
// FileCheckpointStore
// ---------------------------------------------------------------------------

/// File-backed checkpoint store.
///
/// Layout: `<base>/<workflow_name>/<checkpoint_id>.json`. Saves write to a
/// uniquely named temp file in the destination directory and rename it into
/// place; the temp file is removed on any failure.
pub struct FileCheckpointStore {
    base_path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn workflow_dir(&self, workflow_name: &str) -> PathBuf {
        self.base_path.join(workflow_name)
    }

    fn checkpoint_path(&self, workflow_name: &str, checkpoint_id: &str) -> PathBuf {
        self.workflow_dir(workflow_name)
            .join(format!("{checkpoint_id}.json"))
    }

    async fn read_snapshot(path: &Path) -> Result<Option<CheckpointSnapshot>, CheckpointError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))
    }
}

impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, snapshot: &CheckpointSnapshot) -> Result<(), CheckpointError> {
        let dir = self.workflow_dir(&snapshot.workflow_name);
        tokio::fs::create_dir_all(&dir).await?;

        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        // Stage in the destination directory so the rename stays on one
        // filesystem and is atomic.
        let final_path = self.checkpoint_path(&snapshot.workflow_name, &snapshot.checkpoint_id);
        let staged_path = dir.join(format!(
            ".{}.json.{}",
            snapshot.checkpoint_id,
            uuid::Uuid::now_v7()
        ));

        if let Err(e) = tokio::fs::write(&staged_path, content.as_bytes()).await {
            let _ = tokio::fs::remove_file(&staged_path).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&staged_path, &final_path).await {
            let _ = tokio::fs::remove_file(&staged_path).await;
            return Err(e.into());
        }

        tracing::debug!(
            workflow = snapshot.workflow_name.as_str(),
            checkpoint_id = snapshot.checkpoint_id.as_str(),
            steps = snapshot.step_results.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    async fn load(
        &self,
        workflow_name: &str,
        checkpoint_id: &str,
    ) -> Result<Option<CheckpointSnapshot>, CheckpointError> {
        Self::read_snapshot(&self.checkpoint_path(workflow_name, checkpoint_id)).await
    }

    async fn load_latest(
        &self,
        workflow_name: &str,
    ) -> Result<Option<CheckpointSnapshot>, CheckpointError> {
        let mut latest: Option<CheckpointSnapshot> = None;
        for checkpoint_id in self.list_checkpoints(workflow_name).await? {
            if let Some(snapshot) = self.load(workflow_name, &checkpoint_id).await? {
                let newer = latest
                    .as_ref()
                    .is_none_or(|current| snapshot.saved_at > current.saved_at);
                if newer {
                    latest = Some(snapshot);
                }
            }
        }
        Ok(latest)
    }

    async fn list_checkpoints(
        &self,
        workflow_name: &str,
    ) -> Result<BTreeSet<String>, CheckpointError> {
        let dir = self.workflow_dir(workflow_name);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = BTreeSet::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if hidden || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.insert(stem.to_string());
            }
        }
        Ok(ids)
    }

    async fn delete(
        &self,
        workflow_name: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<(), CheckpointError> {
        let target = match checkpoint_id {
            Some(id) => self.checkpoint_path(workflow_name, id),
            None => self.workflow_dir(workflow_name),
        };
        let result = if checkpoint_id.is_some() {
            tokio::fs::remove_file(&target).await
        } else {
            tokio::fs::remove_dir_all(&target).await
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use maverick_types::result::StepResult;
    use maverick_types::workflow::StepType;
    use serde_json::json;

    fn snapshot(workflow: &str, id: &str) -> CheckpointSnapshot {
        let mut inputs = Map::new();
        inputs.insert("value".to_string(), json!("test"));
        CheckpointSnapshot {
            workflow_name: workflow.to_string(),
            checkpoint_id: id.to_string(),
            inputs_hash: inputs_hash(&inputs),
            step_results: vec![StepResult::succeeded(
                "step1",
                StepType::Python,
                json!("step1_result_test"),
                3,
            )],
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn inputs_hash_is_order_insensitive() {
        let mut a = Map::new();
        a.insert("x".to_string(), json!(1));
        a.insert("y".to_string(), json!({"b": 2, "a": [1, 2]}));

        let mut b = Map::new();
        b.insert("y".to_string(), json!({"a": [1, 2], "b": 2}));
        b.insert("x".to_string(), json!(1));

        assert_eq!(inputs_hash(&a), inputs_hash(&b));
        assert_eq!(inputs_hash(&a).len(), 64);
    }

    #[test]
    fn inputs_hash_differs_on_value_change() {
        let mut a = Map::new();
        a.insert("value".to_string(), json!("test"));
        let mut b = Map::new();
        b.insert("value".to_string(), json!("different"));
        assert_ne!(inputs_hash(&a), inputs_hash(&b));
    }

    #[tokio::test]
    async fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        let original = snapshot("test-checkpoint", "after_step1");
        store.save(&original).await.unwrap();

        let loaded = store
            .load("test-checkpoint", "after_step1")
            .await
            .unwrap()
            .expect("snapshot should exist");
        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(store.load("ghost", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_checkpoints_by_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.save(&snapshot("wf", "c1")).await.unwrap();
        store.save(&snapshot("wf", "c2")).await.unwrap();
        store.save(&snapshot("other", "c3")).await.unwrap();

        let ids = store.list_checkpoints("wf").await.unwrap();
        assert_eq!(
            ids,
            BTreeSet::from(["c1".to_string(), "c2".to_string()])
        );
        assert!(store.list_checkpoints("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_latest_picks_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        let mut older = snapshot("wf", "first");
        older.saved_at = Utc::now() - chrono::Duration::minutes(5);
        store.save(&older).await.unwrap();
        store.save(&snapshot("wf", "second")).await.unwrap();

        let latest = store.load_latest("wf").await.unwrap().unwrap();
        assert_eq!(latest.checkpoint_id, "second");
    }

    #[tokio::test]
    async fn overwrite_is_atomic_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store.save(&snapshot("wf", "c1")).await.unwrap();
        let mut updated = snapshot("wf", "c1");
        updated.step_results.push(StepResult::succeeded(
            "step2",
            StepType::Python,
            json!("more"),
            1,
        ));
        store.save(&updated).await.unwrap();

        let loaded = store.load("wf", "c1").await.unwrap().unwrap();
        assert_eq!(loaded.step_results.len(), 2);
    }

    #[tokio::test]
    async fn no_stray_temp_files_after_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.save(&snapshot("wf", "c1")).await.unwrap();

        let entries: Vec<String> = std::fs::read_dir(dir.path().join("wf"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["c1.json".to_string()]);
    }

    #[tokio::test]
    async fn delete_one_and_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.save(&snapshot("wf", "c1")).await.unwrap();
        store.save(&snapshot("wf", "c2")).await.unwrap();

        store.delete("wf", Some("c1")).await.unwrap();
        assert!(store.load("wf", "c1").await.unwrap().is_none());
        assert!(store.load("wf", "c2").await.unwrap().is_some());

        store.delete("wf", None).await.unwrap();
        assert!(store.list_checkpoints("wf").await.unwrap().is_empty());

        // Deleting absent things is not an error
        store.delete("wf", Some("ghost")).await.unwrap();
        store.delete("ghost", None).await.unwrap();
    }

    #[tokio::test]
    async fn box_store_delegates() {
        let dir = tempfile::tempdir().unwrap();
        let store = BoxCheckpointStore::new(FileCheckpointStore::new(dir.path()));
        let original = snapshot("wf", "c1");
        store.save(&original).await.unwrap();
        assert_eq!(store.load("wf", "c1").await.unwrap().unwrap(), original);
        assert_eq!(store.list_checkpoints("wf").await.unwrap().len(), 1);
    }

    #[test]
    fn snapshot_matching() {
        let mut inputs = Map::new();
        inputs.insert("value".to_string(), json!("test"));
        let snap = snapshot("wf", "c1");
        assert!(snapshot_matches_inputs(&snap, &inputs));

        inputs.insert("value".to_string(), json!("changed"));
        assert!(!snapshot_matches_inputs(&snap, &inputs));
    }
}
