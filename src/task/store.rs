//! Task store interface and the two bundled implementations.
//!
//! The engine only ever talks to [`TaskStore`]. [`InMemoryTaskStore`] backs
//! tests and embedding callers; [`JsonTaskStore`] persists the whole board to
//! a single JSON document after every mutation.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::id::generate_id;
use crate::task::{Comment, CommentKind, RuntimeState, RuntimeStatus, Task, TaskStatus};

/// Activity entries kept on the board; older ones are dropped first.
const MAX_ACTIVITY_ENTRIES: usize = 500;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Partial update of a task's runtime state.
///
/// Counters are expressed as deltas so the store applies them atomically
/// against its own copy rather than trusting a caller's stale read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimePatch {
    pub status: Option<RuntimeStatus>,
    /// `Some(None)` clears the current run.
    pub current_run_id: Option<Option<String>>,
    pub last_run_id: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub run_count_delta: u32,
    pub failure_count_delta: u32,
    pub attempt_count_delta: u32,
    /// Zero the attempt counter before applying the delta.
    pub reset_attempts: bool,
}

impl RuntimePatch {
    pub fn status(status: RuntimeStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_current_run(mut self, run_id: Option<String>) -> Self {
        self.current_run_id = Some(run_id);
        self
    }

    pub fn with_last_run(mut self, run_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.last_run_id = Some(run_id.into());
        self.last_run_at = Some(at);
        self
    }

    pub fn increment_runs(mut self) -> Self {
        self.run_count_delta += 1;
        self
    }

    pub fn increment_failures(mut self) -> Self {
        self.failure_count_delta += 1;
        self
    }

    pub fn increment_attempts(mut self) -> Self {
        self.attempt_count_delta += 1;
        self
    }

    pub fn reset_attempts(mut self) -> Self {
        self.reset_attempts = true;
        self
    }

    fn apply(&self, runtime: &mut RuntimeState) {
        if self.reset_attempts {
            runtime.attempt_count = 0;
        }
        if let Some(status) = self.status {
            runtime.status = status;
        }
        if let Some(current) = &self.current_run_id {
            runtime.current_run_id = current.clone();
        }
        if let Some(last) = &self.last_run_id {
            runtime.last_run_id = Some(last.clone());
        }
        if let Some(at) = self.last_run_at {
            runtime.last_run_at = Some(at);
        }
        runtime.run_count = runtime.run_count.saturating_add(self.run_count_delta);
        runtime.failure_count = runtime
            .failure_count
            .saturating_add(self.failure_count_delta);
        runtime.attempt_count = runtime
            .attempt_count
            .saturating_add(self.attempt_count_delta);
    }
}

/// Session-level flags surfaced to observers of the board.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default)]
    pub ralph_running: bool,
    #[serde(default)]
    pub ralph_paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatePatch {
    pub ralph_running: Option<bool>,
    pub ralph_paused: Option<bool>,
    pub current_task_id: Option<Option<String>>,
}

impl SessionStatePatch {
    fn apply(&self, state: &mut SessionState) {
        if let Some(running) = self.ralph_running {
            state.ralph_running = running;
        }
        if let Some(paused) = self.ralph_paused {
            state.ralph_paused = paused;
        }
        if let Some(current) = &self.current_task_id {
            state.current_task_id = current.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub kind: String,
    pub data: Value,
    pub recorded_at: DateTime<Utc>,
}

/// Durable storage of tasks, comments, runtime state and session flags.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get_tasks(&self) -> StoreResult<Vec<Task>>;

    async fn get_task(&self, id: &str) -> StoreResult<Option<Task>>;

    async fn move_task(&self, id: &str, status: TaskStatus) -> StoreResult<()>;

    async fn update_task_runtime(&self, id: &str, patch: RuntimePatch)
        -> StoreResult<RuntimeState>;

    async fn add_typed_comment(
        &self,
        id: &str,
        kind: CommentKind,
        author: &str,
        content: &str,
        run_id: Option<&str>,
    ) -> StoreResult<Comment>;

    async fn set_state(&self, patch: SessionStatePatch) -> StoreResult<()>;

    async fn log_activity(&self, kind: &str, data: Value) -> StoreResult<()>;
}

/// The whole board as persisted by [`JsonTaskStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub state: SessionState,
    #[serde(default)]
    pub activity: Vec<ActivityEntry>,
}

impl Board {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            ..Default::default()
        }
    }

    fn task_mut(&mut self, id: &str) -> StoreResult<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn upsert(&mut self, task: Task) {
        match self.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task,
            None => self.tasks.push(task),
        }
    }

    fn move_task(&mut self, id: &str, status: TaskStatus) -> StoreResult<()> {
        let task = self.task_mut(id)?;
        task.status = status;
        task.updated_at = Utc::now();
        Ok(())
    }

    fn update_runtime(&mut self, id: &str, patch: &RuntimePatch) -> StoreResult<RuntimeState> {
        let task = self.task_mut(id)?;
        patch.apply(&mut task.runtime);
        task.updated_at = Utc::now();
        Ok(task.runtime.clone())
    }

    fn add_comment(
        &mut self,
        id: &str,
        kind: CommentKind,
        author: &str,
        content: &str,
        run_id: Option<&str>,
    ) -> StoreResult<Comment> {
        let task = self.task_mut(id)?;
        let comment = Comment {
            id: generate_id("comment"),
            task_id: id.to_string(),
            kind,
            author: author.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            run_id: run_id.map(str::to_string),
        };
        task.comments.push(comment.clone());
        task.updated_at = comment.created_at;
        Ok(comment)
    }

    fn log_activity(&mut self, kind: &str, data: Value) {
        self.activity.push(ActivityEntry {
            kind: kind.to_string(),
            data,
            recorded_at: Utc::now(),
        });
        if self.activity.len() > MAX_ACTIVITY_ENTRIES {
            let excess = self.activity.len() - MAX_ACTIVITY_ENTRIES;
            self.activity.drain(..excess);
        }
    }
}

/// Volatile store, mainly for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    board: RwLock<Board>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            board: RwLock::new(Board::new(tasks)),
        }
    }

    pub async fn insert_task(&self, task: Task) {
        self.board.write().await.upsert(task);
    }

    pub async fn snapshot(&self) -> Board {
        self.board.read().await.clone()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get_tasks(&self) -> StoreResult<Vec<Task>> {
        Ok(self.board.read().await.tasks.clone())
    }

    async fn get_task(&self, id: &str) -> StoreResult<Option<Task>> {
        let board = self.board.read().await;
        Ok(board.tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn move_task(&self, id: &str, status: TaskStatus) -> StoreResult<()> {
        self.board.write().await.move_task(id, status)
    }

    async fn update_task_runtime(
        &self,
        id: &str,
        patch: RuntimePatch,
    ) -> StoreResult<RuntimeState> {
        self.board.write().await.update_runtime(id, &patch)
    }

    async fn add_typed_comment(
        &self,
        id: &str,
        kind: CommentKind,
        author: &str,
        content: &str,
        run_id: Option<&str>,
    ) -> StoreResult<Comment> {
        self.board
            .write()
            .await
            .add_comment(id, kind, author, content, run_id)
    }

    async fn set_state(&self, patch: SessionStatePatch) -> StoreResult<()> {
        patch.apply(&mut self.board.write().await.state);
        Ok(())
    }

    async fn log_activity(&self, kind: &str, data: Value) -> StoreResult<()> {
        self.board.write().await.log_activity(kind, data);
        Ok(())
    }
}

/// Board persisted as one JSON document, rewritten atomically on each change.
#[derive(Debug)]
pub struct JsonTaskStore {
    path: PathBuf,
    board: Mutex<Board>,
}

impl JsonTaskStore {
    /// Open the board at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let board = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Board::default(),
            Err(err) => return Err(StoreError::Io(err)),
        };
        Ok(Self {
            path,
            board: Mutex::new(board),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn insert_task(&self, task: Task) -> StoreResult<()> {
        let mut board = self.board.lock().await;
        board.upsert(task);
        self.persist(&board)
    }

    pub async fn snapshot(&self) -> Board {
        self.board.lock().await.clone()
    }

    fn persist(&self, board: &Board) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(board)?;
        let temp_path = self.path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}

#[async_trait]
impl TaskStore for JsonTaskStore {
    async fn get_tasks(&self) -> StoreResult<Vec<Task>> {
        Ok(self.board.lock().await.tasks.clone())
    }

    async fn get_task(&self, id: &str) -> StoreResult<Option<Task>> {
        let board = self.board.lock().await;
        Ok(board.tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn move_task(&self, id: &str, status: TaskStatus) -> StoreResult<()> {
        let mut board = self.board.lock().await;
        board.move_task(id, status)?;
        self.persist(&board)
    }

    async fn update_task_runtime(
        &self,
        id: &str,
        patch: RuntimePatch,
    ) -> StoreResult<RuntimeState> {
        let mut board = self.board.lock().await;
        let runtime = board.update_runtime(id, &patch)?;
        self.persist(&board)?;
        Ok(runtime)
    }

    async fn add_typed_comment(
        &self,
        id: &str,
        kind: CommentKind,
        author: &str,
        content: &str,
        run_id: Option<&str>,
    ) -> StoreResult<Comment> {
        let mut board = self.board.lock().await;
        let comment = board.add_comment(id, kind, author, content, run_id)?;
        self.persist(&board)?;
        Ok(comment)
    }

    async fn set_state(&self, patch: SessionStatePatch) -> StoreResult<()> {
        let mut board = self.board.lock().await;
        patch.apply(&mut board.state);
        self.persist(&board)
    }

    async fn log_activity(&self, kind: &str, data: Value) -> StoreResult<()> {
        let mut board = self.board.lock().await;
        board.log_activity(kind, data);
        self.persist(&board)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_runtime_patch_applies_deltas() {
        let store = InMemoryTaskStore::with_tasks(vec![Task::new("T-1", "one")]);

        let patch = RuntimePatch::status(RuntimeStatus::Running)
            .with_current_run(Some("run-1".to_string()))
            .with_last_run("run-1", Utc::now())
            .increment_runs();
        store.update_task_runtime("T-1", patch).await.expect("patch");

        let runtime = store
            .update_task_runtime(
                "T-1",
                RuntimePatch::status(RuntimeStatus::Failed)
                    .with_current_run(None)
                    .increment_failures(),
            )
            .await
            .expect("patch");

        assert_eq!(runtime.status, RuntimeStatus::Failed);
        assert_eq!(runtime.current_run_id, None);
        assert_eq!(runtime.last_run_id.as_deref(), Some("run-1"));
        assert_eq!(runtime.run_count, 1);
        assert_eq!(runtime.failure_count, 1);
    }

    #[tokio::test]
    async fn test_reset_attempts_zeroes_counter() {
        let store = InMemoryTaskStore::with_tasks(vec![Task::new("T-1", "one")]);
        for _ in 0..3 {
            store
                .update_task_runtime("T-1", RuntimePatch::default().increment_attempts())
                .await
                .expect("patch");
        }
        let runtime = store
            .update_task_runtime(
                "T-1",
                RuntimePatch::status(RuntimeStatus::Idle).reset_attempts(),
            )
            .await
            .expect("patch");
        assert_eq!(runtime.attempt_count, 0);
        assert_eq!(runtime.status, RuntimeStatus::Idle);
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let store = InMemoryTaskStore::new();
        let err = store
            .move_task("nope", TaskStatus::Done)
            .await
            .expect_err("missing task");
        assert!(matches!(err, StoreError::NotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_comments_are_appended_in_order() {
        let store = InMemoryTaskStore::with_tasks(vec![Task::new("T-1", "one")]);
        store
            .add_typed_comment("T-1", CommentKind::Failure, "ralph", "first", Some("run-a"))
            .await
            .expect("comment");
        store
            .add_typed_comment("T-1", CommentKind::Instruction, "me", "second", None)
            .await
            .expect("comment");

        let task = store.get_task("T-1").await.expect("get").expect("task");
        let contents: Vec<_> = task.comments.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
        assert_eq!(task.comments[0].run_id.as_deref(), Some("run-a"));
    }

    #[tokio::test]
    async fn test_json_store_persists_mutations() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("board.json");

        {
            let store = JsonTaskStore::open(&path).expect("open");
            store
                .insert_task(Task::new("T-1", "persist me"))
                .await
                .expect("insert");
            store
                .move_task("T-1", TaskStatus::Review)
                .await
                .expect("move");
            store
                .set_state(SessionStatePatch {
                    ralph_running: Some(true),
                    ..Default::default()
                })
                .await
                .expect("state");
            store
                .log_activity("ralph_start", json!({"total": 1}))
                .await
                .expect("activity");
        }

        let reopened = JsonTaskStore::open(&path).expect("reopen");
        let board = reopened.snapshot().await;
        assert_eq!(board.tasks[0].status, TaskStatus::Review);
        assert!(board.state.ralph_running);
        assert_eq!(board.activity.len(), 1);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_activity_log_is_capped() {
        let store = InMemoryTaskStore::new();
        for i in 0..(MAX_ACTIVITY_ENTRIES + 10) {
            store
                .log_activity("tick", json!({ "i": i }))
                .await
                .expect("activity");
        }
        let board = store.snapshot().await;
        assert_eq!(board.activity.len(), MAX_ACTIVITY_ENTRIES);
        assert_eq!(board.activity[0].data["i"], json!(10));
    }
}
