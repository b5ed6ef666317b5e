#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ralph_board::engine::{EngineSettings, RalphEngine};
use ralph_board::provider::{
    AgentProvider, CancelHandle, CompletionRequest, CompletionResponse, ProviderError,
    ToolActivity,
};
use ralph_board::recorder::RunStore;
use ralph_board::task::{
    Comment, CommentKind, InMemoryTaskStore, RuntimePatch, RuntimeState, RuntimeStatus,
    SessionStatePatch, StoreResult, Task, TaskStatus, TaskStore,
};
use serde_json::Value;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

/// What the scripted provider does for one `complete` call.
#[derive(Debug, Clone)]
pub enum Step {
    Succeed(String),
    SucceedWithTools(String, Vec<ToolActivity>),
    /// Resolve with an error finish reason and some partial output.
    FailWith(String),
    /// Resolve with a provider error.
    Crash(String),
    /// Emit one chunk, then wait until cancelled.
    Hang,
}

/// Provider that replays a script; `Succeed("done")` once the script runs out.
pub struct ScriptedProvider {
    ready: bool,
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    prompts: Mutex<Vec<String>>,
    cancel: CancelHandle,
    observed: Mutex<Option<Arc<dyn TaskStore>>>,
    running_snapshots: Mutex<Vec<Vec<String>>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            ready: true,
            steps: Mutex::new(steps.into()),
            fallback: Step::Succeed("done".to_string()),
            prompts: Mutex::new(Vec::new()),
            cancel: CancelHandle::new(),
            observed: Mutex::new(None),
            running_snapshots: Mutex::new(Vec::new()),
        }
    }

    pub fn always(step: Step) -> Self {
        Self {
            fallback: step,
            ..Self::new(Vec::new())
        }
    }

    pub fn not_ready() -> Self {
        Self {
            ready: false,
            ..Self::new(Vec::new())
        }
    }

    /// The user prompt of every call, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts").clone()
    }

    /// Snapshot the ids of `running` tasks in `store` at the start of every call.
    pub fn observe(&self, store: Arc<dyn TaskStore>) {
        *self.observed.lock().expect("observed") = Some(store);
    }

    pub fn running_snapshots(&self) -> Vec<Vec<String>> {
        self.running_snapshots.lock().expect("snapshots").clone()
    }

    async fn snapshot_running(&self) {
        let store = self.observed.lock().expect("observed").clone();
        if let Some(store) = store {
            let running = store
                .get_tasks()
                .await
                .expect("snapshot tasks")
                .into_iter()
                .filter(|t| t.runtime.status == RuntimeStatus::Running)
                .map(|t| t.id)
                .collect();
            self.running_snapshots.lock().expect("snapshots").push(running);
        }
    }

    fn next_step(&self) -> Step {
        self.steps
            .lock()
            .expect("steps")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl AgentProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn is_ready(&self) -> bool {
        self.ready
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        if self.cancel.is_cancelled() {
            self.cancel.reset();
            return Err(ProviderError::Cancelled);
        }
        self.snapshot_running().await;
        if let Some(user) = request.messages.last() {
            self.prompts.lock().expect("prompts").push(user.content.clone());
        }
        let emit = |text: &str| {
            if let Some(on_chunk) = &request.on_chunk {
                on_chunk(text);
            }
        };

        let result = match self.next_step() {
            Step::Succeed(text) => {
                emit(&text);
                Ok(CompletionResponse::text(text))
            }
            Step::SucceedWithTools(text, tools) => {
                emit(&text);
                let mut response = CompletionResponse::text(text);
                response.tool_activity = tools;
                Ok(response)
            }
            Step::FailWith(message) => {
                emit("partial output");
                let mut response = CompletionResponse::error(message);
                response.raw_content = Some("partial output".to_string());
                Ok(response)
            }
            Step::Crash(message) => Err(ProviderError::Spawn(message)),
            Step::Hang => {
                emit("working");
                self.cancel.cancelled().await;
                Err(ProviderError::Cancelled)
            }
        };
        self.cancel.reset();
        result
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn clear_cancel(&self) {
        self.cancel.reset();
    }
}

pub struct Harness {
    pub temp_dir: TempDir,
    pub store: Arc<InMemoryTaskStore>,
    pub provider: Arc<ScriptedProvider>,
    pub engine: Arc<RalphEngine>,
}

impl Harness {
    pub fn new(tasks: Vec<Task>, provider: ScriptedProvider) -> Self {
        Self::with_settings(tasks, provider, fast_settings())
    }

    pub fn with_settings(
        tasks: Vec<Task>,
        provider: ScriptedProvider,
        settings: EngineSettings,
    ) -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = Arc::new(InMemoryTaskStore::with_tasks(tasks));
        let provider = Arc::new(provider);
        let run_store = RunStore::new(temp_dir.path().join("runs")).expect("run store");
        let engine = Arc::new(
            RalphEngine::new(store.clone(), run_store, settings).with_provider(provider.clone()),
        );
        Self {
            temp_dir,
            store,
            provider,
            engine,
        }
    }

    pub fn run_store(&self) -> RunStore {
        RunStore::new(self.temp_dir.path().join("runs")).expect("run store")
    }

    pub async fn task(&self, id: &str) -> Task {
        self.store.get_task(id).await.expect("get").expect("task")
    }
}

pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        pause_poll_interval: Duration::from_millis(10),
        ..EngineSettings::default()
    }
}

/// Store whose runtime updates announce themselves, then stall for `delay`.
pub struct SlowRuntimeStore {
    pub inner: Arc<InMemoryTaskStore>,
    pub delay: Duration,
    pub entered: Arc<Notify>,
}

impl SlowRuntimeStore {
    pub fn new(inner: Arc<InMemoryTaskStore>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            entered: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl TaskStore for SlowRuntimeStore {
    async fn get_tasks(&self) -> StoreResult<Vec<Task>> {
        self.inner.get_tasks().await
    }

    async fn get_task(&self, id: &str) -> StoreResult<Option<Task>> {
        self.inner.get_task(id).await
    }

    async fn move_task(&self, id: &str, status: TaskStatus) -> StoreResult<()> {
        self.inner.move_task(id, status).await
    }

    async fn update_task_runtime(
        &self,
        id: &str,
        patch: RuntimePatch,
    ) -> StoreResult<RuntimeState> {
        self.entered.notify_one();
        tokio::time::sleep(self.delay).await;
        self.inner.update_task_runtime(id, patch).await
    }

    async fn add_typed_comment(
        &self,
        id: &str,
        kind: CommentKind,
        author: &str,
        content: &str,
        run_id: Option<&str>,
    ) -> StoreResult<Comment> {
        self.inner
            .add_typed_comment(id, kind, author, content, run_id)
            .await
    }

    async fn set_state(&self, patch: SessionStatePatch) -> StoreResult<()> {
        self.inner.set_state(patch).await
    }

    async fn log_activity(&self, kind: &str, data: Value) -> StoreResult<()> {
        self.inner.log_activity(kind, data).await
    }
}
