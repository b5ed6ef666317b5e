//! The Ralph engine: drains the board's `todo` column one task at a time.
//!
//! Each iteration rebuilds the queue from the store, picks the first task
//! whose dependencies are done, and hands it to the configured
//! [`AgentProvider`]. Anything that goes wrong while a task runs becomes a
//! task-level outcome (a comment, a runtime status, an event); only the
//! preconditions checked on entry to [`RalphEngine::run_all_pending`] are
//! returned as errors.

pub mod acceptance;
pub mod events;
pub mod prompt;
pub mod queue;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::notify::{Notifier, TracingNotifier};
use crate::provider::transcript::truncate_chars;
use crate::provider::{AgentProvider, CompletionRequest, ExecutionMode, ProviderError};
use crate::recorder::{redact_text, RunRecorder, RunStore};
use crate::task::{
    CommentKind, RuntimePatch, RuntimeStatus, SessionStatePatch, StoreResult, Task, TaskStatus,
    TaskStore,
};

pub use events::{EngineEvent, EngineEventKind, EventBus, ListenerId, Subscription};
pub use queue::{build_queue, next_ready, QueuePlan};

const STOPPED_BY_USER: &str = "stopped by user";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub max_attempts: u32,
    pub pause_poll_interval: Duration,
    /// Characters of agent output kept in comments and run summaries.
    pub output_excerpt_chars: usize,
    /// Author recorded on comments the engine writes.
    pub author: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_attempts: crate::config::DEFAULT_MAX_ATTEMPTS,
            pause_poll_interval: Duration::from_millis(250),
            output_excerpt_chars: 2000,
            author: "ralph".to_string(),
        }
    }
}

/// Per-call limits for [`RalphEngine::run_all_pending`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub max_tasks: Option<usize>,
    /// Overrides [`EngineSettings::max_attempts`] for this call.
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RalphRunResult {
    pub success: bool,
    /// Executions handed to the provider.
    pub processed: usize,
    pub completed: usize,
    /// Failed executions; one task may fail several times.
    pub failed: usize,
    /// Tasks blocked this session.
    pub blocked: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Stopping,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub processed: usize,
    pub current_task_id: Option<String>,
    pub status: EngineStatus,
}

#[derive(Debug, Default)]
struct SessionCounters {
    total: usize,
    processed: usize,
    completed: usize,
    failed: usize,
    blocked: usize,
    current_task_id: Option<String>,
}

enum Outcome {
    Completed,
    Failed,
    Cancelled,
}

/// Clears the running flag however `run_all_pending` exits.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct RalphEngine {
    store: Arc<dyn TaskStore>,
    run_store: RunStore,
    provider: RwLock<Option<Arc<dyn AgentProvider>>>,
    notifier: Arc<dyn Notifier>,
    settings: EngineSettings,
    events: Arc<EventBus>,
    running: AtomicBool,
    paused: AtomicBool,
    stop_requested: AtomicBool,
    session: Mutex<SessionCounters>,
}

impl RalphEngine {
    pub fn new(store: Arc<dyn TaskStore>, run_store: RunStore, settings: EngineSettings) -> Self {
        Self {
            store,
            run_store,
            provider: RwLock::new(None),
            notifier: Arc::new(TracingNotifier),
            settings,
            events: Arc::new(EventBus::new()),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            session: Mutex::new(SessionCounters::default()),
        }
    }

    pub fn with_provider(self, provider: Arc<dyn AgentProvider>) -> Self {
        self.set_provider(provider);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn set_provider(&self, provider: Arc<dyn AgentProvider>) {
        let mut slot = self
            .provider
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(provider);
    }

    pub fn provider(&self) -> Option<Arc<dyn AgentProvider>> {
        self.provider
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> EngineResult<Subscription> {
        self.events.subscribe()
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Hold off picking the next task. The in-flight task keeps running.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("ralph paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("ralph resumed");
        }
    }

    /// Stop after the current task and cancel the provider so the in-flight
    /// agent process is killed now.
    pub fn stop(&self) {
        if !self.is_running() {
            return;
        }
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            info!("stop requested");
        }
        if let Some(provider) = self.provider() {
            provider.cancel();
        }
    }

    pub fn progress(&self) -> EngineProgress {
        let status = if !self.is_running() {
            EngineStatus::Idle
        } else if self.stop_requested.load(Ordering::SeqCst) {
            EngineStatus::Stopping
        } else if self.paused.load(Ordering::SeqCst) {
            EngineStatus::Paused
        } else {
            EngineStatus::Running
        };

        let session = self.session();
        EngineProgress {
            total: session.total,
            completed: session.completed,
            failed: session.failed,
            blocked: session.blocked,
            processed: session.processed,
            current_task_id: session.current_task_id.clone(),
            status,
        }
    }

    /// Work through every runnable `todo` task.
    ///
    /// Fails fast only when no provider is configured, the provider is not
    /// ready, the engine is already running, or the board cannot be read.
    pub async fn run_all_pending(&self, options: RunOptions) -> EngineResult<RalphRunResult> {
        let provider = self.provider().ok_or(EngineError::NoProvider)?;

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);
        self.stop_requested.store(false, Ordering::SeqCst);
        provider.clear_cancel();

        if !provider.is_ready().await {
            return Err(EngineError::ProviderNotReady(provider.name().to_string()));
        }

        let tasks = self.store.get_tasks().await?;
        let total = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Todo)
            .count();
        *self.session() = SessionCounters {
            total,
            ..SessionCounters::default()
        };

        let max_attempts = options
            .max_attempts
            .unwrap_or(self.settings.max_attempts)
            .max(1);

        info!(
            provider = provider.name(),
            total, max_attempts, "ralph started"
        );
        self.sync_state(SessionStatePatch {
            ralph_running: Some(true),
            ralph_paused: Some(self.paused.load(Ordering::SeqCst)),
            current_task_id: Some(None),
        })
        .await;
        self.events.emit(
            EngineEvent::new(EngineEventKind::Start)
                .with_data(json!({ "total": total, "maxAttempts": max_attempts })),
        );
        self.log_activity("ralph_start", json!({ "total": total })).await;

        let stopped_reason = self
            .drive(provider.as_ref(), max_attempts, options.max_tasks)
            .await;

        let result = {
            let mut session = self.session();
            session.current_task_id = None;
            RalphRunResult {
                success: !self.stop_requested.load(Ordering::SeqCst)
                    && session.failed == 0
                    && session.blocked == 0,
                processed: session.processed,
                completed: session.completed,
                failed: session.failed,
                blocked: session.blocked,
                stopped_reason,
            }
        };

        self.sync_state(SessionStatePatch {
            ralph_running: Some(false),
            current_task_id: Some(None),
            ..Default::default()
        })
        .await;
        info!(
            processed = result.processed,
            completed = result.completed,
            failed = result.failed,
            blocked = result.blocked,
            success = result.success,
            "ralph finished"
        );
        let data = serde_json::to_value(&result).ok();
        self.log_activity("ralph_complete", data.clone().unwrap_or_default())
            .await;
        let mut event = EngineEvent::new(EngineEventKind::Complete);
        event.data = data;
        self.events.emit(event);

        Ok(result)
    }

    async fn drive(
        &self,
        provider: &dyn AgentProvider,
        max_attempts: u32,
        max_tasks: Option<usize>,
    ) -> Option<String> {
        let mut blocked_ids: HashSet<String> = HashSet::new();

        loop {
            self.wait_while_paused().await;

            if self.stop_requested.load(Ordering::SeqCst) {
                self.events.emit(EngineEvent::new(EngineEventKind::Stop));
                return Some(STOPPED_BY_USER.to_string());
            }

            if let Some(limit) = max_tasks {
                if self.session().processed >= limit {
                    return Some(format!("reached max tasks ({limit})"));
                }
            }

            let tasks = match self.store.get_tasks().await {
                Ok(tasks) => tasks,
                Err(err) => {
                    warn!(error = %err, "failed to read board");
                    return Some(format!("failed to read board: {err}"));
                }
            };

            let plan = build_queue(&tasks, &blocked_ids);
            if plan.queue.is_empty() && plan.dropped.is_empty() {
                return None;
            }

            let Some(task) = next_ready(&plan.queue, &tasks).cloned() else {
                self.block_unschedulable(&plan, &mut blocked_ids);
                return None;
            };

            if task.runtime.attempt_count >= max_attempts {
                self.block_exhausted(&task, max_attempts).await;
                blocked_ids.insert(task.id.clone());
                continue;
            }

            self.session().processed += 1;
            match self.execute_task(provider, &task, max_attempts).await {
                Outcome::Completed => self.session().completed += 1,
                Outcome::Failed => self.session().failed += 1,
                Outcome::Cancelled => {}
            }
        }
    }

    async fn wait_while_paused(&self) {
        if !self.paused.load(Ordering::SeqCst) {
            return;
        }
        self.sync_state(SessionStatePatch {
            ralph_paused: Some(true),
            ..Default::default()
        })
        .await;
        while self.paused.load(Ordering::SeqCst) && !self.stop_requested.load(Ordering::SeqCst) {
            tokio::time::sleep(self.settings.pause_poll_interval).await;
        }
        self.sync_state(SessionStatePatch {
            ralph_paused: Some(false),
            ..Default::default()
        })
        .await;
    }

    /// Nothing queued can run: count every remaining task as blocked once.
    fn block_unschedulable(&self, plan: &QueuePlan, blocked_ids: &mut HashSet<String>) {
        let waiting = plan
            .queue
            .iter()
            .map(|t| (t.id.as_str(), "dependencies not satisfied"));
        let cyclic = plan
            .dropped
            .iter()
            .map(|id| (id.as_str(), "dependency cycle"));

        for (id, reason) in waiting.chain(cyclic) {
            if !blocked_ids.insert(id.to_string()) {
                continue;
            }
            self.session().blocked += 1;
            warn!(task_id = id, reason, "task blocked");
            self.events.emit(
                EngineEvent::for_task(EngineEventKind::TaskBlocked, id)
                    .with_data(json!({ "reason": reason })),
            );
        }
    }

    async fn block_exhausted(&self, task: &Task, max_attempts: u32) {
        let attempts = task.runtime.attempt_count;
        warn!(task_id = %task.id, attempts, max_attempts, "attempt limit reached");

        log_store_error(
            self.store
                .update_task_runtime(&task.id, RuntimePatch::status(RuntimeStatus::Blocked))
                .await,
            &task.id,
            "mark blocked",
        );
        let message = format!(
            "Blocked after {attempts} attempt(s) (limit {max_attempts}). \
             Review the failure comments, add an instruction, then run `ralph reset {}` to retry.",
            task.id
        );
        log_store_error(
            self.store
                .add_typed_comment(
                    &task.id,
                    CommentKind::System,
                    &self.settings.author,
                    &message,
                    None,
                )
                .await,
            &task.id,
            "add comment",
        );

        self.session().blocked += 1;
        self.events.emit(
            EngineEvent::for_task(EngineEventKind::TaskBlocked, task.id.clone())
                .with_data(json!({ "reason": "max_attempts", "attempts": attempts })),
        );
        self.log_activity(
            "task_blocked",
            json!({ "taskId": task.id, "reason": "max_attempts" }),
        )
        .await;
    }

    async fn execute_task(
        &self,
        provider: &dyn AgentProvider,
        task: &Task,
        max_attempts: u32,
    ) -> Outcome {
        let attempt = task.runtime.attempt_count + 1;
        self.session().current_task_id = Some(task.id.clone());
        self.sync_state(SessionStatePatch {
            current_task_id: Some(Some(task.id.clone())),
            ..Default::default()
        })
        .await;
        log_store_error(
            self.store.move_task(&task.id, TaskStatus::Doing).await,
            &task.id,
            "move to doing",
        );

        let outcome = match RunRecorder::start(
            self.store.clone(),
            self.run_store.clone(),
            &task.id,
            ExecutionMode::Autonomous,
        )
        .await
        {
            Ok(recorder) => {
                self.run_with_recorder(provider, task, recorder, attempt, max_attempts)
                    .await
            }
            Err(err) => {
                self.start_failed(task, attempt, max_attempts, &err.to_string())
                    .await
            }
        };

        self.session().current_task_id = None;
        self.sync_state(SessionStatePatch {
            current_task_id: Some(None),
            ..Default::default()
        })
        .await;
        outcome
    }

    async fn run_with_recorder(
        &self,
        provider: &dyn AgentProvider,
        task: &Task,
        mut recorder: RunRecorder,
        attempt: u32,
        max_attempts: u32,
    ) -> Outcome {
        let run_id = recorder.run_id().to_string();
        info!(task_id = %task.id, run_id = %run_id, attempt, max_attempts, "task started");
        self.events.emit(
            EngineEvent::for_task(EngineEventKind::TaskStart, task.id.clone()).with_data(json!({
                "runId": run_id,
                "title": task.title,
                "attempt": attempt,
                "maxAttempts": max_attempts,
            })),
        );

        let events = self.events.clone();
        let chunk_task_id = task.id.clone();
        let request = CompletionRequest::new(prompt::build_messages(task, attempt, max_attempts))
            .with_mode(ExecutionMode::Autonomous)
            .with_chunk_callback(Arc::new(move |chunk: &str| {
                events.emit(
                    EngineEvent::for_task(EngineEventKind::TaskOutput, chunk_task_id.clone())
                        .with_data(json!({ "chunk": chunk })),
                );
            }));

        // Stop may have landed while the run was being set up.
        if self.stop_requested.load(Ordering::SeqCst) {
            return self.cancelled(task, recorder).await;
        }

        let response = match provider.complete(request).await {
            Ok(response) => response,
            Err(ProviderError::Cancelled) => {
                return self.cancelled(task, recorder).await;
            }
            Err(err) => {
                let error = err.to_string();
                return self
                    .fail(task, recorder, attempt, max_attempts, &error, "")
                    .await;
            }
        };

        for activity in &response.tool_activity {
            recorder.record_activity(activity);
        }
        for call in &response.tool_calls {
            recorder.record_tool_call(&call.name, &call.arguments, None, Duration::ZERO);
        }

        if response.is_error() {
            let output = response.raw_content.as_deref().unwrap_or_default();
            return self
                .fail(task, recorder, attempt, max_attempts, &response.content, output)
                .await;
        }

        let summary = self.excerpt_head(&response.content);
        let acceptance = acceptance::evaluate(&task.acceptance_criteria, &response.content);
        let acceptance_note = acceptance.as_ref().map(|report| {
            format!(
                "Acceptance: {}/{} criteria reported met.",
                report.met_count(),
                report.results.len()
            )
        });

        if let Err(err) = recorder.finalize(&summary, true, acceptance, None).await {
            warn!(task_id = %task.id, run_id = %run_id, error = %err, "failed to finalize run");
        }
        log_store_error(
            self.store.move_task(&task.id, TaskStatus::Review).await,
            &task.id,
            "move to review",
        );

        let mut comment = format!("Completed in run {run_id} (attempt {attempt} of {max_attempts}).");
        if let Some(note) = &acceptance_note {
            comment.push_str("\n\n");
            comment.push_str(note);
        }
        if !summary.trim().is_empty() {
            comment.push_str("\n\n");
            comment.push_str(summary.trim());
        }
        log_store_error(
            self.store
                .add_typed_comment(
                    &task.id,
                    CommentKind::Agent,
                    &self.settings.author,
                    &redact_text(&comment),
                    Some(&run_id),
                )
                .await,
            &task.id,
            "add comment",
        );

        info!(task_id = %task.id, run_id = %run_id, "task ready for review");
        self.events.emit(
            EngineEvent::for_task(EngineEventKind::TaskComplete, task.id.clone())
                .with_data(json!({ "runId": run_id, "attempt": attempt })),
        );
        if let Err(err) = self
            .notifier
            .notify(
                "Task ready for review",
                &format!("{}: {}", task.id, task.title),
            )
            .await
        {
            warn!(task_id = %task.id, error = %err, "notification failed");
        }
        self.log_activity(
            "task_complete",
            json!({ "taskId": task.id, "runId": run_id }),
        )
        .await;

        Outcome::Completed
    }

    async fn fail(
        &self,
        task: &Task,
        recorder: RunRecorder,
        attempt: u32,
        max_attempts: u32,
        error: &str,
        output: &str,
    ) -> Outcome {
        let run_id = recorder.run_id().to_string();
        let excerpt = self.excerpt_tail(output);
        if let Err(err) = recorder
            .finalize(&excerpt, false, None, Some(error))
            .await
        {
            warn!(task_id = %task.id, run_id = %run_id, error = %err, "failed to finalize run");
        }
        self.report_failure(task, Some(&run_id), attempt, max_attempts, error, &excerpt)
            .await;
        Outcome::Failed
    }

    async fn start_failed(
        &self,
        task: &Task,
        attempt: u32,
        max_attempts: u32,
        error: &str,
    ) -> Outcome {
        log_store_error(
            self.store
                .update_task_runtime(
                    &task.id,
                    RuntimePatch::status(RuntimeStatus::Failed)
                        .increment_failures()
                        .increment_attempts(),
                )
                .await,
            &task.id,
            "mark failed",
        );
        self.report_failure(task, None, attempt, max_attempts, error, "")
            .await;
        Outcome::Failed
    }

    async fn report_failure(
        &self,
        task: &Task,
        run_id: Option<&str>,
        attempt: u32,
        max_attempts: u32,
        error: &str,
        output: &str,
    ) {
        warn!(task_id = %task.id, run_id, attempt, error, "task failed");
        log_store_error(
            self.store.move_task(&task.id, TaskStatus::Todo).await,
            &task.id,
            "move to todo",
        );

        let mut comment = match run_id {
            Some(run_id) => format!("Run {run_id} failed (attempt {attempt} of {max_attempts})."),
            None => format!("Attempt {attempt} of {max_attempts} failed before a run could start."),
        };
        comment.push_str(&format!("\n\nError: {}", error.trim()));
        if !output.trim().is_empty() {
            comment.push_str(&format!("\n\nOutput:\n{}", output.trim()));
        }
        comment.push_str(&format!("\n\nHint: {}", remediation_hint(error)));

        log_store_error(
            self.store
                .add_typed_comment(
                    &task.id,
                    CommentKind::Failure,
                    &self.settings.author,
                    &redact_text(&comment),
                    run_id,
                )
                .await,
            &task.id,
            "add comment",
        );

        self.events.emit(
            EngineEvent::for_task(EngineEventKind::TaskFailed, task.id.clone()).with_data(json!({
                "runId": run_id,
                "attempt": attempt,
                "error": redact_text(error),
            })),
        );
        self.log_activity(
            "task_failed",
            json!({ "taskId": task.id, "runId": run_id, "attempt": attempt }),
        )
        .await;
    }

    async fn cancelled(&self, task: &Task, recorder: RunRecorder) -> Outcome {
        let run_id = recorder.run_id().to_string();
        info!(task_id = %task.id, run_id = %run_id, "run cancelled");
        if let Err(err) = recorder.cancel(STOPPED_BY_USER).await {
            warn!(task_id = %task.id, run_id = %run_id, error = %err, "failed to cancel run");
        }
        log_store_error(
            self.store.move_task(&task.id, TaskStatus::Todo).await,
            &task.id,
            "move to todo",
        );
        log_store_error(
            self.store
                .add_typed_comment(
                    &task.id,
                    CommentKind::System,
                    &self.settings.author,
                    &format!("Run {run_id} was cancelled; the attempt was not counted."),
                    Some(&run_id),
                )
                .await,
            &task.id,
            "add comment",
        );
        Outcome::Cancelled
    }

    fn excerpt_head(&self, text: &str) -> String {
        truncate_chars(text.trim(), self.settings.output_excerpt_chars)
    }

    /// Failures usually explain themselves at the end of the output.
    fn excerpt_tail(&self, text: &str) -> String {
        let text = text.trim();
        let max = self.settings.output_excerpt_chars;
        let count = text.chars().count();
        if count <= max {
            return text.to_string();
        }
        let tail: String = text.chars().skip(count - max).collect();
        format!("…{tail}")
    }

    fn session(&self) -> MutexGuard<'_, SessionCounters> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn sync_state(&self, patch: SessionStatePatch) {
        if let Err(err) = self.store.set_state(patch).await {
            warn!(error = %err, "failed to update session state");
        }
    }

    async fn log_activity(&self, kind: &str, data: serde_json::Value) {
        if let Err(err) = self.store.log_activity(kind, data).await {
            debug!(kind, error = %err, "failed to log activity");
        }
    }
}

fn log_store_error<T>(result: StoreResult<T>, task_id: &str, action: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(task_id, action, error = %err, "task store update failed");
            None
        }
    }
}

/// A short suggestion appended to failure comments.
pub fn remediation_hint(error: &str) -> &'static str {
    let error = error.to_lowercase();
    if error.contains("timed out") {
        "The agent ran out of time. Split the task into smaller pieces or raise the timeout."
    } else if error.contains("failed to start") || error.contains("on path") {
        "Check that the agent CLI is installed, on PATH, and authenticated."
    } else if error.contains("rate limit") || error.contains("quota") || error.contains("usage limit")
    {
        "The provider is rate limited. Wait before retrying."
    } else {
        "Add an instruction comment with guidance before the next attempt."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remediation_hint_matches_error_class() {
        assert!(remediation_hint("claude timed out after 300s").contains("timeout"));
        assert!(remediation_hint("Failed to start codex ('codex')").contains("installed"));
        assert!(remediation_hint("429: Rate limit exceeded").contains("rate limited"));
        assert!(remediation_hint("exited with code 1").contains("instruction"));
    }

    #[test]
    fn test_run_result_serializes_camel_case() {
        let result = RalphRunResult {
            success: false,
            processed: 1,
            stopped_reason: Some(STOPPED_BY_USER.to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&result).expect("json");
        assert_eq!(value["stoppedReason"], json!("stopped by user"));
        assert_eq!(value["processed"], json!(1));
    }

    #[test]
    fn test_idle_engine_reports_idle_progress() {
        let temp_dir = tempfile::TempDir::new().expect("temp dir");
        let engine = RalphEngine::new(
            Arc::new(crate::task::InMemoryTaskStore::new()),
            RunStore::new(temp_dir.path()).expect("run store"),
            EngineSettings::default(),
        );
        engine.stop();
        let progress = engine.progress();
        assert_eq!(progress.status, EngineStatus::Idle);
        assert_eq!(progress.total, 0);
    }
}
