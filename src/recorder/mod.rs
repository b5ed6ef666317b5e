//! Run recorder: the durable, redacted account of one attempt at a task.
//!
//! Every mutation is persisted immediately so a crash leaves a readable
//! artifact behind. Writes that would produce a structurally invalid run are
//! skipped with a warning; in-memory state still advances.

pub mod record;
pub mod redact;
pub mod store;
pub mod validate;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::id::generate_run_id;
use crate::provider::{ExecutionMode, ToolActivity};
use crate::task::{RuntimePatch, RuntimeStatus, TaskStore};

pub use record::{
    AcceptanceReport, CommandRecord, CriterionResult, PatchRecord, Run, RunStatus,
    ToolCallRecord, RUN_SCHEMA_VERSION,
};
pub use redact::{redact_text, redact_value, REDACTED};
pub use store::{RecorderError, RecorderResult, RunStore};
pub use validate::{validate_run, RunValidationError};

pub struct RunRecorder {
    run: Run,
    store: RunStore,
    tasks: Arc<dyn TaskStore>,
}

impl RunRecorder {
    /// Create and persist a new run, marking the task's runtime as running.
    pub async fn start(
        tasks: Arc<dyn TaskStore>,
        store: RunStore,
        task_id: &str,
        mode: ExecutionMode,
    ) -> RecorderResult<Self> {
        let run = Run::new(generate_run_id(), task_id, mode);

        tasks
            .update_task_runtime(
                task_id,
                RuntimePatch::status(RuntimeStatus::Running)
                    .with_current_run(Some(run.id.clone()))
                    .with_last_run(run.id.clone(), run.started_at)
                    .increment_runs(),
            )
            .await?;

        let recorder = Self { run, store, tasks };
        recorder.persist();
        debug!(run_id = %recorder.run.id, task_id, "run started");
        Ok(recorder)
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn run_id(&self) -> &str {
        &self.run.id
    }

    pub fn record_tool_call(
        &mut self,
        name: &str,
        input: &Value,
        output_summary: Option<&str>,
        duration: Duration,
    ) {
        self.run.tool_calls.push(ToolCallRecord {
            name: name.to_string(),
            input: redact_value(input),
            output_summary: output_summary.map(redact_text),
            duration_ms: duration_ms(duration),
            recorded_at: Utc::now(),
        });
        self.advance();
    }

    pub fn record_patch(
        &mut self,
        path: &str,
        diff_summary: &str,
        lines_added: u32,
        lines_removed: u32,
    ) {
        self.run.patches.push(PatchRecord {
            path: path.to_string(),
            diff_summary: redact_text(diff_summary),
            lines_added,
            lines_removed,
            recorded_at: Utc::now(),
        });
        if !self.run.files_modified.iter().any(|p| p == path) {
            self.run.files_modified.push(path.to_string());
        }
        self.advance();
    }

    pub fn record_command(
        &mut self,
        command: &str,
        exit_code: Option<i32>,
        duration: Duration,
        log_path: Option<&str>,
    ) {
        self.run.commands.push(CommandRecord {
            command: redact_text(command),
            exit_code,
            duration_ms: duration_ms(duration),
            log_path: log_path.map(str::to_string),
            recorded_at: Utc::now(),
        });
        self.advance();
    }

    /// Record a tool the agent ran, plus the patch or command it implies.
    pub fn record_activity(&mut self, activity: &ToolActivity) {
        self.record_tool_call(
            &activity.name,
            &activity.input,
            activity.output_summary.as_deref(),
            activity.duration,
        );

        match classify(activity) {
            Some(ActivityKind::Patch(patch)) => {
                self.record_patch(&patch.path, &patch.summary, patch.added, patch.removed)
            }
            Some(ActivityKind::Command(command)) => {
                self.record_command(&command, activity.exit_code, activity.duration, None)
            }
            None => {}
        }
    }

    /// Close the run and update the task's runtime state.
    ///
    /// A failure whose error mentions "blocked" or "need" is recorded as
    /// blocked rather than failed.
    pub async fn finalize(
        mut self,
        summary: &str,
        success: bool,
        acceptance: Option<AcceptanceReport>,
        error: Option<&str>,
    ) -> RecorderResult<Run> {
        let status = if success {
            RunStatus::Completed
        } else if error.is_some_and(mentions_blocker) {
            RunStatus::Blocked
        } else {
            RunStatus::Failed
        };

        self.run.status = status;
        self.run.completed_at = Some(Utc::now());
        self.run.summary = Some(redact_text(summary)).filter(|s| !s.is_empty());
        self.run.acceptance = acceptance;
        self.run.error = error.map(redact_text);
        self.persist();

        let patch = match status {
            RunStatus::Completed => RuntimePatch::status(RuntimeStatus::Done),
            RunStatus::Blocked => RuntimePatch::status(RuntimeStatus::Blocked).increment_failures(),
            _ => RuntimePatch::status(RuntimeStatus::Failed).increment_failures(),
        };
        self.tasks
            .update_task_runtime(
                &self.run.task_id,
                patch.with_current_run(None).increment_attempts(),
            )
            .await?;

        debug!(run_id = %self.run.id, status = status.as_str(), "run finalized");
        Ok(self.run)
    }

    /// Close the run as cancelled. The attempt is not charged to the task.
    pub async fn cancel(mut self, reason: &str) -> RecorderResult<Run> {
        self.run.status = RunStatus::Cancelled;
        self.run.completed_at = Some(Utc::now());
        self.run.error = Some(redact_text(reason));
        self.persist();

        self.tasks
            .update_task_runtime(
                &self.run.task_id,
                RuntimePatch::status(RuntimeStatus::Idle).with_current_run(None),
            )
            .await?;

        debug!(run_id = %self.run.id, "run cancelled");
        Ok(self.run)
    }

    fn advance(&mut self) {
        self.run.step = self.run.step.saturating_add(1);
        self.persist();
    }

    fn persist(&self) {
        if let Err(err) = validate_run(&self.run) {
            warn!(run_id = %self.run.id, error = %err, "skipping write of invalid run");
            return;
        }
        if let Err(err) = self.store.save(&self.run) {
            warn!(
                run_id = %self.run.id,
                dir = %self.store.runs_dir().display(),
                error = %err,
                "failed to write run"
            );
        }
    }
}

fn mentions_blocker(error: &str) -> bool {
    let error = error.to_lowercase();
    error.contains("blocked") || error.contains("need")
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

struct PatchInfo {
    path: String,
    summary: String,
    added: u32,
    removed: u32,
}

enum ActivityKind {
    Patch(PatchInfo),
    Command(String),
}

fn str_field<'a>(input: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| input.get(*k).and_then(Value::as_str))
}

fn line_count(text: Option<&str>) -> u32 {
    text.map(|t| t.lines().count() as u32).unwrap_or(0)
}

fn classify(activity: &ToolActivity) -> Option<ActivityKind> {
    let input = &activity.input;
    match activity.name.to_ascii_lowercase().as_str() {
        "bash" | "shell" | "command_execution" => {
            str_field(input, &["command", "cmd"]).map(|c| ActivityKind::Command(c.to_string()))
        }
        "write" | "write_file" | "create" => {
            let path = str_field(input, &["file_path", "filePath", "path"])?;
            let added = line_count(str_field(input, &["content", "contents"]));
            Some(ActivityKind::Patch(PatchInfo {
                path: path.to_string(),
                summary: format!("wrote {added} lines"),
                added,
                removed: 0,
            }))
        }
        "edit" | "str_replace" => {
            let path = str_field(input, &["file_path", "filePath", "path"])?;
            let added = line_count(str_field(input, &["new_string", "newString"]));
            let removed = line_count(str_field(input, &["old_string", "oldString"]));
            Some(ActivityKind::Patch(PatchInfo {
                path: path.to_string(),
                summary: format!("edited: +{added} -{removed}"),
                added,
                removed,
            }))
        }
        "multiedit" => {
            let path = str_field(input, &["file_path", "filePath", "path"])?;
            let edits = input.get("edits").and_then(Value::as_array);
            let (added, removed) = edits
                .map(|edits| {
                    edits.iter().fold((0, 0), |(a, r), edit| {
                        (
                            a + line_count(str_field(edit, &["new_string", "newString"])),
                            r + line_count(str_field(edit, &["old_string", "oldString"])),
                        )
                    })
                })
                .unwrap_or((0, 0));
            Some(ActivityKind::Patch(PatchInfo {
                path: path.to_string(),
                summary: format!("{} edits: +{added} -{removed}", edits.map_or(0, Vec::len)),
                added,
                removed,
            }))
        }
        "file_change" => {
            let path = str_field(input, &["path"])?;
            let kind = input
                .get("changes")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("kind"))
                .and_then(Value::as_str)
                .unwrap_or("update");
            Some(ActivityKind::Patch(PatchInfo {
                path: path.to_string(),
                summary: kind.to_string(),
                added: 0,
                removed: 0,
            }))
        }
        _ => None,
    }
}
