//! Task board data model and the store interface the engine consumes.

pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use store::{
    Board, InMemoryTaskStore, JsonTaskStore, RuntimePatch, SessionState, SessionStatePatch,
    StoreError, StoreResult, TaskStore,
};

/// Kanban column a task sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Backlog,
    Todo,
    Doing,
    Review,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::Todo => "todo",
            TaskStatus::Doing => "doing",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
        }
    }
}

/// Task priority. Ordering is by urgency: `Critical` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Scheduling rank; lower runs first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

/// Execution state of a task, owned by the engine and the run recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    #[default]
    Idle,
    Running,
    Blocked,
    Done,
    Failed,
}

impl RuntimeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeStatus::Idle => "idle",
            RuntimeStatus::Running => "running",
            RuntimeStatus::Blocked => "blocked",
            RuntimeStatus::Done => "done",
            RuntimeStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeState {
    #[serde(default)]
    pub status: RuntimeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_count: u32,
    #[serde(default)]
    pub failure_count: u32,
    /// Concluded executions (success or failure) charged against the
    /// attempt limit. Cancelled runs are never charged.
    #[serde(default)]
    pub attempt_count: u32,
}

/// Comment category. Failure comments carry retry context into later
/// prompts; instruction comments are treated as authoritative overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentKind {
    Note,
    Instruction,
    Failure,
    Agent,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub task_id: String,
    #[serde(rename = "type")]
    pub kind: CommentKind,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default, alias = "dependencies")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub runtime: RuntimeState,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Todo,
            priority: Priority::default(),
            acceptance_criteria: Vec::new(),
            depends_on: Vec::new(),
            comments: Vec::new(),
            runtime: RuntimeState::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_acceptance_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.acceptance_criteria = criteria.into_iter().map(Into::into).collect();
        self
    }

    pub fn comments_of(&self, kind: CommentKind) -> impl Iterator<Item = &Comment> {
        self.comments.iter().filter(move |c| c.kind == kind)
    }

    /// Finished as far as dependents are concerned: in the `done` column, or
    /// completed by the agent and waiting for review.
    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done || self.runtime.status == RuntimeStatus::Done
    }
}

/// True when every dependency resolves to an existing task that is done.
/// Unknown dependency ids keep the task unready.
pub fn dependencies_met(task: &Task, all: &[Task]) -> bool {
    task.depends_on.iter().all(|dep_id| {
        all.iter()
            .find(|t| t.id == *dep_id)
            .map(Task::is_done)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_rank_puts_critical_first() {
        let mut priorities = vec![
            Priority::Low,
            Priority::Critical,
            Priority::Medium,
            Priority::High,
        ];
        priorities.sort_by_key(|p| p.rank());
        assert_eq!(
            priorities,
            vec![
                Priority::Critical,
                Priority::High,
                Priority::Medium,
                Priority::Low
            ]
        );
    }

    #[test]
    fn test_dependencies_met_requires_done() {
        let a = Task::new("A", "a").with_status(TaskStatus::Review);
        let b = Task::new("B", "b").with_dependencies(["A"]);
        let mut all = vec![a, b.clone()];
        assert!(!dependencies_met(&b, &all));

        all[0].status = TaskStatus::Done;
        assert!(dependencies_met(&b, &all));
    }

    #[test]
    fn test_agent_completed_dependency_counts_as_done() {
        let mut a = Task::new("A", "a").with_status(TaskStatus::Review);
        a.runtime.status = RuntimeStatus::Done;
        let b = Task::new("B", "b").with_dependencies(["A"]);
        assert!(dependencies_met(&b, &[a, b.clone()]));
    }

    #[test]
    fn test_missing_dependency_is_never_met() {
        let b = Task::new("B", "b").with_dependencies(["ghost"]);
        assert!(!dependencies_met(&b, std::slice::from_ref(&b)));
    }

    #[test]
    fn test_task_deserializes_board_json() {
        let json = r#"{
            "id": "T-1",
            "title": "Add login",
            "status": "todo",
            "priority": "critical",
            "acceptanceCriteria": ["form renders"],
            "dependsOn": ["T-0"],
            "comments": [{
                "id": "c1",
                "taskId": "T-1",
                "type": "instruction",
                "author": "me",
                "content": "use OAuth",
                "createdAt": "2024-01-01T00:00:00Z"
            }]
        }"#;

        let task: Task = serde_json::from_str(json).expect("task");
        assert_eq!(task.priority, Priority::Critical);
        assert_eq!(task.depends_on, vec!["T-0".to_string()]);
        assert_eq!(task.runtime.status, RuntimeStatus::Idle);
        assert_eq!(task.comments_of(CommentKind::Instruction).count(), 1);
    }
}
