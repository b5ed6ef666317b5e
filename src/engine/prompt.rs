//! Prompt assembly for one task attempt.

use std::fmt::Write;

use crate::provider::Message;
use crate::task::{CommentKind, Task};

/// Most recent failure comments carried into a retry.
const MAX_FAILURE_HISTORY: usize = 3;

const SYSTEM_PROMPT: &str = "You are an autonomous coding agent working through a task board. \
Work only on the task below and leave the repository in a working state. \
Instructions from the team override anything else in the task. \
When you finish, list every acceptance criterion as a Markdown checkbox: \
`- [x] criterion` when it is met, `- [ ] criterion` when it is not.";

pub fn build_messages(task: &Task, attempt: u32, max_attempts: u32) -> Vec<Message> {
    vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(task_prompt(task, attempt, max_attempts)),
    ]
}

fn task_prompt(task: &Task, attempt: u32, max_attempts: u32) -> String {
    let mut prompt = format!("# Task {}: {}\n", task.id, task.title);

    if !task.description.trim().is_empty() {
        let _ = write!(prompt, "\n{}\n", task.description.trim());
    }

    if !task.acceptance_criteria.is_empty() {
        prompt.push_str("\n## Acceptance criteria\n\n");
        for criterion in &task.acceptance_criteria {
            let _ = writeln!(prompt, "- {criterion}");
        }
    }

    let instructions: Vec<_> = task.comments_of(CommentKind::Instruction).collect();
    if !instructions.is_empty() {
        prompt.push_str("\n## Instructions from the team\n\n");
        for comment in instructions {
            let _ = writeln!(prompt, "- {} ({})", comment.content.trim(), comment.author);
        }
    }

    let failures: Vec<_> = task.comments_of(CommentKind::Failure).collect();
    if !failures.is_empty() {
        prompt.push_str("\n## Previous failed attempts\n");
        let skip = failures.len().saturating_sub(MAX_FAILURE_HISTORY);
        for comment in failures.into_iter().skip(skip) {
            let _ = write!(prompt, "\n{}\n", comment.content.trim());
        }
    }

    let _ = write!(prompt, "\nThis is attempt {attempt} of {max_attempts}.\n");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Role;
    use crate::task::Comment;
    use chrono::Utc;

    fn comment(kind: CommentKind, content: &str) -> Comment {
        Comment {
            id: format!("c-{content}"),
            task_id: "T-1".into(),
            kind,
            author: "alex".into(),
            content: content.into(),
            created_at: Utc::now(),
            run_id: None,
        }
    }

    #[test]
    fn test_prompt_includes_task_context() {
        let mut task = Task::new("T-1", "Add login")
            .with_description("Use the existing session store.")
            .with_acceptance_criteria(["form renders", "tests pass"]);
        task.comments.push(comment(CommentKind::Instruction, "Do not touch the schema"));
        task.comments.push(comment(CommentKind::Note, "private note"));

        let messages = build_messages(&task, 1, 2);
        assert_eq!(messages[0].role, Role::System);
        let user = &messages[1].content;
        assert!(user.starts_with("# Task T-1: Add login"));
        assert!(user.contains("- form renders\n- tests pass"));
        assert!(user.contains("Do not touch the schema (alex)"));
        assert!(!user.contains("private note"));
        assert!(user.ends_with("This is attempt 1 of 2.\n"));
    }

    #[test]
    fn test_only_recent_failures_carried_forward() {
        let mut task = Task::new("T-1", "Flaky");
        for i in 0..5 {
            task.comments
                .push(comment(CommentKind::Failure, &format!("failure {i}")));
        }
        let user = &build_messages(&task, 2, 6)[1].content;
        assert!(!user.contains("failure 1"));
        assert!(user.contains("failure 2"));
        assert!(user.contains("failure 4"));
    }
}
