//! Structural checks a run must pass before it is written.

use std::collections::HashSet;
use std::fmt;

use crate::recorder::record::{Run, RUN_SCHEMA_VERSION};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunValidationError {
    pub violations: Vec<String>,
}

impl fmt::Display for RunValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid run: {}", self.violations.join("; "))
    }
}

impl std::error::Error for RunValidationError {}

pub fn validate_run(run: &Run) -> Result<(), RunValidationError> {
    let mut violations = Vec::new();

    if run.schema_version != RUN_SCHEMA_VERSION {
        violations.push(format!(
            "unsupported schema version {} (expected {})",
            run.schema_version, RUN_SCHEMA_VERSION
        ));
    }
    if run.id.trim().is_empty() {
        violations.push("run id is empty".to_string());
    }
    if run.task_id.trim().is_empty() {
        violations.push("task id is empty".to_string());
    }

    match (run.status.is_terminal(), run.completed_at) {
        (true, None) => violations.push(format!(
            "{} run has no completion time",
            run.status.as_str()
        )),
        (false, Some(_)) => violations.push("running run has a completion time".to_string()),
        (true, Some(completed_at)) if completed_at < run.started_at => {
            violations.push("run completed before it started".to_string())
        }
        _ => {}
    }

    if run.step as usize != run.record_count() {
        violations.push(format!(
            "step {} does not match {} recorded entries",
            run.step,
            run.record_count()
        ));
    }
    if run.tool_calls.iter().any(|c| c.name.trim().is_empty()) {
        violations.push("tool call without a name".to_string());
    }
    if run.commands.iter().any(|c| c.command.trim().is_empty()) {
        violations.push("empty command".to_string());
    }
    if run.patches.iter().any(|p| p.path.trim().is_empty()) {
        violations.push("patch without a path".to_string());
    }

    let mut seen = HashSet::new();
    if !run.files_modified.iter().all(|path| seen.insert(path)) {
        violations.push("files_modified contains duplicates".to_string());
    }
    if let Some(acceptance) = &run.acceptance {
        if acceptance.results.iter().any(|r| r.criterion.trim().is_empty()) {
            violations.push("acceptance result without a criterion".to_string());
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(RunValidationError { violations })
    }
}
