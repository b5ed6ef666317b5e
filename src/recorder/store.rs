use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::debug;

use crate::recorder::record::Run;
use crate::task::StoreError;

const RUN_FILE_EXTENSION: &str = "json";

/// Errors that can occur while persisting or loading runs.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid identifier: {0:?}")]
    InvalidId(String),

    #[error("Task store error: {0}")]
    Store(#[from] StoreError),
}

pub type RecorderResult<T> = Result<T, RecorderError>;

/// Run artifacts on the local filesystem, one JSON file per run at
/// `<runs_dir>/<task_dir>/<run_id>.json`, where `task_dir` is the task id
/// with path-unsafe bytes percent-encoded.
#[derive(Debug, Clone)]
pub struct RunStore {
    runs_dir: PathBuf,
}

impl RunStore {
    pub fn new(runs_dir: impl Into<PathBuf>) -> RecorderResult<Self> {
        let runs_dir = runs_dir.into();
        fs::create_dir_all(&runs_dir)?;
        Ok(Self { runs_dir })
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    pub fn path_for(&self, task_id: &str, run_id: &str) -> RecorderResult<PathBuf> {
        let task_dir = task_dir_name(task_id)?;
        check_id(run_id)?;
        Ok(self
            .runs_dir
            .join(task_dir)
            .join(format!("{}.{}", run_id, RUN_FILE_EXTENSION)))
    }

    /// Rewrite the run's file atomically.
    pub fn save(&self, run: &Run) -> RecorderResult<PathBuf> {
        let path = self.path_for(&run.task_id, &run.id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(run)?;
        let temp_path = path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, &path)?;

        Ok(path)
    }

    pub fn load(&self, task_id: &str, run_id: &str) -> RecorderResult<Option<Run>> {
        let path = self.path_for(task_id, run_id)?;
        read_run(&path)
    }

    /// All runs of a task, oldest first.
    pub fn list_for_task(&self, task_id: &str) -> RecorderResult<Vec<Run>> {
        let task_dir = self.runs_dir.join(task_dir_name(task_id)?);
        let entries = match fs::read_dir(&task_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(RecorderError::Io(err)),
        };

        let mut runs = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RUN_FILE_EXTENSION) {
                continue;
            }
            if let Some(run) = read_run(&path)? {
                runs.push(run);
            }
        }
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        Ok(runs)
    }

    /// Delete finished runs that started more than `retention_days` ago.
    /// Zero disables pruning.
    pub fn enforce_retention(&self, retention_days: u64) -> RecorderResult<usize> {
        if retention_days == 0 {
            return Ok(0);
        }

        let cutoff = Utc::now() - Duration::days(retention_days as i64);
        let mut deleted = 0;

        for task_entry in fs::read_dir(&self.runs_dir)? {
            let task_entry = task_entry?;
            if !task_entry.file_type()?.is_dir() {
                continue;
            }
            for run_entry in fs::read_dir(task_entry.path())? {
                let path = run_entry?.path();
                let Ok(Some(run)) = read_run(&path) else {
                    continue;
                };
                if run.status.is_terminal() && run.started_at < cutoff {
                    fs::remove_file(&path)?;
                    deleted += 1;
                }
            }
        }

        if deleted > 0 {
            debug!(deleted, "pruned expired runs");
        }
        Ok(deleted)
    }
}

fn read_run(path: &Path) -> RecorderResult<Option<Run>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(RecorderError::Io(err)),
    }
}

/// Directory name for a task id. Ids like `feat/login` are board keys, not
/// paths; every byte outside `[A-Za-z0-9_-]` (and a leading `.`) becomes
/// `%XX`, so distinct ids never share a directory.
fn task_dir_name(task_id: &str) -> RecorderResult<String> {
    if task_id.trim().is_empty() {
        return Err(RecorderError::InvalidId(task_id.to_string()));
    }
    let mut name = String::with_capacity(task_id.len());
    for (i, byte) in task_id.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' || (byte == b'.' && i > 0);
        if keep {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("%{byte:02X}"));
        }
    }
    Ok(name)
}

fn check_id(id: &str) -> RecorderResult<()> {
    let valid = !id.trim().is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\'])
        && !id.contains('\0');
    if valid {
        Ok(())
    } else {
        Err(RecorderError::InvalidId(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ExecutionMode;
    use crate::recorder::record::RunStatus;
    use tempfile::TempDir;

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = RunStore::new(temp_dir.path().join("runs")).expect("store");
        let run = Run::new("run-1", "T-1", ExecutionMode::Autonomous);

        let path = store.save(&run).expect("save");
        assert!(path.ends_with("T-1/run-1.json"));
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = store.load("T-1", "run-1").expect("load").expect("run");
        assert_eq!(loaded, run);
        assert!(store.load("T-1", "run-2").expect("load").is_none());
    }

    #[test]
    fn test_list_for_task_orders_by_start() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = RunStore::new(temp_dir.path()).expect("store");

        let mut later = Run::new("run-b", "T-1", ExecutionMode::Autonomous);
        let mut earlier = Run::new("run-a", "T-1", ExecutionMode::Manual);
        earlier.started_at = later.started_at - Duration::minutes(5);
        later.status = RunStatus::Failed;
        store.save(&later).expect("save");
        store.save(&earlier).expect("save");
        store
            .save(&Run::new("run-c", "T-2", ExecutionMode::Autonomous))
            .expect("save");

        let runs = store.list_for_task("T-1").expect("list");
        let ids: Vec<_> = runs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["run-a", "run-b"]);
        assert!(store.list_for_task("T-9").expect("list").is_empty());
    }

    #[test]
    fn test_task_ids_stay_inside_runs_dir() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = RunStore::new(temp_dir.path()).expect("store");

        let path = store.path_for("../etc", "run-1").expect("encoded");
        assert!(path.starts_with(temp_dir.path()));
        assert!(path.ends_with("%2E.%2Fetc/run-1.json"));
        assert!(store.path_for("..", "run-1").expect("encoded").ends_with("%2E./run-1.json"));

        assert!(matches!(store.path_for("", "run-1"), Err(RecorderError::InvalidId(_))));
        assert!(store.path_for("T-1", "..").is_err());
    }

    #[test]
    fn test_slash_in_task_id_round_trips() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = RunStore::new(temp_dir.path()).expect("store");

        store
            .save(&Run::new("run-1", "feat/login", ExecutionMode::Autonomous))
            .expect("save");
        store
            .save(&Run::new("run-2", "feat%2Flogin", ExecutionMode::Autonomous))
            .expect("save");

        let runs = store.list_for_task("feat/login").expect("list");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].task_id, "feat/login");
        assert_eq!(store.list_for_task("feat%2Flogin").expect("list").len(), 1);
        assert!(store.list_for_task("feat").expect("list").is_empty());
    }

    #[test]
    fn test_enforce_retention_deletes_only_old_finished_runs() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = RunStore::new(temp_dir.path()).expect("store");

        let mut old = Run::new("run-old", "T-1", ExecutionMode::Autonomous);
        old.started_at = Utc::now() - Duration::days(45);
        old.completed_at = Some(old.started_at + Duration::minutes(1));
        old.status = RunStatus::Completed;
        store.save(&old).expect("save");

        let mut stuck = Run::new("run-stuck", "T-1", ExecutionMode::Autonomous);
        stuck.started_at = Utc::now() - Duration::days(45);
        store.save(&stuck).expect("save");

        store
            .save(&Run::new("run-new", "T-1", ExecutionMode::Autonomous))
            .expect("save");

        assert_eq!(store.enforce_retention(0).expect("disabled"), 0);
        assert_eq!(store.enforce_retention(30).expect("retention"), 1);
        let remaining: Vec<_> = store
            .list_for_task("T-1")
            .expect("list")
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(remaining, vec!["run-stuck", "run-new"]);
    }
}
