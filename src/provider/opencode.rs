//! OpenCode backend (`opencode run --format json`).

use std::collections::HashSet;

use serde_json::Value;

use crate::provider::cli::CliBackend;
use crate::provider::stream::{StreamEvent, StreamParser, TimeoutPolicy};
use crate::provider::{ExecutionMode, ProviderSettings};

pub struct OpenCodeBackend {
    program: String,
    model: Option<String>,
    wall: std::time::Duration,
}

impl OpenCodeBackend {
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            program: settings
                .program
                .clone()
                .unwrap_or_else(|| "opencode".to_string()),
            model: settings.model.clone(),
            wall: settings.timeouts.opencode_wall,
        }
    }
}

impl CliBackend for OpenCodeBackend {
    fn name(&self) -> &'static str {
        "opencode"
    }

    fn program(&self) -> &str {
        &self.program
    }

    fn args(&self, _mode: ExecutionMode) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--format".to_string(),
            "json".to_string(),
        ];
        if let Some(model) = &self.model {
            args.extend(["--model".to_string(), model.clone()]);
        }
        args
    }

    fn timeout(&self) -> TimeoutPolicy {
        TimeoutPolicy::WallClock(self.wall)
    }

    fn parser(&self) -> Box<dyn StreamParser> {
        Box::new(OpenCodeStreamParser::default())
    }
}

/// Decoder for OpenCode's JSON event lines. Lines that are not JSON are
/// passed through as text, since older releases print plain output.
#[derive(Debug, Default)]
pub struct OpenCodeStreamParser {
    started_tools: HashSet<String>,
}

impl StreamParser for OpenCodeStreamParser {
    fn parse_line(&mut self, line: &str) -> Vec<StreamEvent> {
        let value = match serde_json::from_str::<Value>(line) {
            Ok(value) if value.is_object() => value,
            _ => return vec![StreamEvent::TextDelta(format!("{line}\n"))],
        };

        let part = &value["part"];
        match value.get("type").and_then(Value::as_str) {
            Some("text") => part
                .get("text")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(|t| vec![StreamEvent::TextDelta(t.to_string())])
                .unwrap_or_default(),
            Some("tool_use") => self.tool_use(part),
            Some("error") => vec![StreamEvent::Error {
                message: error_message(&value),
                fatal: true,
            }],
            _ => Vec::new(),
        }
    }
}

impl OpenCodeStreamParser {
    fn tool_use(&mut self, part: &Value) -> Vec<StreamEvent> {
        let state = &part["state"];
        let name = part
            .get("tool")
            .and_then(Value::as_str)
            .unwrap_or("tool")
            .to_string();
        let id = part
            .get("callID")
            .or_else(|| part.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let status = state.get("status").and_then(Value::as_str).unwrap_or("");

        let mut events = Vec::new();
        let already_started = id
            .as_ref()
            .is_some_and(|id| self.started_tools.contains(id));
        if !already_started {
            if let Some(id) = &id {
                self.started_tools.insert(id.clone());
            }
            events.push(StreamEvent::ToolStarted {
                id: id.clone(),
                name,
                input: state.get("input").cloned().unwrap_or(Value::Null),
            });
        }

        if matches!(status, "completed" | "error") {
            let output = state
                .get("output")
                .or_else(|| state.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string);
            events.push(StreamEvent::ToolFinished {
                id,
                output,
                exit_code: None,
                is_error: status == "error",
            });
        }
        events
    }
}

fn error_message(value: &Value) -> String {
    let error = &value["error"];
    error
        .get("data")
        .and_then(|d| d.get("message"))
        .or_else(|| error.get("message"))
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .unwrap_or("opencode reported an error")
        .to_string()
}
