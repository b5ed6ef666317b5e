//! Codex backend (`codex exec --json -`).

use std::collections::HashSet;

use serde_json::{json, Value};
use tracing::debug;

use crate::provider::cli::CliBackend;
use crate::provider::stream::{StreamEvent, StreamParser, TimeoutPolicy};
use crate::provider::{ExecutionMode, ProviderSettings};

pub struct CodexBackend {
    program: String,
    model: Option<String>,
    wall: std::time::Duration,
}

impl CodexBackend {
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            program: settings
                .program
                .clone()
                .unwrap_or_else(|| "codex".to_string()),
            model: settings.model.clone(),
            wall: settings.timeouts.codex_wall,
        }
    }
}

impl CliBackend for CodexBackend {
    fn name(&self) -> &'static str {
        "codex"
    }

    fn program(&self) -> &str {
        &self.program
    }

    fn args(&self, mode: ExecutionMode) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "--json".to_string(),
            "--skip-git-repo-check".to_string(),
        ];
        match mode {
            ExecutionMode::Autonomous => {
                args.push("--dangerously-bypass-approvals-and-sandbox".to_string())
            }
            ExecutionMode::Manual => args.push("--full-auto".to_string()),
        }
        if let Some(model) = &self.model {
            args.extend(["--model".to_string(), model.clone()]);
        }
        // Read the prompt from stdin.
        args.push("-".to_string());
        args
    }

    fn timeout(&self) -> TimeoutPolicy {
        TimeoutPolicy::WallClock(self.wall)
    }

    fn parser(&self) -> Box<dyn StreamParser> {
        Box::new(CodexStreamParser::default())
    }
}

/// Decoder for `codex exec --json` thread events.
#[derive(Debug, Default)]
pub struct CodexStreamParser {
    started_items: HashSet<String>,
    wrote_text: bool,
}

impl StreamParser for CodexStreamParser {
    fn parse_line(&mut self, line: &str) -> Vec<StreamEvent> {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            debug!(line, "ignoring non-JSON codex output");
            return Vec::new();
        };

        match value.get("type").and_then(Value::as_str) {
            Some("item.started") => self.item_started(&value["item"]),
            Some("item.completed") => self.item_completed(&value["item"]),
            Some("turn.failed") => vec![StreamEvent::Error {
                message: value["error"]
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("codex turn failed")
                    .to_string(),
                fatal: true,
            }],
            // Stream-level notices such as reconnect attempts.
            Some("error") => vec![StreamEvent::Error {
                message: value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("codex error")
                    .to_string(),
                fatal: false,
            }],
            _ => Vec::new(),
        }
    }
}

impl CodexStreamParser {
    fn item_started(&mut self, item: &Value) -> Vec<StreamEvent> {
        match tool_view(item) {
            Some((name, input)) => self.start(item, name, input).into_iter().collect(),
            None => Vec::new(),
        }
    }

    fn item_completed(&mut self, item: &Value) -> Vec<StreamEvent> {
        let kind = item.get("type").and_then(Value::as_str).unwrap_or("");
        if kind == "agent_message" {
            let Some(text) = item.get("text").and_then(Value::as_str) else {
                return Vec::new();
            };
            let text = if self.wrote_text {
                format!("\n\n{text}")
            } else {
                text.to_string()
            };
            self.wrote_text = true;
            return vec![StreamEvent::TextDelta(text)];
        }
        if kind == "error" {
            return vec![StreamEvent::Error {
                message: item
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("codex error")
                    .to_string(),
                fatal: false,
            }];
        }

        let Some((name, input)) = tool_view(item) else {
            return Vec::new();
        };
        let mut events: Vec<StreamEvent> = self.start(item, name, input).into_iter().collect();

        let exit_code = item
            .get("exit_code")
            .and_then(Value::as_i64)
            .map(|c| c as i32);
        let failed_status = item.get("status").and_then(Value::as_str) == Some("failed");
        events.push(StreamEvent::ToolFinished {
            id: item_id(item),
            output: item
                .get("aggregated_output")
                .and_then(Value::as_str)
                .map(str::to_string),
            exit_code,
            is_error: failed_status || exit_code.is_some_and(|c| c != 0),
        });
        events
    }

    /// Emit a start event unless this item was already announced.
    fn start(&mut self, item: &Value, name: &str, input: Value) -> Option<StreamEvent> {
        let id = item_id(item);
        if let Some(id) = &id {
            if !self.started_items.insert(id.clone()) {
                return None;
            }
        }
        Some(StreamEvent::ToolStarted {
            id,
            name: name.to_string(),
            input,
        })
    }
}

fn item_id(item: &Value) -> Option<String> {
    item.get("id").and_then(Value::as_str).map(str::to_string)
}

/// Tool name and input for items that represent agent actions.
fn tool_view(item: &Value) -> Option<(&'static str, Value)> {
    match item.get("type").and_then(Value::as_str)? {
        "command_execution" => Some((
            "command_execution",
            json!({ "command": item.get("command").cloned().unwrap_or(Value::Null) }),
        )),
        "file_change" => {
            let changes = item.get("changes").cloned().unwrap_or_else(|| json!([]));
            let path = changes
                .get(0)
                .and_then(|c| c.get("path"))
                .cloned()
                .unwrap_or(Value::Null);
            Some(("file_change", json!({ "path": path, "changes": changes })))
        }
        "mcp_tool_call" => Some((
            "mcp_tool_call",
            json!({
                "server": item.get("server").cloned().unwrap_or(Value::Null),
                "tool": item.get("tool").cloned().unwrap_or(Value::Null),
            }),
        )),
        "web_search" => Some((
            "web_search",
            json!({ "query": item.get("query").cloned().unwrap_or(Value::Null) }),
        )),
        _ => None,
    }
}
