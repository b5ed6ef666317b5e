//! Claude Code backend (`claude -p --output-format stream-json`).

use serde_json::Value;
use tracing::debug;

use crate::provider::cli::CliBackend;
use crate::provider::stream::{StreamEvent, StreamParser, TimeoutPolicy};
use crate::provider::{ExecutionMode, ProviderSettings};

pub struct ClaudeBackend {
    program: String,
    model: Option<String>,
    inactivity: std::time::Duration,
}

impl ClaudeBackend {
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            program: settings
                .program
                .clone()
                .unwrap_or_else(|| "claude".to_string()),
            model: settings.model.clone(),
            inactivity: settings.timeouts.claude_inactivity,
        }
    }
}

impl CliBackend for ClaudeBackend {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn program(&self) -> &str {
        &self.program
    }

    fn args(&self, mode: ExecutionMode) -> Vec<String> {
        let mut args: Vec<String> = [
            "-p",
            "--output-format",
            "stream-json",
            "--verbose",
            "--include-partial-messages",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        match mode {
            ExecutionMode::Autonomous => args.push("--dangerously-skip-permissions".to_string()),
            ExecutionMode::Manual => {
                args.extend(["--permission-mode".to_string(), "acceptEdits".to_string()])
            }
        }
        if let Some(model) = &self.model {
            args.extend(["--model".to_string(), model.clone()]);
        }
        args
    }

    fn timeout(&self) -> TimeoutPolicy {
        TimeoutPolicy::Inactivity(self.inactivity)
    }

    fn parser(&self) -> Box<dyn StreamParser> {
        Box::new(ClaudeStreamParser::default())
    }
}

/// Decoder for Claude Code's stream-json events.
///
/// With partial messages enabled, text arrives as `content_block_delta`
/// events and is repeated in the following `assistant` message; the repeat
/// is skipped once deltas have been seen.
#[derive(Debug, Default)]
pub struct ClaudeStreamParser {
    saw_partial_text: bool,
}

impl StreamParser for ClaudeStreamParser {
    fn parse_line(&mut self, line: &str) -> Vec<StreamEvent> {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            debug!(line, "ignoring non-JSON claude output");
            return Vec::new();
        };

        match value.get("type").and_then(Value::as_str) {
            Some("stream_event") => self.stream_event(&value["event"]),
            Some("assistant") => self.assistant(&value["message"]),
            Some("user") => tool_results(&value["message"]),
            Some("result") => vec![final_result(&value)],
            _ => Vec::new(),
        }
    }
}

impl ClaudeStreamParser {
    fn stream_event(&mut self, event: &Value) -> Vec<StreamEvent> {
        if event.get("type").and_then(Value::as_str) != Some("content_block_delta") {
            return Vec::new();
        }
        let delta = &event["delta"];
        if delta.get("type").and_then(Value::as_str) != Some("text_delta") {
            return Vec::new();
        }
        match delta.get("text").and_then(Value::as_str) {
            Some(text) => {
                self.saw_partial_text = true;
                vec![StreamEvent::TextDelta(text.to_string())]
            }
            None => Vec::new(),
        }
    }

    fn assistant(&mut self, message: &Value) -> Vec<StreamEvent> {
        let Some(blocks) = message.get("content").and_then(Value::as_array) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") if !self.saw_partial_text => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        events.push(StreamEvent::TextDelta(text.to_string()));
                    }
                }
                Some("tool_use") => events.push(StreamEvent::ToolStarted {
                    id: block.get("id").and_then(Value::as_str).map(str::to_string),
                    name: block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("tool")
                        .to_string(),
                    input: block.get("input").cloned().unwrap_or(Value::Null),
                }),
                _ => {}
            }
        }
        events
    }
}

fn tool_results(message: &Value) -> Vec<StreamEvent> {
    let Some(blocks) = message.get("content").and_then(Value::as_array) else {
        return Vec::new();
    };

    blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_result"))
        .map(|block| StreamEvent::ToolFinished {
            id: block
                .get("tool_use_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            output: block.get("content").and_then(result_text),
            exit_code: None,
            is_error: block
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
        .collect()
}

/// Tool result content is either a string or a list of text blocks.
fn result_text(content: &Value) -> Option<String> {
    match content {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => {
            let text: Vec<&str> = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            (!text.is_empty()).then(|| text.join("\n"))
        }
        _ => None,
    }
}

fn final_result(value: &Value) -> StreamEvent {
    let is_error = value
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        || value
            .get("subtype")
            .and_then(Value::as_str)
            .is_some_and(|s| s.starts_with("error"));

    match value.get("result").and_then(Value::as_str) {
        Some(text) => StreamEvent::FinalResult {
            text: text.to_string(),
            is_error,
        },
        None if is_error => StreamEvent::Error {
            message: value
                .get("subtype")
                .and_then(Value::as_str)
                .unwrap_or("claude reported an error")
                .to_string(),
            fatal: true,
        },
        None => StreamEvent::FinalResult {
            text: String::new(),
            is_error: false,
        },
    }
}
