//! Human-readable transcript lines for tool activity reported by agent CLIs.

use serde_json::Value;

const MAX_TARGET_CHARS: usize = 120;

/// Input keys that usually name what a tool is acting on, most specific first.
const TARGET_KEYS: [&str; 9] = [
    "file_path",
    "filePath",
    "path",
    "command",
    "pattern",
    "url",
    "query",
    "description",
    "prompt",
];

fn verb_for(tool: &str) -> &'static str {
    match tool.to_ascii_lowercase().as_str() {
        "read" | "read_file" | "view" | "notebookread" => "Reading",
        "write" | "write_file" | "create" => "Writing",
        "edit" | "multiedit" | "notebookedit" | "apply_patch" | "patch" | "file_change" => {
            "Editing"
        }
        "bash" | "shell" | "command_execution" | "exec" => "Running",
        "grep" | "glob" | "search" | "list" | "ls" | "web_search" | "websearch" => "Searching",
        "webfetch" | "fetch" => "Fetching",
        "todowrite" | "todoread" | "todo" => "Planning",
        "task" | "agent" => "Delegating",
        _ => "Using",
    }
}

fn target_of(input: &Value) -> Option<&str> {
    TARGET_KEYS
        .iter()
        .find_map(|key| input.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Line shown when a tool starts, e.g. `Reading: src/main.rs`.
pub fn tool_started(name: &str, input: &Value) -> String {
    let verb = verb_for(name);
    match (verb, target_of(input)) {
        ("Using", Some(target)) => format!("Using {name}: {}", truncate_chars(target, MAX_TARGET_CHARS)),
        ("Using", None) => format!("Using {name}"),
        (verb, Some(target)) => format!("{verb}: {}", truncate_chars(first_line(target), MAX_TARGET_CHARS)),
        (verb, None) => format!("{verb}: {name}"),
    }
}

/// Line shown when a tool finishes.
pub fn tool_finished(name: &str, is_error: bool) -> String {
    if is_error {
        format!("✗ {name} failed")
    } else {
        format!("✓ {name}")
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}

/// Truncate to at most `max` characters, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_tools_use_verbs() {
        assert_eq!(
            tool_started("Read", &json!({"file_path": "src/lib.rs"})),
            "Reading: src/lib.rs"
        );
        assert_eq!(
            tool_started("Bash", &json!({"command": "cargo fmt\ncargo clippy"})),
            "Running: cargo fmt"
        );
        assert_eq!(
            tool_started("edit", &json!({"filePath": "README.md"})),
            "Editing: README.md"
        );
    }

    #[test]
    fn test_unknown_tool_falls_back_to_name() {
        assert_eq!(tool_started("mcp__jira", &json!({})), "Using mcp__jira");
        assert_eq!(
            tool_started("mcp__jira", &json!({"query": "PROJ-1"})),
            "Using mcp__jira: PROJ-1"
        );
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héll…");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn test_finished_marks_errors() {
        assert_eq!(tool_finished("Bash", true), "✗ Bash failed");
        assert_eq!(tool_finished("Read", false), "✓ Read");
    }
}
