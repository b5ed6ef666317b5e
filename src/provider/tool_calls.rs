//! Recovery of tool calls that a model wrote as JSON inside free text.
//!
//! Agents that cannot emit native tool calls are asked to reply with objects
//! shaped like `{"tool": "search", "arguments": {"query": "x"}}`, either in a
//! fenced code block or inline. Parsing is best effort: anything that is not
//! a well-formed call is ignored.

use std::collections::HashSet;

use serde_json::Value;

use crate::provider::ToolCall;

/// Extract every distinct tool call found in `text`, in order of appearance.
pub fn parse_tool_calls(text: &str) -> Vec<ToolCall> {
    if !text.contains("\"tool\"") {
        return Vec::new();
    }

    let bytes = text.as_bytes();
    let mut calls = Vec::new();
    let mut seen = HashSet::new();
    let mut pos = 0;

    while let Some(offset) = text[pos..].find('{') {
        let start = pos + offset;
        // An unclosed brace in prose must not hide later calls.
        let Some(end) = matching_brace(bytes, start) else {
            pos = start + 1;
            continue;
        };

        match as_tool_call(&text[start..=end]) {
            Some((name, arguments)) => {
                if seen.insert((name.clone(), arguments.to_string())) {
                    calls.push(ToolCall {
                        id: format!("call_{}", calls.len()),
                        name,
                        arguments,
                    });
                }
                pos = end + 1;
            }
            // Not a call itself, but a call may be nested inside.
            None => pos = start + 1,
        }
    }

    calls
}

fn as_tool_call(candidate: &str) -> Option<(String, Value)> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    let name = value.get("tool")?.as_str()?.trim();
    let arguments = value.get("arguments")?;
    if name.is_empty() || !arguments.is_object() {
        return None;
    }
    Some((name.to_string(), arguments.clone()))
}

/// Index of the `}` closing the object opened at `start`, skipping braces
/// inside string literals.
fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fenced_block_call() {
        let text = "I'll search.\n```json\n{\"tool\": \"search\", \"arguments\": {\"query\": \"x\"}}\n```";
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments, json!({"query": "x"}));
    }

    #[test]
    fn test_unclosed_brace_in_prose_does_not_hide_later_calls() {
        let text = "In Rust, `fn main() {` opens a block.\n```json\n{\"tool\": \"search\", \"arguments\": {\"query\": \"TODO\"}}\n```\nthen {\"tool\": \"read\", \"arguments\": {\"path\": \"a\"}}";
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments, json!({"query": "TODO"}));
        assert_eq!(calls[1].name, "read");
    }

    #[test]
    fn test_duplicates_are_removed() {
        let call = r#"{"tool": "search", "arguments": {"query": "x"}}"#;
        let text = format!("first {call} and again {call}");
        assert_eq!(parse_tool_calls(&text).len(), 1);
    }

    #[test]
    fn test_same_tool_different_arguments_kept() {
        let text = r#"{"tool": "read", "arguments": {"path": "a"}} {"tool": "read", "arguments": {"path": "b"}}"#;
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].id, "call_1");
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_scanner() {
        let text = r#"{"tool": "write", "arguments": {"content": "fn main() { \"}\" }"}}"#;
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["content"], json!("fn main() { \"}\" }"));
    }

    #[test]
    fn test_malformed_and_incomplete_candidates_ignored() {
        let text = r#"{"tool": 3, "arguments": {}} {"tool": "x", "arguments": "nope"} {"tool": "y""#;
        assert!(parse_tool_calls(text).is_empty());
    }

    #[test]
    fn test_call_nested_in_wrapper_object() {
        let text = r#"{"reply": {"tool": "ls", "arguments": {}}}"#;
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "ls");
    }
}
