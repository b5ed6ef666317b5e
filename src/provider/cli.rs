//! Generic provider over a coding-agent CLI.
//!
//! Each backend describes how to invoke its binary and how to decode its
//! output; [`CliProvider`] owns everything else: prompt rendering, the
//! readiness probe, streaming, cancellation and mapping run failures into
//! error responses.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::provider::stream::{
    run_stream, CancelHandle, StreamError, StreamOutcome, StreamParser, StreamRequest,
    TimeoutPolicy,
};
use crate::provider::tool_calls::parse_tool_calls;
use crate::provider::{
    AgentProvider, CompletionRequest, CompletionResponse, ExecutionMode, FinishReason, Message,
    ProviderError, ProviderSettings, Role, ToolDefinition,
};

pub trait CliBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn program(&self) -> &str;

    fn args(&self, mode: ExecutionMode) -> Vec<String>;

    fn version_args(&self) -> Vec<String> {
        vec!["--version".to_string()]
    }

    fn env(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn timeout(&self) -> TimeoutPolicy;

    fn parser(&self) -> Box<dyn StreamParser>;
}

pub struct CliProvider<B> {
    backend: B,
    workdir: Option<PathBuf>,
    kill_grace: Duration,
    probe_timeout: Duration,
    cancel: CancelHandle,
}

impl<B: CliBackend> CliProvider<B> {
    pub fn new(backend: B, settings: &ProviderSettings) -> Self {
        Self {
            backend,
            workdir: settings.workdir.clone(),
            kill_grace: settings.timeouts.kill_grace,
            probe_timeout: settings.timeouts.probe,
            cancel: CancelHandle::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn to_response(&self, outcome: StreamOutcome, tools: &[ToolDefinition]) -> CompletionResponse {
        let tool_calls = if tools.is_empty() {
            Vec::new()
        } else {
            parse_tool_calls(&outcome.content)
        };

        if outcome.failed {
            let reason = outcome
                .errors
                .last()
                .cloned()
                .unwrap_or_else(|| format!("{} reported an error", self.backend.name()));
            let content = if outcome.content.trim().is_empty() {
                reason
            } else {
                outcome.content.clone()
            };
            return CompletionResponse {
                content,
                raw_content: Some(outcome.content),
                tool_calls,
                tool_activity: outcome.tools,
                finish_reason: FinishReason::Error,
            };
        }

        let finish_reason = if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };
        CompletionResponse {
            content: outcome.content,
            raw_content: None,
            tool_calls,
            tool_activity: outcome.tools,
            finish_reason,
        }
    }

    fn describe_failure(&self, err: &StreamError) -> String {
        let name = self.backend.name();
        match err {
            StreamError::Spawn { program, source } => {
                format!("Failed to start {name} ('{program}'): {source}. Is the CLI installed and on PATH?")
            }
            StreamError::Timeout(d) => format!("{name} timed out after {}s", d.as_secs()),
            other => format!("{name} {other}"),
        }
    }
}

#[async_trait]
impl<B: CliBackend> AgentProvider for CliProvider<B> {
    fn name(&self) -> &str {
        self.backend.name()
    }

    async fn is_ready(&self) -> bool {
        let mut command = Command::new(self.backend.program());
        command
            .args(self.backend.version_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.probe_timeout, command.status()).await {
            Ok(Ok(status)) if status.success() => true,
            Ok(Ok(status)) => {
                debug!(provider = self.backend.name(), code = ?status.code(), "version probe failed");
                false
            }
            Ok(Err(err)) => {
                debug!(provider = self.backend.name(), error = %err, "version probe could not start");
                false
            }
            Err(_) => {
                warn!(provider = self.backend.name(), "version probe timed out");
                false
            }
        }
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        // A stop that landed before the call started still applies.
        if self.cancel.is_cancelled() {
            self.cancel.reset();
            return Err(ProviderError::Cancelled);
        }

        let stream_request = StreamRequest {
            program: self.backend.program().to_string(),
            args: self.backend.args(request.mode),
            cwd: self.workdir.clone(),
            env: self.backend.env(),
            stdin: render_prompt(&request.messages, &request.tools),
            timeout: self.backend.timeout(),
            kill_grace: self.kill_grace,
        };
        info!(provider = self.backend.name(), mode = ?request.mode, "starting agent");

        let mut parser = self.backend.parser();
        let result = run_stream(
            stream_request,
            parser.as_mut(),
            request.on_chunk.as_ref(),
            &self.cancel,
        )
        .await;

        let cancelled = self.cancel.is_cancelled();
        self.cancel.reset();
        if cancelled {
            return Err(ProviderError::Cancelled);
        }

        match result {
            Ok(outcome) => Ok(self.to_response(outcome, &request.tools)),
            Err(StreamError::Cancelled) => Err(ProviderError::Cancelled),
            Err(err @ StreamError::Spawn { .. }) => {
                let message = self.describe_failure(&err);
                warn!(provider = self.backend.name(), error = %message, "agent could not start");
                Err(ProviderError::Spawn(message))
            }
            Err(err) => {
                let message = self.describe_failure(&err);
                warn!(provider = self.backend.name(), error = %message, "agent run failed");
                Ok(CompletionResponse::error(message))
            }
        }
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn clear_cancel(&self) {
        self.cancel.reset();
    }
}

/// Flatten a conversation into the single prompt an agent CLI reads on stdin.
pub fn render_prompt(messages: &[Message], tools: &[ToolDefinition]) -> String {
    let mut prompt = String::new();

    for message in messages {
        match message.role {
            Role::System => {}
            Role::User => prompt.push_str("## Request\n\n"),
            Role::Assistant => prompt.push_str("## Your previous reply\n\n"),
        }
        prompt.push_str(message.content.trim_end());
        prompt.push_str("\n\n");
    }

    if !tools.is_empty() {
        prompt.push_str("## Tools\n\n");
        prompt.push_str(
            "To call a tool, reply with a JSON object of the form \
             {\"tool\": \"<name>\", \"arguments\": {...}}.\n\n",
        );
        for tool in tools {
            prompt.push_str(&format!("- `{}`: {}\n", tool.name, tool.description));
        }
    }

    prompt.trim_end().to_string() + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::stream::StreamEvent;
    use serde_json::json;

    struct EchoBackend {
        script: String,
    }

    struct Lines;

    impl StreamParser for Lines {
        fn parse_line(&mut self, line: &str) -> Vec<StreamEvent> {
            if let Some(message) = line.strip_prefix("ERROR ") {
                return vec![StreamEvent::Error {
                    message: message.to_string(),
                    fatal: true,
                }];
            }
            vec![StreamEvent::TextDelta(format!("{line}\n"))]
        }
    }

    impl CliBackend for EchoBackend {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn program(&self) -> &str {
            "sh"
        }

        fn args(&self, _mode: ExecutionMode) -> Vec<String> {
            vec!["-c".to_string(), self.script.clone()]
        }

        fn version_args(&self) -> Vec<String> {
            vec!["-c".to_string(), "exit 0".to_string()]
        }

        fn timeout(&self) -> TimeoutPolicy {
            TimeoutPolicy::WallClock(Duration::from_secs(10))
        }

        fn parser(&self) -> Box<dyn StreamParser> {
            Box::new(Lines)
        }
    }

    fn provider(script: &str) -> CliProvider<EchoBackend> {
        CliProvider::new(
            EchoBackend {
                script: script.to_string(),
            },
            &ProviderSettings::default(),
        )
    }

    #[test]
    fn test_render_prompt_lists_tools() {
        let prompt = render_prompt(
            &[Message::system("Be brief."), Message::user("Fix the bug.")],
            &[ToolDefinition {
                name: "search".into(),
                description: "Search the repo".into(),
                parameters: json!({}),
            }],
        );
        assert!(prompt.starts_with("Be brief.\n\n## Request\n\nFix the bug."));
        assert!(prompt.contains("- `search`: Search the repo"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_and_plain_completion() {
        let provider = provider("cat >/dev/null; echo done");
        assert!(provider.is_ready().await);

        let response = provider
            .complete(CompletionRequest::new(vec![Message::user("hi")]))
            .await
            .expect("complete");
        assert_eq!(response.content, "done\n");
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_recovered_tool_calls_set_finish_reason() {
        let provider = provider(r#"cat >/dev/null; echo '{"tool": "search", "arguments": {"query": "x"}}'"#);
        let request = CompletionRequest::new(vec![Message::user("find x")]).with_tools(vec![
            ToolDefinition {
                name: "search".into(),
                description: "Search".into(),
                parameters: json!({}),
            },
        ]);
        let response = provider.complete(request).await.expect("complete");
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.tool_calls[0].name, "search");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_silent_failure_becomes_error_response() {
        let provider = provider("cat >/dev/null; echo 'bad flag' >&2; exit 2");
        let response = provider
            .complete(CompletionRequest::new(vec![Message::user("hi")]))
            .await
            .expect("error response, not Err");
        assert!(response.is_error());
        assert!(response.content.contains("code 2"));
        assert!(response.content.contains("bad flag"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fatal_stream_error_becomes_error_response() {
        let provider = provider("cat >/dev/null; echo 'ERROR rate limited'");
        let response = provider
            .complete(CompletionRequest::new(vec![Message::user("hi")]))
            .await
            .expect("complete");
        assert!(response.is_error());
        assert_eq!(response.content, "rate limited");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_resolves_cancelled() {
        let provider = std::sync::Arc::new(provider("sleep 30"));
        let canceller = provider.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });
        let err = provider
            .complete(CompletionRequest::new(vec![Message::user("hi")]))
            .await
            .expect_err("cancelled");
        assert!(matches!(err, ProviderError::Cancelled));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_before_call_skips_spawn() {
        let temp_dir = tempfile::TempDir::new().expect("temp dir");
        let marker = temp_dir.path().join("spawned");
        let provider = provider(&format!("touch '{}'; echo done", marker.display()));

        provider.cancel();
        let err = provider
            .complete(CompletionRequest::new(vec![Message::user("hi")]))
            .await
            .expect_err("cancelled");
        assert!(matches!(err, ProviderError::Cancelled));
        assert!(!marker.exists());

        let response = provider
            .complete(CompletionRequest::new(vec![Message::user("hi")]))
            .await
            .expect("later calls run normally");
        assert_eq!(response.content, "done\n");
    }

    #[tokio::test]
    async fn test_clear_cancel_drops_stale_request() {
        let provider = provider("cat >/dev/null; echo done");
        provider.cancel();
        provider.clear_cancel();
        assert!(!provider.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        struct Missing;
        impl CliBackend for Missing {
            fn name(&self) -> &'static str {
                "missing"
            }
            fn program(&self) -> &str {
                "ralph-no-such-agent"
            }
            fn args(&self, _mode: ExecutionMode) -> Vec<String> {
                Vec::new()
            }
            fn timeout(&self) -> TimeoutPolicy {
                TimeoutPolicy::WallClock(Duration::from_secs(5))
            }
            fn parser(&self) -> Box<dyn StreamParser> {
                Box::new(Lines)
            }
        }

        let provider = CliProvider::new(Missing, &ProviderSettings::default());
        assert!(!provider.is_ready().await);
        let err = provider
            .complete(CompletionRequest::new(vec![Message::user("hi")]))
            .await
            .expect_err("spawn error");
        assert!(matches!(err, ProviderError::Spawn(_)));
        assert!(err.to_string().contains("Failed to start missing"));
    }
}
