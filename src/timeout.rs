//! Timeout settings for agent subprocesses.
//!
//! Claude Code streams continuously, so it is bounded by inactivity; OpenCode
//! and Codex can sit silent for long stretches and get a wall-clock limit.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for how long agent CLIs may run before being killed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Maximum silence on Claude Code's stdout/stderr.
    /// Default: 300 seconds (5 minutes)
    #[serde(rename = "claude_inactivity_secs", with = "secs")]
    pub claude_inactivity: Duration,

    /// Maximum total runtime of an OpenCode invocation.
    /// Default: 1800 seconds (30 minutes)
    #[serde(rename = "opencode_wall_secs", with = "secs")]
    pub opencode_wall: Duration,

    /// Maximum total runtime of a Codex invocation.
    /// Default: 1800 seconds (30 minutes)
    #[serde(rename = "codex_wall_secs", with = "secs")]
    pub codex_wall: Duration,

    /// Time between SIGTERM and a hard kill.
    /// Default: 5 seconds
    #[serde(rename = "kill_grace_secs", with = "secs")]
    pub kill_grace: Duration,

    /// Limit for the `--version` readiness probe.
    /// Default: 10 seconds
    #[serde(rename = "probe_secs", with = "secs")]
    pub probe: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            claude_inactivity: Duration::from_secs(300),
            opencode_wall: Duration::from_secs(1800),
            codex_wall: Duration::from_secs(1800),
            kill_grace: Duration::from_secs(5),
            probe: Duration::from_secs(10),
        }
    }
}

impl TimeoutConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_claude_inactivity(mut self, timeout: Duration) -> Self {
        self.claude_inactivity = timeout;
        self
    }

    pub fn with_opencode_wall(mut self, timeout: Duration) -> Self {
        self.opencode_wall = timeout;
        self
    }

    pub fn with_codex_wall(mut self, timeout: Duration) -> Self {
        self.codex_wall = timeout;
        self
    }

    /// Sets the grace period between the polite and the forced kill.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn with_probe(mut self, timeout: Duration) -> Self {
        self.probe = timeout;
        self
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
