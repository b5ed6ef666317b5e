//! Layered configuration: built-in defaults, then an optional TOML file,
//! then `RALPH_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineSettings;
use crate::provider::{ProviderKind, ProviderSettings};
use crate::timeout::TimeoutConfig;

/// Prefix for environment overrides, e.g. `RALPH_MAX_ATTEMPTS=3` or
/// `RALPH_TIMEOUTS__PROBE_SECS=2`.
pub const ENV_PREFIX: &str = "RALPH";

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "ralph.toml";

pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RalphConfig {
    pub provider: ProviderKind,
    /// Overrides the agent binary looked up on `PATH`.
    pub agent_program: Option<String>,
    pub model: Option<String>,
    pub max_attempts: u32,
    pub max_tasks: Option<usize>,
    pub board_path: PathBuf,
    pub runs_dir: PathBuf,
    pub workdir: Option<PathBuf>,
    pub pause_poll_ms: u64,
    pub output_excerpt_chars: usize,
    /// Finished runs older than this are pruned after `ralph run`. Zero keeps everything.
    pub retention_days: u64,
    pub timeouts: TimeoutConfig,
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Claude,
            agent_program: None,
            model: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_tasks: None,
            board_path: PathBuf::from(".ralph/board.json"),
            runs_dir: PathBuf::from(".ralph/runs"),
            workdir: None,
            pause_poll_ms: 250,
            output_excerpt_chars: 2000,
            retention_days: 30,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl RalphConfig {
    /// Load configuration. An explicit `path` must exist; otherwise
    /// `ralph.toml` in the current directory is read when present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).format(FileFormat::Toml).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE)
                .format(FileFormat::Toml)
                .required(false),
        };

        let config: RalphConfig = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.output_excerpt_chars == 0 {
            return Err(ConfigError::Invalid(
                "output_excerpt_chars must be positive".to_string(),
            ));
        }
        if self.pause_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "pause_poll_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            program: self.agent_program.clone(),
            model: self.model.clone(),
            workdir: self.workdir.clone(),
            timeouts: self.timeouts.clone(),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_attempts: self.max_attempts,
            pause_poll_interval: Duration::from_millis(self.pause_poll_ms),
            output_excerpt_chars: self.output_excerpt_chars,
            ..EngineSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_file_values_override_defaults() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("custom.toml");
        fs::write(
            &path,
            r#"
provider = "codex"
max_attempts = 4
board_path = "tasks.json"

[timeouts]
codex_wall_secs = 60
"#,
        )
        .expect("write config");

        let config = RalphConfig::load(Some(&path)).expect("load");
        assert_eq!(config.provider, ProviderKind::Codex);
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.board_path, PathBuf::from("tasks.json"));
        assert_eq!(config.timeouts.codex_wall, Duration::from_secs(60));
        assert_eq!(config.timeouts.kill_grace, Duration::from_secs(5));
        assert_eq!(config.runs_dir, PathBuf::from(".ralph/runs"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("absent.toml");
        assert!(RalphConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = RalphConfig {
            max_attempts: 0,
            ..RalphConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_pause_poll_rejected() {
        let config = RalphConfig {
            pause_poll_ms: 0,
            ..RalphConfig::default()
        };
        match config.validate() {
            Err(ConfigError::Invalid(message)) => assert!(message.contains("pause_poll_ms")),
            other => panic!("unexpected validation result: {other:?}"),
        }
    }

    #[test]
    fn test_engine_settings_carry_limits() {
        let config = RalphConfig {
            max_attempts: 5,
            pause_poll_ms: 40,
            ..RalphConfig::default()
        };
        let settings = config.engine_settings();
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.pause_poll_interval, Duration::from_millis(40));
    }
}
