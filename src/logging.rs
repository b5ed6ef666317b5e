//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! `RUST_LOG` wins when set; otherwise the level comes from the CLI flags.
//! Logs go to stderr so stdout stays clean for command output.

use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (true, _) => Verbosity::Verbose,
            (false, true) => Verbosity::Quiet,
            (false, false) => Verbosity::Normal,
        }
    }

    fn default_directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "ralph_board=warn,ralph=warn",
            Verbosity::Normal => "ralph_board=info,ralph=info",
            Verbosity::Verbose => "ralph_board=debug,ralph=debug",
        }
    }
}

/// Install the global subscriber. Repeated calls are ignored.
pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_directive()));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
