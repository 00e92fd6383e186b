//! Command-line interface for svcctl.
use std::{path::PathBuf, str::FromStr};

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::constants::DEFAULT_LOG_LINES;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for svcctl.
#[derive(Parser)]
#[command(name = "svcctl", version, author)]
#[command(about = "Installs, starts and supervises a local background server", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Path to the configuration file (defaults to `svcctl.yaml` when present).
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for svcctl.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Probe the installation and the health endpoint and print the status.
    Status,

    /// Install the server if needed, then start it.
    Install {
        /// Install root to use (remembered for later runs).
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
    },

    /// Start the existing installation (installing it first if missing).
    Start {
        /// Only start when the health endpoint is not answering.
        #[arg(long = "if-needed")]
        if_needed: bool,
    },

    /// Stop the server.
    Stop,

    /// Stop and start the server again.
    Restart,

    /// Remove the installation, fetch it again and start it.
    Reinstall {
        /// Install root to use (remembered for later runs).
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
    },

    /// Show the operation log.
    Logs {
        /// Number of lines to show.
        #[arg(short, long, default_value_t = DEFAULT_LOG_LINES)]
        lines: usize,
    },

    /// Print every status change until interrupted.
    Watch {
        /// Seconds between background status refreshes.
        #[arg(long, value_name = "SECONDS", default_value = "5")]
        interval: u64,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
