//! Error handling for svcctl.
use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Coarse classification of a [`ServiceError`], for callers that only care about the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Another lifecycle operation holds the exclusive lock.
    Busy,
    /// Creating, fetching or removing the artifact tree failed.
    Install,
    /// The health endpoint never reached the expected state.
    Timeout,
    /// A platform command exited unsuccessfully or could not be spawned.
    Command,
    /// Configuration or environment problems.
    Config,
    /// Anything else (I/O, HTTP client construction).
    Other,
}

/// Defines all possible errors raised by the lifecycle orchestrator.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A mutating operation was requested while another one was still running.
    #[error("Another local server operation ({running}) is already in progress")]
    OperationInProgress {
        /// Label of the operation that was refused.
        requested: &'static str,
        /// Label of the operation that currently holds the lock.
        running: &'static str,
    },

    /// Failure while materializing or removing the artifact tree.
    #[error("Failed to install local server at {}: {reason}", .path.display())]
    InstallFailure {
        /// Artifact tree (or parent directory) being manipulated.
        path: PathBuf,
        /// Human readable reason.
        reason: String,
    },

    /// The health endpoint did not come up within the ceiling.
    #[error("Local server did not become healthy at {endpoint} within {}s", .elapsed.as_secs())]
    StartTimeout {
        /// Health endpoint that was polled.
        endpoint: String,
        /// Time spent polling.
        elapsed: Duration,
    },

    /// The health endpoint was still answering after the stop ceiling.
    #[error("Local server at {endpoint} is still running after {}s", .elapsed.as_secs())]
    StopTimeout {
        /// Health endpoint that was polled.
        endpoint: String,
        /// Time spent polling.
        elapsed: Duration,
    },

    /// A platform command exited with a non-zero status.
    #[error("Command `{}` exited with {}", render_command(.command, .args), render_code(.code))]
    CommandFailure {
        /// Program that was executed.
        command: String,
        /// Arguments passed to the program.
        args: Vec<String>,
        /// Exit code, absent when the process was killed by a signal.
        code: Option<i32>,
    },

    /// A platform command could not be spawned at all.
    #[error("Failed to run `{}`: {source}", render_command(.command, .args))]
    CommandSpawn {
        /// Program that was executed.
        command: String,
        /// Arguments passed to the program.
        args: Vec<String>,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// The HTTP client used for health probing could not be built.
    #[error("Failed to build health probe client: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ServiceError {
    /// Returns the coarse class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OperationInProgress { .. } => ErrorKind::Busy,
            Self::InstallFailure { .. } => ErrorKind::Install,
            Self::StartTimeout { .. } | Self::StopTimeout { .. } => ErrorKind::Timeout,
            Self::CommandFailure { .. } | Self::CommandSpawn { .. } => ErrorKind::Command,
            Self::Config(_) => ErrorKind::Config,
            Self::HttpClient(_) => ErrorKind::Other,
        }
    }

    /// Wraps any error raised while manipulating the artifact tree.
    pub fn install(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::InstallFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

fn render_command(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, args.join(" "))
    }
}

fn render_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        /// Path that could not be read.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A `${VAR}` reference names a variable that is not set.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// A field holds a value that cannot be used.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Offending configuration key.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}
