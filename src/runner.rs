//! Subprocess execution with merged, normalized output streaming.
use std::{path::PathBuf, process::Stdio};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    sync::mpsc,
};
use tracing::debug;

use crate::{
    constants::{ELLIPSIS, MAX_LOG_LINE_CHARS},
    error::ServiceError,
};

/// Receives `(label, line)` pairs for every normalized output line of a command.
pub type LineSink<'a> = dyn Fn(&str, &str) + Send + Sync + 'a;

/// A command to run, along with where and how to run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Operation label attached to every output line ("install", "start", "stop").
    pub label: &'static str,
}

impl CommandSpec {
    pub fn new(label: &'static str, program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            label,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }
}

/// Runs platform commands to completion.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs `spec`, forwarding output lines to `sink`. Succeeds only on exit code 0.
    async fn run(&self, spec: &CommandSpec, sink: &LineSink<'_>) -> Result<(), ServiceError>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandRunner;

#[async_trait]
impl ProcessRunner for CommandRunner {
    async fn run(&self, spec: &CommandSpec, sink: &LineSink<'_>) -> Result<(), ServiceError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        debug!(label = spec.label, program = %spec.program, args = ?spec.args, "Spawning command");
        let mut child = command.spawn().map_err(|source| ServiceError::CommandSpawn {
            command: spec.program.clone(),
            args: spec.args.clone(),
            source,
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, tx.clone())));
        }
        drop(tx);

        while let Some(line) = rx.recv().await {
            debug!(label = spec.label, "{line}");
            sink(spec.label, &line);
        }
        for reader in readers {
            let _ = reader.await;
        }

        let status = child.wait().await.map_err(|source| ServiceError::CommandSpawn {
            command: spec.program.clone(),
            args: spec.args.clone(),
            source,
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(ServiceError::CommandFailure {
                command: spec.program.clone(),
                args: spec.args.clone(),
                code: status.code(),
            })
        }
    }
}

async fn forward_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                // Progress output rewrites the line with bare carriage returns.
                for segment in text.split('\r') {
                    if let Some(line) = normalize_line(segment)
                        && tx.send(line).is_err()
                    {
                        return;
                    }
                }
            }
        }
    }
}

/// Collapses whitespace and bounds the line length. Returns `None` for blank lines.
pub fn normalize_line(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    if collapsed.chars().count() <= MAX_LOG_LINE_CHARS {
        return Some(collapsed);
    }
    let mut truncated: String = collapsed.chars().take(MAX_LOG_LINE_CHARS - 1).collect();
    truncated.push(ELLIPSIS);
    Some(truncated)
}

/// Result of one lifecycle step, keeping "did it run" apart from the error.
///
/// Callers decide whether the error is soft (launch) or hard (fetch).
#[derive(Debug)]
pub struct StepOutcome {
    pub ran_ok: bool,
    pub error: Option<ServiceError>,
}

impl StepOutcome {
    pub fn ok() -> Self {
        Self {
            ran_ok: true,
            error: None,
        }
    }

    pub fn failed(error: ServiceError) -> Self {
        Self {
            ran_ok: false,
            error: Some(error),
        }
    }

    /// Turns the outcome into a hard failure.
    pub fn into_result(self) -> Result<(), ServiceError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl From<Result<(), ServiceError>> for StepOutcome {
    fn from(result: Result<(), ServiceError>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(err) => Self::failed(err),
        }
    }
}
