use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::debug;

/// Append-only log of subprocess output produced by lifecycle operations.
#[derive(Debug)]
pub struct OperationLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl OperationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `[timestamp] [label] line`. Write failures are traced and otherwise ignored.
    pub fn append(&self, label: &str, line: &str) {
        let mut guard = self
            .file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if guard.is_none() {
            match self.open() {
                Ok(file) => *guard = Some(file),
                Err(err) => {
                    debug!("Cannot open operation log {}: {err}", self.path.display());
                    return;
                }
            }
        }

        if let Some(file) = guard.as_mut() {
            let stamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
            if let Err(err) = writeln!(file, "[{stamp}] [{label}] {line}") {
                debug!("Failed to write operation log: {err}");
                *guard = None;
            }
        }
    }

    fn open(&self) -> io::Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&self.path)
    }

    /// Returns the last `lines` lines of the log; an absent log reads as empty.
    pub fn tail(&self, lines: usize) -> io::Result<Vec<String>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let reader = BufReader::new(file);
        let mut all_lines: Vec<String> = reader.lines().map_while(Result::ok).collect();

        let start = all_lines.len().saturating_sub(lines);
        Ok(all_lines.split_off(start))
    }
}

/// Prints the last `lines` lines of the operation log.
///
/// # Arguments
/// * `log` - The operation log to read.
/// * `lines` - The number of log lines to display.
pub fn show_logs(log: &OperationLog, lines: usize) -> io::Result<()> {
    let tail = log.tail(lines)?;
    if tail.is_empty() {
        eprintln!("No operation log at {} yet.", log.path().display());
        return Ok(());
    }

    for line in &tail {
        println!("{line}");
    }

    Ok(())
}
