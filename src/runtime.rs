//! Runtime paths: where the install root, config hints and logs live.
use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::constants::{APP_DIR_NAME, INSTALL_DIR_ENV, INSTALL_HINT_FILE};

/// User-scoped directories used by svcctl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    data_dir: PathBuf,
    config_dir: PathBuf,
}

impl RuntimePaths {
    /// Resolves directories from `$HOME`, falling back to `/` when it is unset.
    pub fn from_env() -> Self {
        let home = env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/"));
        Self::from_home(&home)
    }

    /// Resolves directories relative to an explicit home directory.
    pub fn from_home(home: &Path) -> Self {
        Self {
            data_dir: home.join(".local/share").join(APP_DIR_NAME),
            config_dir: home.join(".config").join(APP_DIR_NAME),
        }
    }

    /// Data dir (default install root).
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Config dir (install hint file).
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    fn hint_path(&self) -> PathBuf {
        self.config_dir.join(INSTALL_HINT_FILE)
    }

    /// Picks the install root: explicit value, then `SVCCTL_INSTALL_DIR`, then the hint file,
    /// then the data dir.
    pub fn resolve_install_root(&self, explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }

        if let Some(value) = env::var_os(INSTALL_DIR_ENV)
            && !value.is_empty()
        {
            debug!("Install root taken from {INSTALL_DIR_ENV}");
            return PathBuf::from(value);
        }

        if let Some(hinted) = self.read_install_hint() {
            debug!("Install root taken from hint file: {}", hinted.display());
            return hinted;
        }

        self.data_dir.clone()
    }

    /// Remembers a chosen install root so later runs find the same installation.
    pub fn persist_install_root(&self, root: &Path) -> io::Result<()> {
        fs::create_dir_all(&self.config_dir)?;
        fs::write(self.hint_path(), root.to_string_lossy().as_bytes())
    }

    fn read_install_hint(&self) -> Option<PathBuf> {
        match fs::read_to_string(self.hint_path()) {
            Ok(content) => {
                let trimmed = content.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(trimmed))
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!("Failed to read install hint file: {err}");
                None
            }
        }
    }
}
