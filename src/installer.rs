//! On-disk presence of the managed server's artifact tree.
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::{
    error::ServiceError,
    runner::{CommandSpec, LineSink, ProcessRunner},
};

/// Materializes, inspects and removes the artifact tree.
#[async_trait]
pub trait InstallerGateway: Send + Sync {
    /// Directory holding the artifact tree.
    fn repo_dir(&self) -> &Path;

    /// Whether the artifact tree is present.
    async fn exists(&self) -> bool;

    /// Whether the launch scripts left a process marker behind.
    async fn marker_present(&self) -> bool;

    /// Removes the process marker, ignoring failures.
    async fn clear_marker(&self);

    /// Fetches the artifact tree unless it is already present.
    async fn fetch(&self, sink: &LineSink<'_>) -> Result<(), ServiceError>;

    /// Recursively deletes the artifact tree. Missing trees are not an error.
    async fn remove(&self) -> Result<(), ServiceError>;

    /// Sets the owner executable bit on `files`, best effort.
    async fn mark_executable(&self, files: &[PathBuf]);
}

/// Installs the managed server with a shallow `git clone`.
pub struct GitInstaller {
    repo_url: String,
    root: PathBuf,
    repo_dir: PathBuf,
    marker: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl GitInstaller {
    pub fn new(
        repo_url: impl Into<String>,
        root: impl Into<PathBuf>,
        repo_name: &str,
        marker_file: &str,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        let root = root.into();
        let repo_dir = root.join(repo_name);
        let marker = repo_dir.join(marker_file);
        Self {
            repo_url: repo_url.into(),
            root,
            repo_dir,
            marker,
            runner,
        }
    }

    /// Install root the checkout lives under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn clone_command(&self) -> CommandSpec {
        CommandSpec::new("install", "git")
            .args(["clone", "--depth", "1", self.repo_url.as_str()])
            .arg(self.repo_dir.to_string_lossy())
            .current_dir(&self.root)
    }
}

#[async_trait]
impl InstallerGateway for GitInstaller {
    fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    async fn exists(&self) -> bool {
        fs::metadata(&self.repo_dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    async fn marker_present(&self) -> bool {
        fs::try_exists(&self.marker).await.unwrap_or(false)
    }

    async fn clear_marker(&self) {
        match fs::remove_file(&self.marker).await {
            Ok(()) => debug!("Removed stale process marker {}", self.marker.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                "Failed to remove process marker {}: {err}",
                self.marker.display()
            ),
        }
    }

    async fn fetch(&self, sink: &LineSink<'_>) -> Result<(), ServiceError> {
        if self.exists().await {
            debug!("Artifact tree already present at {}", self.repo_dir.display());
            return Ok(());
        }

        fs::create_dir_all(&self.root)
            .await
            .map_err(|err| ServiceError::install(&self.root, err))?;

        info!("Cloning {} into {}", self.repo_url, self.repo_dir.display());
        match self.runner.run(&self.clone_command(), sink).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // A failed clone can leave a partial checkout that would look installed.
                if let Err(cleanup) = fs::remove_dir_all(&self.repo_dir).await
                    && cleanup.kind() != io::ErrorKind::NotFound
                {
                    warn!("Failed to clean up partial checkout: {cleanup}");
                }
                Err(match err {
                    ServiceError::CommandSpawn { source, .. } => ServiceError::install(
                        &self.repo_dir,
                        format!("git is not available: {source}"),
                    ),
                    other => other,
                })
            }
        }
    }

    async fn remove(&self) -> Result<(), ServiceError> {
        match fs::remove_dir_all(&self.repo_dir).await {
            Ok(()) => {
                info!("Removed artifact tree {}", self.repo_dir.display());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ServiceError::install(&self.repo_dir, err)),
        }
    }

    async fn mark_executable(&self, files: &[PathBuf]) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            for file in files {
                let Ok(meta) = fs::metadata(file).await else {
                    continue;
                };
                let mut perms = meta.permissions();
                perms.set_mode(perms.mode() | 0o100);
                if let Err(err) = fs::set_permissions(file, perms).await {
                    debug!("Could not mark {} executable: {err}", file.display());
                }
            }
        }
        #[cfg(not(unix))]
        let _ = files;
    }
}
