//! OS-specific launch and stop commands for the managed server.
use std::path::{Path, PathBuf};

use crate::{
    config::ServiceConfig,
    constants::{
        PAUSE_SECONDS_ENV, UNIX_START_SCRIPT, UNIX_STOP_SCRIPT, WINDOWS_START_SCRIPT,
        WINDOWS_STOP_SCRIPT,
    },
    runner::CommandSpec,
};

/// Script flavour used to drive the managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// `bash <script>.sh`
    Unix,
    /// `cmd.exe /d /s /c call <script>.bat`
    Windows,
}

impl Platform {
    /// Platform of the running host.
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }

    fn script_command(
        self,
        label: &'static str,
        script: &str,
        repo_dir: &Path,
        env: &[(String, String)],
    ) -> CommandSpec {
        let spec = match self {
            Platform::Unix => CommandSpec::new(label, "bash").arg(script),
            Platform::Windows => {
                CommandSpec::new(label, "cmd.exe").args(["/d", "/s", "/c", "call", script])
            }
        };
        spec.current_dir(repo_dir).envs(env.iter().cloned())
    }

    pub fn start_command(self, repo_dir: &Path, env: &[(String, String)]) -> CommandSpec {
        let script = match self {
            Platform::Unix => UNIX_START_SCRIPT,
            Platform::Windows => WINDOWS_START_SCRIPT,
        };
        self.script_command("start", script, repo_dir, env)
    }

    pub fn stop_command(self, repo_dir: &Path, env: &[(String, String)]) -> CommandSpec {
        let script = match self {
            Platform::Unix => UNIX_STOP_SCRIPT,
            Platform::Windows => WINDOWS_STOP_SCRIPT,
        };
        self.script_command("stop", script, repo_dir, env)
    }

    /// Scripts that need the owner executable bit after a fresh fetch. Empty on Windows.
    pub fn launch_scripts(self, repo_dir: &Path) -> Vec<PathBuf> {
        match self {
            Platform::Unix => vec![
                repo_dir.join(UNIX_START_SCRIPT),
                repo_dir.join(UNIX_STOP_SCRIPT),
            ],
            Platform::Windows => Vec::new(),
        }
    }
}

/// Environment handed to the launch and stop scripts, on top of the inherited one.
pub fn script_env(service: &ServiceConfig) -> Vec<(String, String)> {
    let mut env = vec![
        (PAUSE_SECONDS_ENV.to_string(), "0".to_string()),
        (service.port_env.clone(), service.resolve_port().to_string()),
        (service.host_env.clone(), service.resolve_host()),
    ];
    let mut extra: Vec<_> = service
        .env
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    extra.sort();
    env.extend(extra);
    env
}
