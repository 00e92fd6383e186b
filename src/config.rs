//! Configuration management for svcctl.
use regex::Regex;
use serde::Deserialize;
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use crate::{
    constants::{
        DEFAULT_CONFIG_FILE, DEFAULT_HEALTH_PATH, DEFAULT_HOST, DEFAULT_HOST_ENV,
        DEFAULT_MARKER_FILE, DEFAULT_PORT, DEFAULT_PORT_ENV, DEFAULT_REPO_NAME,
        DEFAULT_REPO_URL,
    },
    error::ConfigError,
};

/// Represents the structure of the configuration file. Every key is optional.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Directory under which the managed server is checked out.
    pub install_dir: Option<String>,
    /// Managed server definition.
    pub service: ServiceConfig,
}

/// Describes the managed server: where it comes from and how to reach it.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    /// Remote git repository cloned on install.
    pub repo_url: String,
    /// Checkout directory name under the install root.
    pub repo_name: String,
    /// Host the server binds to.
    pub host: Option<String>,
    /// Port the server listens on.
    pub port: Option<u16>,
    /// Path of the health endpoint.
    pub health_path: String,
    /// Variable used to hand the port to the launch scripts (also read as an override).
    pub port_env: String,
    /// Variable used to hand the host to the launch scripts (also read as an override).
    pub host_env: String,
    /// Process marker left in the checkout by the launch scripts.
    pub marker_file: String,
    /// Extra environment passed to the launch and stop scripts.
    pub env: HashMap<String, String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            repo_url: DEFAULT_REPO_URL.to_string(),
            repo_name: DEFAULT_REPO_NAME.to_string(),
            host: None,
            port: None,
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            port_env: DEFAULT_PORT_ENV.to_string(),
            host_env: DEFAULT_HOST_ENV.to_string(),
            marker_file: DEFAULT_MARKER_FILE.to_string(),
            env: HashMap::new(),
        }
    }
}

impl ServiceConfig {
    /// Port precedence: `port_env` variable, config value, `PORT`, built-in default.
    pub fn resolve_port(&self) -> u16 {
        let from_env =
            |name: &str| env::var(name).ok().and_then(|v| v.trim().parse::<u16>().ok());

        from_env(&self.port_env)
            .or(self.port)
            .or_else(|| from_env("PORT"))
            .unwrap_or(DEFAULT_PORT)
    }

    /// Host precedence mirrors [`ServiceConfig::resolve_port`].
    pub fn resolve_host(&self) -> String {
        let from_env = |name: &str| {
            env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        from_env(&self.host_env)
            .or_else(|| self.host.clone())
            .or_else(|| from_env("HOST"))
            .unwrap_or_else(|| DEFAULT_HOST.to_string())
    }

    /// Full URL of the health endpoint.
    pub fn health_endpoint(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.resolve_host(),
            self.resolve_port(),
            self.health_path
        )
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.repo_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "service.repo_url",
                reason: "must not be empty".into(),
            });
        }

        let name = self.repo_name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(ConfigError::InvalidValue {
                field: "service.repo_name",
                reason: format!("'{}' is not a plain directory name", self.repo_name),
            });
        }

        if !self.health_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "service.health_path",
                reason: format!("'{}' must start with '/'", self.health_path),
            });
        }

        Ok(())
    }
}

impl Config {
    /// Install root requested by the configuration file, if any.
    pub fn install_dir(&self) -> Option<PathBuf> {
        self.install_dir
            .as_deref()
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
    }
}

/// Expands `$VAR` and `${VAR}` references within a string.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").map_err(|err| {
        ConfigError::InvalidValue {
            field: "env expansion",
            reason: err.to_string(),
        }
    })?;

    let mut missing = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(ConfigError::MissingEnvVar(name)),
        None => Ok(result.into_owned()),
    }
}

/// Loads and parses the configuration file, expanding environment variables.
///
/// Without an explicit path, `svcctl.yaml` in the working directory is used when present and
/// built-in defaults otherwise.
pub fn load_config(config_path: Option<&Path>) -> Result<Config, ConfigError> {
    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => {
            let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !candidate.exists() {
                return Ok(Config::default());
            }
            candidate
        }
    };

    let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.clone(),
        source,
    })?;

    let expanded = expand_env_vars(&content)?;
    let config: Config = if expanded.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(&expanded)?
    };

    config.service.validate()?;
    Ok(config)
}
