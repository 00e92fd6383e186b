//! Status model of the managed server and the store that owns the current snapshot.
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Coarse lifecycle state of the managed server.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Phase {
    NotInstalled,
    Idle,
    Installing,
    Starting,
    Running,
    Stopping,
    Error,
}

/// Lifecycle operation that most recently completed successfully.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LastAction {
    Install,
    Start,
    Restart,
    Reinstall,
}

/// Snapshot of the managed server's state as last observed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub installed: bool,
    pub running: bool,
    pub phase: Phase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_action: Option<LastAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_line: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceStatus {
    /// Initial snapshot: nothing is known to be installed yet.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            installed: false,
            running: false,
            phase: Phase::NotInstalled,
            message: message.into(),
            error: None,
            last_action: None,
            last_success_at: None,
            log_line: None,
            install_dir: None,
            updated_at: Utc::now(),
        }
    }
}

/// Partial update merged into the current [`ServiceStatus`].
///
/// Optional fields use a nested `Option`: `None` leaves the field alone, `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    installed: Option<bool>,
    running: Option<bool>,
    phase: Option<Phase>,
    message: Option<String>,
    error: Option<Option<String>>,
    last_action: Option<Option<LastAction>>,
    last_success_at: Option<Option<DateTime<Utc>>>,
    log_line: Option<Option<String>>,
    install_dir: Option<Option<String>>,
}

impl StatusUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn installed(mut self, installed: bool) -> Self {
        self.installed = Some(installed);
        self
    }

    pub fn running(mut self, running: bool) -> Self {
        self.running = Some(running);
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Some(error.into()));
        self
    }

    pub fn last_action(mut self, action: LastAction) -> Self {
        self.last_action = Some(Some(action));
        self
    }

    pub fn last_success_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_success_at = Some(Some(at));
        self
    }

    pub fn log_line(mut self, line: impl Into<String>) -> Self {
        self.log_line = Some(Some(line.into()));
        self
    }

    pub fn clear_log_line(mut self) -> Self {
        self.log_line = Some(None);
        self
    }

    pub fn install_dir(mut self, dir: impl Into<String>) -> Self {
        self.install_dir = Some(Some(dir.into()));
        self
    }

    /// Applies the update to `status`, then re-establishes the snapshot invariants.
    fn apply(self, status: &mut ServiceStatus) {
        if let Some(installed) = self.installed {
            status.installed = installed;
        }
        if let Some(running) = self.running {
            status.running = running;
        }
        if let Some(phase) = self.phase {
            status.phase = phase;
        }
        if let Some(message) = self.message {
            status.message = message;
        }
        if let Some(error) = self.error {
            status.error = error;
        }
        if let Some(action) = self.last_action {
            status.last_action = action;
        }
        if let Some(at) = self.last_success_at {
            status.last_success_at = at;
        }
        if let Some(line) = self.log_line {
            status.log_line = line;
        }
        if let Some(dir) = self.install_dir {
            status.install_dir = dir;
        }

        match status.phase {
            Phase::Running => status.running = true,
            Phase::NotInstalled => {
                status.installed = false;
                status.running = false;
            }
            _ => {}
        }
        if status.phase != Phase::Error {
            status.error = None;
        }
    }
}

#[derive(Debug)]
struct StoreState {
    status: ServiceStatus,
    revision: u64,
}

/// Holds the current [`ServiceStatus`] and applies partial updates atomically.
///
/// Every merge bumps a revision counter so that a reader which probed the environment without
/// holding the operation lock can refuse to overwrite progress written in the meantime.
#[derive(Debug)]
pub struct StatusStore {
    inner: Mutex<StoreState>,
}

impl StatusStore {
    pub fn new(initial: ServiceStatus) -> Self {
        Self {
            inner: Mutex::new(StoreState {
                status: initial,
                revision: 0,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns a copy of the current snapshot.
    pub fn snapshot(&self) -> ServiceStatus {
        self.state().status.clone()
    }

    /// Current revision, paired with [`StatusStore::merge_if_unchanged`].
    pub fn revision(&self) -> u64 {
        self.state().revision
    }

    /// Shallow-merges `update` into the snapshot and refreshes `updated_at`.
    pub fn merge(&self, update: StatusUpdate) -> ServiceStatus {
        let mut state = self.state();
        Self::merge_locked(&mut state, update)
    }

    /// Merges only if no other merge happened since `revision` was read.
    pub fn merge_if_unchanged(
        &self,
        revision: u64,
        update: StatusUpdate,
    ) -> Option<ServiceStatus> {
        let mut state = self.state();
        if state.revision != revision {
            return None;
        }
        Some(Self::merge_locked(&mut state, update))
    }

    fn merge_locked(state: &mut StoreState, update: StatusUpdate) -> ServiceStatus {
        update.apply(&mut state.status);
        // Wall clocks can step backwards; updated_at must not.
        let now = Utc::now();
        if now > state.status.updated_at {
            state.status.updated_at = now;
        }
        state.revision += 1;
        state.status.clone()
    }
}
