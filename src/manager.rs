//! The lifecycle orchestrator for the managed local server.
//!
//! [`LifecycleManager`] drives the installer, the process runner and the health probe through
//! install, start, stop, restart and reinstall. Mutating operations are single-flight: a second
//! request while one is running fails with [`ServiceError::OperationInProgress`] and changes
//! nothing. Status queries never wait for the lock.
use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::Utc;
use strum_macros::{Display, IntoStaticStr};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::{debug, error, info, warn};

use crate::{
    broadcast::{ObserverId, StatusBroadcaster, StatusObserver},
    config::Config,
    constants::{HEALTH_POLL_INTERVAL, OPERATION_LOG_FILE, START_TIMEOUT, STOP_TIMEOUT},
    error::ServiceError,
    health::{HealthProbe, HttpHealthProbe, wait_for_health},
    installer::{GitInstaller, InstallerGateway},
    logs::OperationLog,
    platform::{Platform, script_env},
    runner::{CommandRunner, CommandSpec, ProcessRunner, StepOutcome},
    runtime::RuntimePaths,
    status::{LastAction, Phase, ServiceStatus, StatusStore, StatusUpdate},
};

const MSG_NOT_INSTALLED: &str = "Local server is not installed.";
const MSG_STOPPED: &str = "Server is stopped.";
const MSG_RUNNING: &str = "Local server is running.";
const MSG_ALREADY_RUNNING: &str = "Local server is already running.";
const MSG_CLONING: &str = "Cloning repository…";
const MSG_REMOVING: &str = "Removing previous installation…";
const MSG_REPO_READY: &str = "Repository ready.";
const MSG_STARTING: &str = "Starting local server…";
const MSG_STOPPING: &str = "Stopping local server…";

/// Mutating lifecycle operations, used for locking diagnostics and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Operation {
    Install,
    Start,
    Restart,
    Reinstall,
    Stop,
    EnsureRunning,
}

impl Operation {
    pub fn label(self) -> &'static str {
        self.into()
    }
}

/// Polling cadence and ceilings used while waiting on the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub poll_interval: Duration,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval: HEALTH_POLL_INTERVAL,
            start_timeout: START_TIMEOUT,
            stop_timeout: STOP_TIMEOUT,
        }
    }
}

/// Holds the exclusive operation lock and records which operation owns it.
struct OperationGuard<'a> {
    slot: &'a Mutex<Option<Operation>>,
    _lock: AsyncMutexGuard<'a, ()>,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        *lock_slot(self.slot) = None;
    }
}

fn lock_slot(slot: &Mutex<Option<Operation>>) -> MutexGuard<'_, Option<Operation>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Orchestrates the managed server's lifecycle and publishes its status.
pub struct LifecycleManager {
    store: StatusStore,
    broadcaster: StatusBroadcaster,
    runner: Arc<dyn ProcessRunner>,
    probe: Arc<dyn HealthProbe>,
    installer: Arc<dyn InstallerGateway>,
    platform: Platform,
    script_env: Vec<(String, String)>,
    timings: Timings,
    operation_log: Option<OperationLog>,
    op_lock: AsyncMutex<()>,
    running_op: Mutex<Option<Operation>>,
}

impl LifecycleManager {
    /// Builds a manager wired to the real git installer, shell runner and HTTP probe.
    pub fn new(config: &Config, paths: &RuntimePaths) -> Result<Self, ServiceError> {
        let service = &config.service;
        let root = paths.resolve_install_root(config.install_dir().as_deref());
        let runner: Arc<dyn ProcessRunner> = Arc::new(CommandRunner);
        let installer = GitInstaller::new(
            service.repo_url.clone(),
            root,
            &service.repo_name,
            &service.marker_file,
            Arc::clone(&runner),
        );
        let probe = HttpHealthProbe::new(service.health_endpoint())?;

        Ok(
            Self::with_components(runner, Arc::new(probe), Arc::new(installer))
                .with_script_env(script_env(service))
                .with_operation_log(OperationLog::new(
                    paths.log_dir().join(OPERATION_LOG_FILE),
                )),
        )
    }

    /// Builds a manager from explicit collaborators.
    pub fn with_components(
        runner: Arc<dyn ProcessRunner>,
        probe: Arc<dyn HealthProbe>,
        installer: Arc<dyn InstallerGateway>,
    ) -> Self {
        let mut initial = ServiceStatus::new(MSG_NOT_INSTALLED);
        initial.install_dir = Some(installer.repo_dir().display().to_string());

        Self {
            store: StatusStore::new(initial),
            broadcaster: StatusBroadcaster::default(),
            runner,
            probe,
            installer,
            platform: Platform::current(),
            script_env: Vec::new(),
            timings: Timings::default(),
            operation_log: None,
            op_lock: AsyncMutex::new(()),
            running_op: Mutex::new(None),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_script_env(mut self, env: Vec<(String, String)>) -> Self {
        self.script_env = env;
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: StatusBroadcaster) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn with_operation_log(mut self, log: OperationLog) -> Self {
        self.operation_log = Some(log);
        self
    }

    pub fn operation_log(&self) -> Option<&OperationLog> {
        self.operation_log.as_ref()
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    pub fn attach_observer(&self, observer: Arc<dyn StatusObserver>) -> ObserverId {
        self.broadcaster.attach(observer)
    }

    pub fn detach_observer(&self, id: ObserverId) -> bool {
        self.broadcaster.detach(id)
    }

    pub fn has_active_observers(&self) -> bool {
        self.broadcaster.has_active_observers()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Cached snapshot, without probing anything.
    pub fn snapshot(&self) -> ServiceStatus {
        self.store.snapshot()
    }

    /// Probes the health endpoint once without touching the status.
    pub async fn is_healthy(&self) -> bool {
        self.probe.is_healthy().await
    }

    /// Operation currently holding the lock, if any.
    pub fn current_operation(&self) -> Option<Operation> {
        *lock_slot(&self.running_op)
    }

    /// Reconciles the status with the artifact tree and the health endpoint.
    ///
    /// While an operation is in flight the cached snapshot is returned as is; the operation
    /// owns the status until it finishes.
    pub async fn get_status(&self) -> ServiceStatus {
        if self.current_operation().is_some() {
            return self.store.snapshot();
        }

        let revision = self.store.revision();
        let update = self.probe_environment().await;
        match self.store.merge_if_unchanged(revision, update) {
            Some(snapshot) => {
                self.broadcaster.notify(snapshot.clone());
                snapshot
            }
            None => self.store.snapshot(),
        }
    }

    // ------------------------------------------------------------------
    // Mutating operations
    // ------------------------------------------------------------------

    /// Installs the server if needed and starts it.
    pub async fn install_and_start(&self) -> Result<ServiceStatus, ServiceError> {
        self.execute(Operation::Install, self.install_then_start(LastAction::Install))
            .await
    }

    /// Starts the existing installation, installing first if it is missing.
    pub async fn start_existing(&self) -> Result<ServiceStatus, ServiceError> {
        self.execute(Operation::Start, self.install_then_start(LastAction::Start))
            .await
    }

    /// Stops whatever is running and starts again.
    pub async fn restart(&self) -> Result<ServiceStatus, ServiceError> {
        self.execute(Operation::Restart, async {
            self.ensure_installed(false).await?;
            self.stop_tolerating_timeout().await?;
            self.launch(LastAction::Restart).await
        })
        .await
    }

    /// Stops the server, replaces the artifact tree with a fresh fetch and starts it.
    pub async fn reinstall(&self) -> Result<ServiceStatus, ServiceError> {
        self.execute(Operation::Reinstall, async {
            self.stop_tolerating_timeout().await?;
            self.ensure_installed(true).await?;
            self.launch(LastAction::Reinstall).await
        })
        .await
    }

    /// Stops the server if it runs or left a process marker behind.
    ///
    /// A server that keeps answering after the stop ceiling does not fail the call; the
    /// returned status reports it as still running instead.
    pub async fn stop(&self) -> Result<ServiceStatus, ServiceError> {
        self.execute(Operation::Stop, async {
            match self.stop_step().await {
                Ok(()) => Ok(self.store.snapshot()),
                Err(ServiceError::StopTimeout { endpoint, elapsed }) => {
                    warn!(%endpoint, "Local server still healthy {}s after stop", elapsed.as_secs());
                    Ok(self.publish(
                        StatusUpdate::new()
                            .installed(true)
                            .running(true)
                            .phase(Phase::Running)
                            .message(format!(
                                "Server did not stop within {}s and is still running.",
                                elapsed.as_secs()
                            )),
                    ))
                }
                Err(err) => Err(err),
            }
        })
        .await
    }

    /// Starts the existing installation unless the server already answers its health check.
    pub async fn ensure_running(&self) -> Result<ServiceStatus, ServiceError> {
        if self.probe.is_healthy().await {
            debug!("Local server already healthy; auto-start skipped");
            return Ok(self.get_status().await);
        }
        self.execute(
            Operation::EnsureRunning,
            self.install_then_start(LastAction::Start),
        )
        .await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn begin(&self, op: Operation) -> Result<OperationGuard<'_>, ServiceError> {
        let lock = self.op_lock.try_lock().map_err(|_| {
            let running = self.current_operation().map_or("another", Operation::label);
            warn!(
                requested = op.label(),
                running, "Refusing lifecycle operation: another one is in progress"
            );
            ServiceError::OperationInProgress {
                requested: op.label(),
                running,
            }
        })?;
        *lock_slot(&self.running_op) = Some(op);
        Ok(OperationGuard {
            slot: &self.running_op,
            _lock: lock,
        })
    }

    async fn execute<F>(&self, op: Operation, body: F) -> Result<ServiceStatus, ServiceError>
    where
        F: Future<Output = Result<ServiceStatus, ServiceError>>,
    {
        let _guard = self.begin(op)?;
        info!(operation = op.label(), "Lifecycle operation started");

        match body.await {
            Ok(status) => {
                info!(operation = op.label(), phase = %status.phase, "Lifecycle operation finished");
                Ok(status)
            }
            Err(err) => {
                error!(operation = op.label(), "Lifecycle operation failed: {err}");
                self.publish(
                    StatusUpdate::new()
                        .phase(Phase::Error)
                        .error(err.to_string())
                        .message(err.to_string()),
                );
                Err(err)
            }
        }
    }

    fn publish(&self, update: StatusUpdate) -> ServiceStatus {
        let snapshot = self.store.merge(update);
        debug!(phase = %snapshot.phase, "{}", snapshot.message);
        self.broadcaster.notify(snapshot.clone());
        snapshot
    }

    async fn probe_environment(&self) -> StatusUpdate {
        let installed = self.installer.exists().await;
        let running = installed && self.probe.is_healthy().await;
        let (phase, message) = match (installed, running) {
            (true, true) => (Phase::Running, MSG_RUNNING),
            (true, false) => (Phase::Idle, MSG_STOPPED),
            (false, _) => (Phase::NotInstalled, MSG_NOT_INSTALLED),
        };
        StatusUpdate::new()
            .installed(installed)
            .running(running)
            .phase(phase)
            .message(message)
    }

    /// Reconciles while holding the operation lock.
    async fn refresh(&self) -> ServiceStatus {
        let update = self.probe_environment().await;
        self.publish(update)
    }

    /// Forwards subprocess output to the operation log and the status `log_line`.
    ///
    /// While installing or starting, the line also becomes the status message.
    fn line_sink(&self) -> impl Fn(&str, &str) + Send + Sync + '_ {
        move |label, line| {
            if let Some(log) = &self.operation_log {
                log.append(label, line);
            }
            let update = StatusUpdate::new().log_line(line);
            let update = match self.store.snapshot().phase {
                Phase::Installing | Phase::Starting => update.message(line),
                _ => update,
            };
            self.publish(update);
        }
    }

    async fn run_command(&self, spec: &CommandSpec) -> Result<(), ServiceError> {
        let sink = self.line_sink();
        self.runner.run(spec, &sink).await
    }

    async fn install_then_start(&self, action: LastAction) -> Result<ServiceStatus, ServiceError> {
        let current = self.refresh().await;
        if current.running {
            info!("{MSG_ALREADY_RUNNING}");
            return Ok(self.publish(StatusUpdate::new().message(MSG_ALREADY_RUNNING)));
        }

        self.ensure_installed(false).await?;
        self.launch(action).await
    }

    async fn ensure_installed(&self, force: bool) -> Result<(), ServiceError> {
        let repo_dir = self.installer.repo_dir().display().to_string();

        if force {
            self.publish(
                StatusUpdate::new()
                    .phase(Phase::Installing)
                    .running(false)
                    .message(MSG_REMOVING)
                    .install_dir(repo_dir.as_str()),
            );
            self.installer.remove().await?;
        } else if self.installer.exists().await {
            debug!("Artifact tree present at {repo_dir}; skipping fetch");
            self.publish(StatusUpdate::new().installed(true).install_dir(repo_dir));
            return Ok(());
        }

        self.publish(
            StatusUpdate::new()
                .installed(false)
                .running(false)
                .phase(Phase::Installing)
                .message(MSG_CLONING)
                .install_dir(repo_dir.as_str())
                .clear_log_line(),
        );

        let sink = self.line_sink();
        StepOutcome::from(self.installer.fetch(&sink).await).into_result()?;

        let scripts = self.platform.launch_scripts(self.installer.repo_dir());
        self.installer.mark_executable(&scripts).await;

        info!("Local server installed at {repo_dir}");
        self.publish(StatusUpdate::new().installed(true).message(MSG_REPO_READY));
        Ok(())
    }

    /// Starts the server and waits for it to become healthy.
    ///
    /// The launch command's exit code is advisory: the health endpoint decides. The launch
    /// error only surfaces when the server also never comes up.
    async fn launch(&self, action: LastAction) -> Result<ServiceStatus, ServiceError> {
        if self.installer.marker_present().await || self.probe.is_healthy().await {
            info!("Previous server instance detected; stopping it before launch");
            if let Err(err) = self.stop_step().await {
                warn!("Pre-start cleanup failed: {err}");
            }
        }

        self.publish(
            StatusUpdate::new()
                .installed(true)
                .running(false)
                .phase(Phase::Starting)
                .message(MSG_STARTING)
                .clear_log_line(),
        );

        let spec = self
            .platform
            .start_command(self.installer.repo_dir(), &self.script_env);
        let launch = StepOutcome::from(self.run_command(&spec).await);
        if let Some(err) = &launch.error {
            warn!("Launch command failed, waiting for the health endpoint anyway: {err}");
            self.publish(StatusUpdate::new().message(format!("Launch script reported: {err}")));
        }

        if let Err(timeout) = wait_for_health(
            self.probe.as_ref(),
            true,
            self.timings.poll_interval,
            self.timings.start_timeout,
        )
        .await
        {
            return Err(launch.error.unwrap_or(timeout));
        }

        let verb = match action {
            LastAction::Install => "installed",
            LastAction::Start => "started",
            LastAction::Restart => "restarted",
            LastAction::Reinstall => "reinstalled",
        };
        let message = if launch.ran_ok {
            format!("Server {verb}.")
        } else {
            format!("Server {verb} with warnings.")
        };

        Ok(self.publish(
            StatusUpdate::new()
                .installed(true)
                .running(true)
                .phase(Phase::Running)
                .message(message)
                .last_action(action)
                .last_success_at(Utc::now()),
        ))
    }

    /// Stops the server if there is anything to stop.
    ///
    /// Fails only with [`ServiceError::StopTimeout`]; the stop command's own failure is logged.
    async fn stop_step(&self) -> Result<(), ServiceError> {
        if !self.installer.exists().await {
            self.publish(
                StatusUpdate::new()
                    .phase(Phase::NotInstalled)
                    .message(MSG_NOT_INSTALLED),
            );
            return Ok(());
        }

        let marker = self.installer.marker_present().await;
        if !marker && !self.probe.is_healthy().await {
            debug!("Local server not running; stop command skipped");
            self.publish(
                StatusUpdate::new()
                    .installed(true)
                    .running(false)
                    .phase(Phase::Idle)
                    .message(MSG_STOPPED),
            );
            return Ok(());
        }

        self.publish(
            StatusUpdate::new()
                .installed(true)
                .phase(Phase::Stopping)
                .message(MSG_STOPPING)
                .clear_log_line(),
        );

        let spec = self
            .platform
            .stop_command(self.installer.repo_dir(), &self.script_env);
        if let Some(err) = StepOutcome::from(self.run_command(&spec).await).error {
            warn!("Stop command failed: {err}");
        }

        wait_for_health(
            self.probe.as_ref(),
            false,
            self.timings.poll_interval,
            self.timings.stop_timeout,
        )
        .await?;

        self.installer.clear_marker().await;
        self.publish(
            StatusUpdate::new()
                .installed(true)
                .running(false)
                .phase(Phase::Idle)
                .message(MSG_STOPPED),
        );
        Ok(())
    }

    /// Stop as a prelude to restart or reinstall: a server that will not go down is not fatal.
    async fn stop_tolerating_timeout(&self) -> Result<(), ServiceError> {
        match self.stop_step().await {
            Err(err @ ServiceError::StopTimeout { .. }) => {
                warn!("{err}; proceeding anyway");
                Ok(())
            }
            other => other,
        }
    }
}
