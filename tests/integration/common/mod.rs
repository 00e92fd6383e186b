#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::Instant;

use svcctl::{
    error::ServiceError,
    health::HealthProbe,
    installer::InstallerGateway,
    manager::LifecycleManager,
    platform::Platform,
    runner::{CommandSpec, LineSink, ProcessRunner},
};

pub const FAKE_ENDPOINT: &str = "http://127.0.0.1:8868/health";

/// Simulated server process shared by the fake runner and the fake probe.
///
/// The start command brings it up after `start_delay`, the stop command takes it down after
/// `stop_delay`. Times are on tokio's clock so paused-clock tests control them.
pub struct FakeServer {
    up_since: Mutex<Option<Instant>>,
    down_since: Mutex<Option<Instant>>,
    pub start_delay: Mutex<Option<Duration>>,
    pub stop_delay: Mutex<Option<Duration>>,
    pub probes: AtomicUsize,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            up_since: Mutex::new(None),
            down_since: Mutex::new(None),
            start_delay: Mutex::new(Some(Duration::from_secs(5))),
            stop_delay: Mutex::new(Some(Duration::from_secs(3))),
            probes: AtomicUsize::new(0),
        })
    }

    /// Server already answering.
    pub fn already_running(self: &Arc<Self>) -> Arc<Self> {
        *self.up_since.lock().unwrap() = Some(Instant::now());
        Arc::clone(self)
    }

    /// Start commands never bring the server up.
    pub fn never_starts(&self) {
        *self.start_delay.lock().unwrap() = None;
    }

    /// Stop commands never take the server down.
    pub fn never_stops(&self) {
        *self.stop_delay.lock().unwrap() = None;
    }

    fn launched(&self) {
        if let Some(delay) = *self.start_delay.lock().unwrap() {
            *self.up_since.lock().unwrap() = Some(Instant::now() + delay);
            *self.down_since.lock().unwrap() = None;
        }
    }

    fn stopped(&self) {
        if let Some(delay) = *self.stop_delay.lock().unwrap() {
            *self.down_since.lock().unwrap() = Some(Instant::now() + delay);
        }
    }

    pub fn is_up(&self) -> bool {
        let now = Instant::now();
        let up = self.up_since.lock().unwrap().is_some_and(|at| now >= at);
        let down = self.down_since.lock().unwrap().is_some_and(|at| now >= at);
        up && !down
    }
}

pub struct FakeProbe {
    pub server: Arc<FakeServer>,
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn is_healthy(&self) -> bool {
        self.server.probes.fetch_add(1, Ordering::SeqCst);
        self.server.is_up()
    }

    fn endpoint(&self) -> &str {
        FAKE_ENDPOINT
    }
}

/// Records every command and drives the fake server from the `start`/`stop` labels.
pub struct FakeRunner {
    pub server: Arc<FakeServer>,
    pub commands: Mutex<Vec<CommandSpec>>,
    pub start_exit_code: Mutex<Option<i32>>,
}

impl FakeRunner {
    pub fn labels(&self) -> Vec<&'static str> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|spec| spec.label)
            .collect()
    }

    pub fn count(&self, label: &str) -> usize {
        self.labels().into_iter().filter(|l| *l == label).count()
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec, sink: &LineSink<'_>) -> Result<(), ServiceError> {
        self.commands.lock().unwrap().push(spec.clone());
        match spec.label {
            "start" => {
                sink("start", "Launching server in background");
                self.server.launched();
                if let Some(code) = *self.start_exit_code.lock().unwrap() {
                    return Err(ServiceError::CommandFailure {
                        command: spec.program.clone(),
                        args: spec.args.clone(),
                        code: Some(code),
                    });
                }
            }
            "stop" => {
                sink("stop", "Stopping server");
                self.server.stopped();
            }
            _ => {}
        }
        Ok(())
    }
}

/// In-memory artifact tree.
pub struct FakeInstaller {
    repo_dir: PathBuf,
    pub installed: AtomicBool,
    pub marker: AtomicBool,
    pub fetches: AtomicUsize,
    pub removals: AtomicUsize,
    pub fetched_at: Mutex<Option<Instant>>,
    pub fail_fetch: AtomicBool,
    pub marked: Mutex<Vec<PathBuf>>,
}

impl FakeInstaller {
    pub fn new(installed: bool) -> Self {
        Self {
            repo_dir: PathBuf::from("/srv/svcctl/fast-fast-whisper"),
            installed: AtomicBool::new(installed),
            marker: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
            removals: AtomicUsize::new(0),
            fetched_at: Mutex::new(None),
            fail_fetch: AtomicBool::new(false),
            marked: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl InstallerGateway for FakeInstaller {
    fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    async fn exists(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    async fn marker_present(&self) -> bool {
        self.marker.load(Ordering::SeqCst)
    }

    async fn clear_marker(&self) {
        self.marker.store(false, Ordering::SeqCst);
    }

    async fn fetch(&self, sink: &LineSink<'_>) -> Result<(), ServiceError> {
        if self.installed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        sink("install", "Cloning into 'fast-fast-whisper'...");
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ServiceError::CommandFailure {
                command: "git".into(),
                args: vec!["clone".into()],
                code: Some(128),
            });
        }
        *self.fetched_at.lock().unwrap() = Some(Instant::now());
        self.installed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self) -> Result<(), ServiceError> {
        self.removals.fetch_add(1, Ordering::SeqCst);
        self.installed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn mark_executable(&self, files: &[PathBuf]) {
        self.marked.lock().unwrap().extend_from_slice(files);
    }
}

/// Fakes wired into a manager.
pub struct Harness {
    pub server: Arc<FakeServer>,
    pub runner: Arc<FakeRunner>,
    pub probe: Arc<FakeProbe>,
    pub installer: Arc<FakeInstaller>,
}

impl Harness {
    pub fn fresh() -> Self {
        Self::with(FakeServer::new(), false)
    }

    pub fn installed() -> Self {
        Self::with(FakeServer::new(), true)
    }

    pub fn running() -> Self {
        let server = FakeServer::new().already_running();
        Self::with(server, true)
    }

    fn with(server: Arc<FakeServer>, installed: bool) -> Self {
        Self {
            runner: Arc::new(FakeRunner {
                server: Arc::clone(&server),
                commands: Mutex::new(Vec::new()),
                start_exit_code: Mutex::new(None),
            }),
            probe: Arc::new(FakeProbe {
                server: Arc::clone(&server),
            }),
            installer: Arc::new(FakeInstaller::new(installed)),
            server,
        }
    }

    pub fn manager(&self) -> LifecycleManager {
        LifecycleManager::with_components(
            self.runner.clone(),
            self.probe.clone(),
            self.installer.clone(),
        )
        .with_platform(Platform::Unix)
    }
}
