//! Constants and configuration values for the lifecycle orchestrator.
//!
//! Timing ceilings, file names and defaults for the managed server live here so that the
//! manager, the gateways and the tests all agree on them.

use std::time::Duration;

// ============================================================================
// Health Polling
// ============================================================================

/// Interval between health probes while waiting for the server to come up or go down.
pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Ceiling for the server to start answering its health endpoint after launch.
pub const START_TIMEOUT: Duration = Duration::from_secs(120);

/// Ceiling for the server to stop answering its health endpoint after the stop command.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-request timeout of a single health probe.
pub const HEALTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Status Broadcasting
// ============================================================================

/// Minimum spacing between two status broadcasts to observers.
pub const BROADCAST_INTERVAL: Duration = Duration::from_millis(200);

// ============================================================================
// Subprocess Output
// ============================================================================

/// Maximum number of characters of a subprocess line published in the status.
pub const MAX_LOG_LINE_CHARS: usize = 180;

/// Marker appended to truncated lines.
pub const ELLIPSIS: char = '…';

// ============================================================================
// Managed Server Defaults
// ============================================================================

/// Git repository holding the managed server.
pub const DEFAULT_REPO_URL: &str = "https://github.com/Artasov/fast-fast-whisper.git";

/// Directory name of the checkout under the install root.
pub const DEFAULT_REPO_NAME: &str = "fast-fast-whisper";

/// Host the managed server binds to.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Port the managed server listens on.
pub const DEFAULT_PORT: u16 = 8868;

/// Path of the health endpoint.
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Environment variable through which the launch scripts receive the port.
pub const DEFAULT_PORT_ENV: &str = "FAST_FAST_WHISPER_PORT";

/// Environment variable through which the launch scripts receive the host.
pub const DEFAULT_HOST_ENV: &str = "FAST_FAST_WHISPER_HOST";

/// File the launch scripts leave in the checkout while the server process is alive.
pub const DEFAULT_MARKER_FILE: &str = "server.pid";

/// Tells the launch scripts not to wait for a keypress before exiting.
pub const PAUSE_SECONDS_ENV: &str = "PAUSE_SECONDS";

// ============================================================================
// Platform Scripts
// ============================================================================

/// POSIX launch script inside the checkout.
pub const UNIX_START_SCRIPT: &str = "start-unix.sh";

/// POSIX stop script inside the checkout.
pub const UNIX_STOP_SCRIPT: &str = "stop-unix.sh";

/// Windows launch script inside the checkout.
pub const WINDOWS_START_SCRIPT: &str = "start.bat";

/// Windows stop script inside the checkout.
pub const WINDOWS_STOP_SCRIPT: &str = "stop.bat";

// ============================================================================
// Runtime Files
// ============================================================================

/// Application directory name under the user's data and config directories.
pub const APP_DIR_NAME: &str = "svcctl";

/// Environment variable that pins the install root.
pub const INSTALL_DIR_ENV: &str = "SVCCTL_INSTALL_DIR";

/// Hint file in the config directory remembering the chosen install root.
pub const INSTALL_HINT_FILE: &str = "install-path.txt";

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "svcctl.yaml";

/// Operation log written under the log directory.
pub const OPERATION_LOG_FILE: &str = "svcctl.log";

/// Number of log lines printed by `svcctl logs` when not told otherwise.
pub const DEFAULT_LOG_LINES: usize = 50;
