//! svcctl installs, starts, stops and health-monitors a background server that runs on the
//! local machine. A single [`manager::LifecycleManager`] serializes lifecycle operations,
//! tracks the server's status and streams status changes to observers.

/// Throttled status broadcasting.
pub mod broadcast;

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Timing ceilings, file names and defaults.
pub mod constants;

/// Error handling.
pub mod error;

/// Health probing and deadline polling.
pub mod health;

/// Artifact tree installation.
pub mod installer;

/// Operation log.
pub mod logs;

/// Lifecycle orchestration.
pub mod manager;

/// Platform-specific launch commands.
pub mod platform;

/// Subprocess execution.
pub mod runner;

/// User-scoped runtime directories.
pub mod runtime;

/// Status model and store.
pub mod status;

/// Shared helpers for tests.
#[cfg(test)]
mod test_utils;
