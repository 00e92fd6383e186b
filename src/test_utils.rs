//! Helpers shared by unit and integration tests.
use std::{
    env,
    ffi::{OsStr, OsString},
    sync::{Mutex, MutexGuard, OnceLock},
};

/// Serializes tests that touch process environment variables.
pub static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sets (or clears) one environment variable for the lifetime of the guard and restores the
/// previous value on drop. Holds [`env_lock`] while alive.
pub struct EnvVarGuard {
    key: String,
    previous: Option<OsString>,
    _lock: MutexGuard<'static, ()>,
}

impl EnvVarGuard {
    pub fn set(key: &str, value: impl AsRef<OsStr>) -> Self {
        let lock = env_lock();
        let previous = env::var_os(key);
        unsafe { env::set_var(key, value) };
        Self {
            key: key.to_string(),
            previous,
            _lock: lock,
        }
    }

    pub fn unset(key: &str) -> Self {
        let lock = env_lock();
        let previous = env::var_os(key);
        unsafe { env::remove_var(key) };
        Self {
            key: key.to_string(),
            previous,
            _lock: lock,
        }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        match &self.previous {
            Some(value) => unsafe { env::set_var(&self.key, value) },
            None => unsafe { env::remove_var(&self.key) },
        }
    }
}
