//! Illumination coordinator.
//!
//! Launches the external helper that sets up lighting for the capture (for
//! example, switching the parking LEDs to a steady color) and waits until it
//! reports ready. The helper signals readiness by creating the file named in
//! [`READY_FILE_ENV`]. Without a ready file the coordinator falls back to a
//! fixed settle delay.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::thread;
use std::time::{Duration, Instant};

use crate::process::{self, ProcessError, Supervised};

/// Environment variable telling the helper where to signal readiness.
pub const READY_FILE_ENV: &str = "GARAGE_BACKGROUND_READY_FILE";

/// Interval between readiness polls.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How the coordinator decides the helper is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Wait for the helper to create `path`, giving up after `timeout`
    ReadyFile { path: PathBuf, timeout: Duration },
    /// Wait a fixed interval
    Settle(Duration),
}

/// Helper process configuration.
#[derive(Debug, Clone)]
pub struct IlluminationSettings {
    pub helper: PathBuf,
    pub args: Vec<String>,
    pub readiness: Readiness,
    /// Time allowed between SIGINT and SIGKILL when stopping the helper
    pub stop_grace: Duration,
}

impl IlluminationSettings {
    pub fn new(helper: PathBuf) -> Self {
        Self {
            helper,
            args: Vec::new(),
            readiness: Readiness::Settle(Duration::from_secs(2)),
            stop_grace: Duration::from_secs(2),
        }
    }
}

/// Errors raised by the illumination coordinator.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("failed to launch illumination helper: {0}")]
    Launch(#[source] ProcessError),

    #[error(
        "illumination helper did not create '{}' within {timeout:?}",
        .ready_file.display()
    )]
    NotReady {
        ready_file: PathBuf,
        timeout: Duration,
    },

    #[error("illumination helper exited before capture ({status})")]
    Exited { status: ExitStatus },

    #[error("cannot clear stale ready file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("interrupted while waiting for the illumination helper")]
    Interrupted,
}

/// Runs the illumination helper for the duration of one pipeline run.
#[derive(Debug)]
pub struct IlluminationCoordinator {
    settings: IlluminationSettings,
    helper: Option<Supervised>,
}

impl IlluminationCoordinator {
    pub fn new(settings: IlluminationSettings) -> Self {
        Self {
            settings,
            helper: None,
        }
    }

    /// Whether the helper has been launched (and not yet stopped).
    pub fn is_started(&self) -> bool {
        self.helper.is_some()
    }

    fn ready_file(&self) -> Option<&Path> {
        match &self.settings.readiness {
            Readiness::ReadyFile { path, .. } => Some(path),
            Readiness::Settle(_) => None,
        }
    }

    /// Launch the helper and return without waiting for it.
    pub fn start(&mut self) -> Result<(), CoordinatorError> {
        if self.helper.is_some() {
            return Ok(());
        }

        let mut envs: Vec<(&str, &Path)> = Vec::new();
        if let Some(ready) = self.ready_file() {
            remove_if_exists(ready).map_err(|e| CoordinatorError::Io {
                path: ready.to_path_buf(),
                source: e,
            })?;
            envs.push((READY_FILE_ENV, ready));
        }

        let program = self.settings.helper.to_string_lossy().into_owned();
        let helper = Supervised::spawn(&program, &self.settings.args, &envs)
            .map_err(CoordinatorError::Launch)?;
        log::info!("Started illumination helper {} (pid {})", program, helper.pid());
        self.helper = Some(helper);
        Ok(())
    }

    /// Block until the helper is ready for capture.
    ///
    /// Returns the time spent waiting. Fails early if the helper exits.
    pub fn wait_ready(&mut self) -> Result<Duration, CoordinatorError> {
        let start = Instant::now();
        match self.settings.readiness.clone() {
            Readiness::ReadyFile { path, timeout } => loop {
                if path.exists() {
                    log::info!("Illumination helper ready after {:?}", start.elapsed());
                    return Ok(start.elapsed());
                }
                self.check_alive()?;
                if process::ctrlc_received() {
                    return Err(CoordinatorError::Interrupted);
                }
                if start.elapsed() > timeout {
                    return Err(CoordinatorError::NotReady {
                        ready_file: path,
                        timeout,
                    });
                }
                thread::sleep(POLL_INTERVAL);
            },
            Readiness::Settle(delay) => {
                log::info!("Waiting {:?} for illumination to settle", delay);
                while start.elapsed() < delay {
                    self.check_alive()?;
                    if process::ctrlc_received() {
                        return Err(CoordinatorError::Interrupted);
                    }
                    thread::sleep(POLL_INTERVAL.min(delay - start.elapsed().min(delay)));
                }
                self.check_alive()?;
                Ok(start.elapsed())
            }
        }
    }

    /// Fail if the helper was started and has since exited.
    pub fn check_alive(&mut self) -> Result<(), CoordinatorError> {
        if let Some(helper) = self.helper.as_mut() {
            if let Some(status) = helper.try_exit_status() {
                for line in helper.take_stderr_output() {
                    log::warn!("[helper] {}", line);
                }
                return Err(CoordinatorError::Exited { status });
            }
        }
        Ok(())
    }

    /// Stop the helper and clear the ready file. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(mut helper) = self.helper.take() {
            match helper.shutdown(self.settings.stop_grace) {
                Ok(status) => log::info!("Illumination helper stopped ({})", status),
                Err(e) => log::warn!("Failed to stop illumination helper: {}", e),
            }
        }
        if let Some(ready) = self.ready_file() {
            if let Err(e) = remove_if_exists(ready) {
                log::warn!("Failed to remove ready file {}: {}", ready.display(), e);
            }
        }
    }
}

impl Drop for IlluminationCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
