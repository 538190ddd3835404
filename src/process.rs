//! External process management for garage-background.
//!
//! This module handles spawning, monitoring, and terminating the external
//! programs the pipeline drives: the camera command, the optional ffmpeg
//! transform backend, and the long-running illumination helper.

use std::ffi::OsStr;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Interval between exit-status polls.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors that can occur while running an external program.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("'{program}' not found; is it installed and on PATH?")]
    NotFound { program: String },

    #[error("failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' did not finish within {timeout:?} and was killed")]
    TimedOut { program: String, timeout: Duration },

    #[error("'{program}' exited with code {exit_code:?}{}", format_stderr(.stderr))]
    Failed {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error while waiting for '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

fn format_stderr(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!("\n{}", stderr.trim_end())
    }
}

fn spawn_error(program: &str, e: std::io::Error) -> ProcessError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ProcessError::NotFound {
            program: program.to_string(),
        }
    } else {
        ProcessError::SpawnFailed {
            program: program.to_string(),
            source: e,
        }
    }
}

/// Spawn a thread that drains the child's stderr, logging each line with
/// the given tag, and returns the collected lines.
fn drain_stderr(child: &mut Child, tag: String) -> Option<JoinHandle<Vec<String>>> {
    child.stderr.take().map(|stderr| {
        thread::spawn(move || {
            let reader = BufReader::new(stderr);
            let mut lines = Vec::new();
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        log::debug!("[{}] {}", tag, l);
                        lines.push(l);
                    }
                    Err(_) => break,
                }
            }
            lines
        })
    })
}

/// Run a program to completion, bounded by `timeout`.
///
/// The program's stdout is discarded and stderr is collected for error
/// reporting. A non-zero exit status is returned as [`ProcessError::Failed`].
/// If the timeout elapses the process is killed and reaped before
/// [`ProcessError::TimedOut`] is returned.
pub fn run_to_completion<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    timeout: Duration,
) -> Result<(), ProcessError> {
    log::debug!(
        "Running: {} {}",
        program,
        args.iter()
            .map(|a| a.as_ref().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let stderr_thread = drain_stderr(&mut child, program.to_string());
    let start = Instant::now();

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ProcessError::TimedOut {
                        program: program.to_string(),
                        timeout,
                    });
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                let _ = child.kill();
                return Err(ProcessError::Io {
                    program: program.to_string(),
                    source: e,
                });
            }
        }
    };

    let stderr = stderr_thread
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
        .join("\n");

    if status.success() {
        Ok(())
    } else {
        Err(ProcessError::Failed {
            program: program.to_string(),
            exit_code: status.code(),
            stderr,
        })
    }
}

/// A long-running child process that is stopped when dropped.
pub struct Supervised {
    program: String,
    child: Child,
    stderr_thread: Option<JoinHandle<Vec<String>>>,
    exit_status: Option<ExitStatus>,
}

impl std::fmt::Debug for Supervised {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervised")
            .field("program", &self.program)
            .field("pid", &self.child.id())
            .field("exit_status", &self.exit_status)
            .finish_non_exhaustive()
    }
}

impl Supervised {
    /// Spawn `program` in the background without waiting for it.
    ///
    /// `envs` are added to the inherited environment.
    pub fn spawn<S, K, V>(program: &str, args: &[S], envs: &[(K, V)]) -> Result<Self, ProcessError>
    where
        S: AsRef<OsStr>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        for (k, v) in envs {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().map_err(|e| spawn_error(program, e))?;
        let stderr_thread = drain_stderr(&mut child, program.to_string());

        Ok(Self {
            program: program.to_string(),
            child,
            stderr_thread,
            exit_status: None,
        })
    }

    /// Process ID of the child.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Return the exit status if the process has already exited.
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        if self.exit_status.is_none() {
            if let Ok(Some(status)) = self.child.try_wait() {
                self.exit_status = Some(status);
            }
        }
        self.exit_status
    }

    /// Check if the process is still running.
    pub fn is_running(&mut self) -> bool {
        self.try_exit_status().is_none()
    }

    /// Stop the process.
    ///
    /// Sends SIGINT so the program can run its own cleanup, then waits up to
    /// `grace` before killing it. Calling this on an exited process is a no-op.
    pub fn shutdown(&mut self, grace: Duration) -> Result<ExitStatus, ProcessError> {
        if let Some(status) = self.try_exit_status() {
            return Ok(status);
        }

        #[cfg(unix)]
        {
            // SAFETY: kill(2) with a pid we own; failure is reported via errno only.
            unsafe {
                let pid = self.child.id() as i32;
                libc::kill(pid, libc::SIGINT);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }

        let start = Instant::now();
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    self.exit_status = Some(status);
                    return Ok(status);
                }
                Ok(None) => {
                    if start.elapsed() > grace {
                        log::warn!(
                            "'{}' ignored SIGINT for {:?}, killing it",
                            self.program,
                            grace
                        );
                        let _ = self.child.kill();
                        let status = self.child.wait().map_err(|e| ProcessError::Io {
                            program: self.program.clone(),
                            source: e,
                        })?;
                        self.exit_status = Some(status);
                        return Ok(status);
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(ProcessError::Io {
                        program: self.program.clone(),
                        source: e,
                    })
                }
            }
        }
    }

    /// Get the collected stderr output after the process has finished.
    pub fn take_stderr_output(&mut self) -> Vec<String> {
        if self.is_running() {
            return Vec::new();
        }
        self.stderr_thread
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default()
    }
}

impl Drop for Supervised {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.shutdown(Duration::from_secs(2));
        }
    }
}

/// Global flag for handling Ctrl+C across the application
static CTRLC_RECEIVED: AtomicBool = AtomicBool::new(false);

/// Check if Ctrl+C has been received.
pub fn ctrlc_received() -> bool {
    CTRLC_RECEIVED.load(Ordering::SeqCst)
}

/// Set up the Ctrl+C handler.
///
/// This should be called once at program startup.
pub fn setup_ctrlc_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        CTRLC_RECEIVED.store(true, Ordering::SeqCst);
        log::warn!("Received Ctrl+C, aborting after the current step...");
    })
}
