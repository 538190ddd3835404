//! Run lock serializing pipeline runs that publish to the same path.
//!
//! The lock is a file created with `create_new` next to the published
//! reference, holding the owner's pid. A lock whose owner is no longer alive
//! is reclaimed.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::publish::parent_dir;

/// Errors raised while taking the run lock.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error(
        "another run holds '{}'{}; remove it if no run is active",
        .path.display(),
        .pid.map(|p| format!(" (pid {})", p)).unwrap_or_default()
    )]
    Held { path: PathBuf, pid: Option<u32> },

    #[error("cannot create lock '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Exclusive claim on a published path, released on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Lock file used for `canonical`: `.<file name>.lock` in the same directory.
    pub fn path_for(canonical: &Path) -> PathBuf {
        let name = canonical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "reference".to_string());
        parent_dir(canonical).join(format!(".{}.lock", name))
    }

    /// Take the lock for `canonical`.
    pub fn acquire(canonical: &Path) -> Result<Self, LockError> {
        let path = Self::path_for(canonical);

        match Self::try_create(&path) {
            Err(LockError::Held { pid: Some(pid), .. }) if !process_alive(pid) => {
                Self::reclaim(&path, pid)?;
                Self::try_create(&path)
            }
            other => other,
        }
    }

    /// Remove a lock believed to belong to dead `stale_pid`.
    ///
    /// The lock is first renamed aside so that only one reclaimer can take
    /// it. If the renamed file names another owner, a competing run already
    /// reclaimed it; the file is linked back and the lock reported as held.
    fn reclaim(path: &Path, stale_pid: u32) -> Result<(), LockError> {
        let aside = path.with_extension(format!("lock.stale.{}", std::process::id()));
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        match std::fs::rename(path, &aside) {
            Ok(()) => {}
            // Another reclaimer moved it first; retry the create.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_err(e)),
        }

        let owner = read_owner(&aside);
        if owner != Some(stale_pid) {
            let restored = std::fs::hard_link(&aside, path);
            let _ = std::fs::remove_file(&aside);
            restored.map_err(io_err)?;
            return Err(LockError::Held {
                path: path.to_path_buf(),
                pid: owner,
            });
        }

        log::warn!(
            "Reclaiming stale lock {} left by pid {}",
            path.display(),
            stale_pid
        );
        std::fs::remove_file(&aside).map_err(io_err)
    }

    fn try_create(path: &Path) -> Result<Self, LockError> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let lock = RunLock {
                    path: path.to_path_buf(),
                };
                // Lock is held from here; the drop guard removes it on error.
                writeln!(file, "{}", std::process::id()).map_err(|e| LockError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                log::debug!("Acquired run lock {}", path.display());
                Ok(lock)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(LockError::Held {
                path: path.to_path_buf(),
                pid: read_owner(path),
            }),
            Err(e) => Err(LockError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Released run lock {}", self.path.display()),
            Err(e) => log::warn!("Failed to release lock {}: {}", self.path.display(), e),
        }
    }
}

fn read_owner(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs the existence and permission check only.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
