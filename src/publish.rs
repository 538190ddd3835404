//! Atomic publication of the reference image.
//!
//! The new image is flushed to disk and then renamed over the canonical path
//! in a single step, so a reader opening the canonical path always sees
//! either the previous complete file or the new complete file.

use std::fs::File;
use std::path::{Path, PathBuf};

/// Errors raised while publishing.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("nothing to publish: '{}' does not exist", .0.display())]
    Missing(PathBuf),

    #[error(
        "'{}' is not in the same directory as '{}'; an atomic rename is not possible",
        .source_dir.display(),
        .target_dir.display()
    )]
    CrossDirectory {
        source_dir: PathBuf,
        target_dir: PathBuf,
    },

    #[error("failed to flush '{}' to disk: {source}", .path.display())]
    Sync {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to move '{}' to '{}': {source}", .from.display(), .to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Directory containing `path`, with the empty parent of a bare file name
/// mapped to `.`.
pub fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Publishes files to one canonical path.
#[derive(Debug, Clone)]
pub struct AtomicPublisher {
    canonical: PathBuf,
}

impl AtomicPublisher {
    pub fn new(canonical: PathBuf) -> Self {
        Self { canonical }
    }

    /// The path consumers read.
    pub fn canonical(&self) -> &Path {
        &self.canonical
    }

    /// Directory new files must be staged in.
    pub fn staging_dir(&self) -> PathBuf {
        parent_dir(&self.canonical)
    }

    /// Replace the canonical file with `new`.
    ///
    /// `new` must live in the canonical file's directory. On success `new` no
    /// longer exists; on failure the canonical file is untouched.
    pub fn publish(&self, new: &Path) -> Result<(), PublishError> {
        if !new.exists() {
            return Err(PublishError::Missing(new.to_path_buf()));
        }

        let source_dir = parent_dir(new);
        let target_dir = self.staging_dir();
        if !same_dir(&source_dir, &target_dir) {
            return Err(PublishError::CrossDirectory {
                source_dir,
                target_dir,
            });
        }

        File::open(new)
            .and_then(|f| f.sync_all())
            .map_err(|e| PublishError::Sync {
                path: new.to_path_buf(),
                source: e,
            })?;

        std::fs::rename(new, &self.canonical).map_err(|e| PublishError::Rename {
            from: new.to_path_buf(),
            to: self.canonical.clone(),
            source: e,
        })?;

        sync_dir(&target_dir);
        log::info!("Published {}", self.canonical.display());
        Ok(())
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Persist the directory entry for the rename. Errors are logged, not returned.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        log::warn!("Failed to sync directory {}: {}", dir.display(), e);
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
