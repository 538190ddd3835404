//! Pipeline controller.
//!
//! Sequences one capture run: lock, illumination, capture, transform and
//! publish. Every stage error aborts the run; temporary files are removed,
//! the helper is stopped and the lock is released whatever the outcome.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::camera::{CaptureDevice, CaptureError, Resolution};
use crate::illumination::{CoordinatorError, IlluminationCoordinator, IlluminationSettings};
use crate::lock::{LockError, RunLock};
use crate::process;
use crate::publish::{parent_dir, AtomicPublisher, PublishError};
use crate::transform::{TransformError, Transformer};

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lock,
    Coordinator,
    Capture,
    Transform,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Lock => write!(f, "lock"),
            Stage::Coordinator => write!(f, "illumination"),
            Stage::Capture => write!(f, "capture"),
            Stage::Transform => write!(f, "transform"),
            Stage::Publish => write!(f, "publish"),
        }
    }
}

/// States of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    CoordinatorStarted,
    Captured,
    Transformed,
    Published,
    Done,
    Failed(Stage),
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed(_))
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (from, Failed(_)) => !from.is_terminal(),
            (Idle, CoordinatorStarted) => true,
            (Idle | CoordinatorStarted, Captured) => true,
            (Captured, Transformed) => true,
            (Transformed, Published) => true,
            (Published, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::CoordinatorStarted => write!(f, "coordinator-started"),
            RunState::Captured => write!(f, "captured"),
            RunState::Transformed => write!(f, "transformed"),
            RunState::Published => write!(f, "published"),
            RunState::Done => write!(f, "done"),
            RunState::Failed(stage) => write!(f, "failed({})", stage),
        }
    }
}

/// Errors that abort a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("interrupted")]
    Interrupted,

    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition { from: RunState, to: RunState },
}

/// A failed run: the stage that failed and why.
#[derive(Debug)]
pub struct RunFailure {
    pub stage: Stage,
    pub error: PipelineError,
}

impl RunFailure {
    pub fn new(stage: Stage, error: impl Into<PipelineError>) -> Self {
        Self {
            stage,
            error: error.into(),
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed: {}", self.stage, self.error)
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub published: PathBuf,
    pub resolution: Resolution,
    pub coordinator_used: bool,
    pub elapsed: Duration,
    pub states: Vec<RunState>,
}

/// Ephemeral state of one run.
///
/// Owns the run-scoped temporary paths and removes them on [`cleanup`] or
/// drop.
///
/// [`cleanup`]: PipelineRun::cleanup
#[derive(Debug)]
pub struct PipelineRun {
    id: String,
    raw_path: PathBuf,
    transformed_path: PathBuf,
    coordinator_started: bool,
    history: Vec<RunState>,
}

impl PipelineRun {
    /// Create a run publishing to `canonical`, with temporary files staged
    /// beside it. The raw capture is named with `raw_extension`, the
    /// transformed image with the canonical file's extension.
    pub fn new(id: String, canonical: &Path, raw_extension: &str) -> Self {
        Self {
            raw_path: scratch_path(canonical, &id, "raw").with_extension(raw_extension),
            transformed_path: scratch_path(canonical, &id, "tmp"),
            id,
            coordinator_started: false,
            history: vec![RunState::Idle],
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn raw_path(&self) -> &Path {
        &self.raw_path
    }

    pub fn transformed_path(&self) -> &Path {
        &self.transformed_path
    }

    pub fn coordinator_started(&self) -> bool {
        self.coordinator_started
    }

    pub fn state(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::Idle)
    }

    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn advance(&mut self, next: RunState) -> Result<(), PipelineError> {
        let from = self.state();
        if !from.can_advance_to(next) {
            return Err(PipelineError::InvalidTransition { from, to: next });
        }
        log::info!("Run {}: {} -> {}", self.id, from, next);
        if next == RunState::CoordinatorStarted {
            self.coordinator_started = true;
        }
        self.history.push(next);
        Ok(())
    }

    fn fail(&mut self, stage: Stage) {
        if !self.state().is_terminal() {
            self.history.push(RunState::Failed(stage));
        }
    }

    /// Remove the run's temporary files. Missing files are not an error.
    pub fn cleanup(&self) {
        for path in [&self.raw_path, &self.transformed_path] {
            match std::fs::remove_file(path) {
                Ok(()) => log::debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

impl Drop for PipelineRun {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Hidden, run-scoped sibling of `canonical`: `.<stem>.<run id>.<tag>.<ext>`.
pub fn scratch_path(canonical: &Path, run_id: &str, tag: &str) -> PathBuf {
    let stem = canonical
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "reference".to_string());
    let ext = canonical
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "jpg".to_string());
    parent_dir(canonical).join(format!(".{}.{}.{}.{}", stem, run_id, tag, ext))
}

/// Unique-enough run id: pid plus wall-clock milliseconds.
pub fn new_run_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{}-{}", std::process::id(), millis)
}

/// The capture pipeline.
pub struct Pipeline {
    resolution: Resolution,
    publisher: AtomicPublisher,
    capture: Box<dyn CaptureDevice>,
    transformer: Box<dyn Transformer>,
    illumination: Option<IlluminationSettings>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("resolution", &self.resolution)
            .field("publisher", &self.publisher)
            .field("illumination", &self.illumination)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        canonical: PathBuf,
        resolution: Resolution,
        capture: Box<dyn CaptureDevice>,
        transformer: Box<dyn Transformer>,
    ) -> Self {
        Self {
            resolution,
            publisher: AtomicPublisher::new(canonical),
            capture,
            transformer,
            illumination: None,
        }
    }

    /// Coordinate with an illumination helper before capturing.
    pub fn with_illumination(mut self, illumination: Option<IlluminationSettings>) -> Self {
        self.illumination = illumination;
        self
    }

    pub fn canonical(&self) -> &Path {
        self.publisher.canonical()
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Execute one run to a terminal state.
    pub fn run(&self) -> Result<RunReport, RunFailure> {
        let started = Instant::now();
        let _lock =
            RunLock::acquire(self.canonical()).map_err(|e| RunFailure::new(Stage::Lock, e))?;

        let mut run = PipelineRun::new(new_run_id(), self.canonical(), self.capture.extension());
        log::info!("Run {} publishing to {}", run.id(), self.canonical().display());

        let mut coordinator = self.illumination.clone().map(IlluminationCoordinator::new);
        let result = self.execute(&mut run, coordinator.as_mut());

        if let Some(c) = coordinator.as_mut() {
            c.stop();
        }
        run.cleanup();

        match result {
            Ok(()) => {
                run.advance(RunState::Done)
                    .map_err(|e| RunFailure::new(Stage::Publish, e))?;
                let elapsed = started.elapsed();
                log::info!("Run {} done in {:?}", run.id(), elapsed);
                Ok(RunReport {
                    run_id: run.id().to_string(),
                    published: self.canonical().to_path_buf(),
                    resolution: self.resolution,
                    coordinator_used: run.coordinator_started(),
                    elapsed,
                    states: run.history().to_vec(),
                })
            }
            Err(failure) => {
                run.fail(failure.stage);
                log::error!("Run {} failed: {}", run.id(), failure);
                Err(failure)
            }
        }
    }

    fn execute(
        &self,
        run: &mut PipelineRun,
        coordinator: Option<&mut IlluminationCoordinator>,
    ) -> Result<(), RunFailure> {
        let mut coordinator = coordinator;

        if let Some(c) = coordinator.as_deref_mut() {
            c.start().map_err(|e| RunFailure::new(Stage::Coordinator, e))?;
            run.advance(RunState::CoordinatorStarted)
                .map_err(|e| RunFailure::new(Stage::Coordinator, e))?;
            c.wait_ready()
                .map_err(|e| RunFailure::new(Stage::Coordinator, e))?;
        }

        checkpoint(Stage::Capture)?;
        let raw = self
            .capture
            .capture(run.raw_path(), self.resolution)
            .map_err(|e| RunFailure::new(Stage::Capture, e))?;
        if let Some(c) = coordinator.as_deref_mut() {
            if let Err(e) = c.check_alive() {
                log::warn!("{}; the captured lighting may be wrong", e);
            }
        }
        run.advance(RunState::Captured)
            .map_err(|e| RunFailure::new(Stage::Capture, e))?;

        checkpoint(Stage::Transform)?;
        let transformed = self
            .transformer
            .transform(raw.path(), run.transformed_path())
            .map_err(|e| RunFailure::new(Stage::Transform, e))?;
        run.advance(RunState::Transformed)
            .map_err(|e| RunFailure::new(Stage::Transform, e))?;

        checkpoint(Stage::Publish)?;
        self.publisher
            .publish(transformed.path())
            .map_err(|e| RunFailure::new(Stage::Publish, e))?;
        run.advance(RunState::Published)
            .map_err(|e| RunFailure::new(Stage::Publish, e))?;

        Ok(())
    }
}

fn checkpoint(next: Stage) -> Result<(), RunFailure> {
    if process::ctrlc_received() {
        Err(RunFailure::new(next, PipelineError::Interrupted))
    } else {
        Ok(())
    }
}
