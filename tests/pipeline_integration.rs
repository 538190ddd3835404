//! Integration tests for a full capture run.
//!
//! Covers:
//! - A successful run publishes a corrected image at the requested resolution
//! - A failed capture or transform leaves the previous reference untouched
//! - No temporary files survive a run, successful or not
//! - A later run replaces the reference with its own capture
//! - A held lock rejects a concurrent run
//! - A publish failure is attributed to the publish stage

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use garage_background::camera::{
    validate_capture, CaptureDevice, CaptureError, RawCapture, Resolution,
};
use garage_background::controller::{Pipeline, RunState, Stage};
use garage_background::lock::RunLock;
use garage_background::transform::{
    InProcessTransform, TransformError, TransformSettings, TransformedImage, Transformer,
};

const SMALL: Resolution = Resolution {
    width: 64,
    height: 48,
};

/// Camera double that writes a solid frame with a marked top-left pixel.
///
/// Writes lossless PNG unless told to mimic the camera's JPEG default.
struct FakeCamera {
    fill: Rgb<u8>,
    corner: Rgb<u8>,
    extension: &'static str,
    calls: Rc<Cell<usize>>,
}

impl FakeCamera {
    fn new(fill: Rgb<u8>, corner: Rgb<u8>) -> Self {
        Self {
            fill,
            corner,
            extension: "png",
            calls: Rc::new(Cell::new(0)),
        }
    }

    fn jpeg(mut self) -> Self {
        self.extension = "jpg";
        self
    }
}

impl CaptureDevice for FakeCamera {
    fn capture(
        &self,
        destination: &Path,
        resolution: Resolution,
    ) -> Result<RawCapture, CaptureError> {
        self.calls.set(self.calls.get() + 1);
        let mut img = RgbImage::from_pixel(resolution.width, resolution.height, self.fill);
        img.put_pixel(0, 0, self.corner);
        img.save(destination).map_err(|e| CaptureError::Corrupt {
            path: destination.to_path_buf(),
            source: e,
        })?;
        validate_capture(destination, resolution)
    }

    fn extension(&self) -> &str {
        self.extension
    }
}

/// Camera double whose command "succeeds" but leaves an unreadable file.
struct GarbageCamera;

impl CaptureDevice for GarbageCamera {
    fn capture(
        &self,
        destination: &Path,
        resolution: Resolution,
    ) -> Result<RawCapture, CaptureError> {
        std::fs::write(destination, b"not an image").map_err(|e| CaptureError::Io {
            path: destination.to_path_buf(),
            source: e,
        })?;
        validate_capture(destination, resolution)
    }
}

/// Transformer double that writes a partial output and then fails.
struct BrokenTransform;

impl Transformer for BrokenTransform {
    fn transform(&self, _raw: &Path, output: &Path) -> Result<TransformedImage, TransformError> {
        std::fs::write(output, b"partial").map_err(|e| TransformError::Io {
            path: output.to_path_buf(),
            source: e,
        })?;
        Err(TransformError::MissingOutput(output.to_path_buf()))
    }
}

/// Transformer double that hands back an image outside the publish directory.
struct StrayTransform {
    elsewhere: PathBuf,
}

impl Transformer for StrayTransform {
    fn transform(&self, raw: &Path, output: &Path) -> Result<TransformedImage, TransformError> {
        InProcessTransform::new(TransformSettings::default()).transform(raw, output)?;
        std::fs::copy(output, &self.elsewhere).map_err(|e| TransformError::Io {
            path: self.elsewhere.clone(),
            source: e,
        })?;
        Ok(TransformedImage::new(self.elsewhere.clone()))
    }
}

fn pipeline(canonical: &Path, camera: impl CaptureDevice + 'static) -> Pipeline {
    Pipeline::new(
        canonical.to_path_buf(),
        SMALL,
        Box::new(camera),
        Box::new(InProcessTransform::new(TransformSettings::default())),
    )
}

fn dir_entries(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    entries.sort();
    entries
}

fn write_previous_reference(canonical: &Path) -> Vec<u8> {
    RgbImage::from_pixel(SMALL.width, SMALL.height, Rgb([1, 2, 3]))
        .save(canonical)
        .unwrap();
    std::fs::read(canonical).unwrap()
}

#[test]
fn test_successful_run_publishes_corrected_reference() {
    let dir = TempDir::new().unwrap();
    let canonical = dir.path().join("background_frame.png");

    let report = pipeline(&canonical, FakeCamera::new(Rgb([0, 0, 0]), Rgb([255, 0, 0])))
        .run()
        .unwrap();

    assert_eq!(report.published, canonical);
    assert_eq!(report.resolution, SMALL);
    assert!(!report.coordinator_used);
    assert_eq!(
        report.states,
        vec![
            RunState::Idle,
            RunState::Captured,
            RunState::Transformed,
            RunState::Published,
            RunState::Done
        ]
    );

    let published = image::open(&canonical).unwrap().into_rgb8();
    assert_eq!(published.dimensions(), (64, 48));
    // Red top-left corner ends up blue at the opposite corner
    assert_eq!(*published.get_pixel(63, 47), Rgb([0, 0, 255]));
    assert_eq!(*published.get_pixel(0, 0), Rgb([0, 0, 0]));

    assert_eq!(dir_entries(dir.path()), vec![canonical]);
}

#[test]
fn test_capture_failure_keeps_previous_reference() {
    let dir = TempDir::new().unwrap();
    let canonical = dir.path().join("background_frame.png");
    let previous = write_previous_reference(&canonical);

    let failure = pipeline(&canonical, GarbageCamera).run().unwrap_err();

    assert_eq!(failure.stage, Stage::Capture);
    assert!(failure.to_string().starts_with("capture stage failed"));
    assert_eq!(std::fs::read(&canonical).unwrap(), previous);
    assert_eq!(dir_entries(dir.path()), vec![canonical]);
}

#[test]
fn test_capture_failure_without_previous_reference_publishes_nothing() {
    let dir = TempDir::new().unwrap();
    let canonical = dir.path().join("background_frame.png");

    let failure = pipeline(&canonical, GarbageCamera).run().unwrap_err();

    assert_eq!(failure.stage, Stage::Capture);
    assert!(dir_entries(dir.path()).is_empty());
}

#[test]
fn test_transform_failure_keeps_previous_reference() {
    let dir = TempDir::new().unwrap();
    let canonical = dir.path().join("background_frame.png");
    let previous = write_previous_reference(&canonical);

    let failure = Pipeline::new(
        canonical.clone(),
        SMALL,
        Box::new(FakeCamera::new(Rgb([9, 9, 9]), Rgb([9, 9, 9]))),
        Box::new(BrokenTransform),
    )
    .run()
    .unwrap_err();

    assert_eq!(failure.stage, Stage::Transform);
    assert_eq!(std::fs::read(&canonical).unwrap(), previous);
    assert_eq!(dir_entries(dir.path()), vec![canonical]);
}

#[test]
fn test_publish_failure_keeps_previous_reference() {
    let dir = TempDir::new().unwrap();
    let other = TempDir::new().unwrap();
    let canonical = dir.path().join("background_frame.png");
    let previous = write_previous_reference(&canonical);

    let failure = Pipeline::new(
        canonical.clone(),
        SMALL,
        Box::new(FakeCamera::new(Rgb([9, 9, 9]), Rgb([9, 9, 9]))),
        Box::new(StrayTransform {
            elsewhere: other.path().join("corrected.png"),
        }),
    )
    .run()
    .unwrap_err();

    assert_eq!(failure.stage, Stage::Publish);
    assert!(failure.to_string().starts_with("publish stage failed"));
    assert_eq!(std::fs::read(&canonical).unwrap(), previous);
    assert_eq!(dir_entries(dir.path()), vec![canonical]);
}

#[test]
fn test_jpeg_capture_publishes_png_reference() {
    let dir = TempDir::new().unwrap();
    let canonical = dir.path().join("background_frame.png");

    pipeline(
        &canonical,
        FakeCamera::new(Rgb([0, 0, 0]), Rgb([0, 0, 0])).jpeg(),
    )
    .run()
    .unwrap();

    assert_eq!(
        image::ImageFormat::from_path(&canonical).unwrap(),
        image::ImageFormat::Png
    );
    let published = image::open(&canonical).unwrap();
    assert_eq!((published.width(), published.height()), (64, 48));
    assert_eq!(dir_entries(dir.path()), vec![canonical]);
}

#[test]
fn test_second_run_replaces_reference() {
    let dir = TempDir::new().unwrap();
    let canonical = dir.path().join("background_frame.png");

    pipeline(&canonical, FakeCamera::new(Rgb([200, 0, 0]), Rgb([200, 0, 0])))
        .run()
        .unwrap();
    pipeline(&canonical, FakeCamera::new(Rgb([0, 100, 0]), Rgb([0, 100, 0])))
        .run()
        .unwrap();

    let published = image::open(&canonical).unwrap().into_rgb8();
    assert!(published.pixels().all(|p| *p == Rgb([0, 100, 0])));
    assert_eq!(dir_entries(dir.path()), vec![canonical]);
}

#[test]
fn test_held_lock_rejects_run() {
    let dir = TempDir::new().unwrap();
    let canonical = dir.path().join("background_frame.png");
    let previous = write_previous_reference(&canonical);

    let camera = FakeCamera::new(Rgb([0, 0, 0]), Rgb([0, 0, 0]));
    let calls = Rc::clone(&camera.calls);
    let pipeline = pipeline(&canonical, camera);

    let lock = RunLock::acquire(&canonical).unwrap();
    let failure = pipeline.run().unwrap_err();
    assert_eq!(failure.stage, Stage::Lock);
    assert_eq!(calls.get(), 0);
    assert_eq!(std::fs::read(&canonical).unwrap(), previous);

    drop(lock);
    pipeline.run().unwrap();
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_stale_lock_is_reclaimed() {
    let dir = TempDir::new().unwrap();
    let canonical = dir.path().join("background_frame.png");
    // Far beyond any real pid range
    std::fs::write(RunLock::path_for(&canonical), "2147483646\n").unwrap();

    pipeline(&canonical, FakeCamera::new(Rgb([0, 0, 0]), Rgb([0, 0, 0])))
        .run()
        .unwrap();

    assert_eq!(dir_entries(dir.path()), vec![canonical]);
}

#[cfg(unix)]
mod illumination {
    use super::*;
    use garage_background::illumination::{IlluminationSettings, Readiness};
    use std::time::Duration;

    fn sh_helper(script: &str, readiness: Readiness) -> IlluminationSettings {
        IlluminationSettings {
            helper: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            readiness,
            stop_grace: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_run_waits_for_helper_and_stops_it() {
        let dir = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let canonical = dir.path().join("background_frame.png");
        let ready = work.path().join("leds.ready");
        let stopped = work.path().join("leds.stopped");

        let script = format!(
            "trap 'touch {}; exit 0' INT; touch \"$GARAGE_BACKGROUND_READY_FILE\"; while true; do sleep 0.05; done",
            stopped.display()
        );
        let report = pipeline(&canonical, FakeCamera::new(Rgb([0, 0, 0]), Rgb([0, 0, 0])))
            .with_illumination(Some(sh_helper(
                &script,
                Readiness::ReadyFile {
                    path: ready.clone(),
                    timeout: Duration::from_secs(10),
                },
            )))
            .run()
            .unwrap();

        assert!(report.coordinator_used);
        assert_eq!(report.states[1], RunState::CoordinatorStarted);
        assert!(stopped.exists(), "helper should be interrupted at run end");
        assert!(!ready.exists());
        assert_eq!(dir_entries(dir.path()), vec![canonical]);
    }

    #[test]
    fn test_missing_helper_fails_before_capture() {
        let dir = TempDir::new().unwrap();
        let canonical = dir.path().join("background_frame.png");
        let previous = write_previous_reference(&canonical);

        let camera = FakeCamera::new(Rgb([0, 0, 0]), Rgb([0, 0, 0]));
        let calls = Rc::clone(&camera.calls);
        let failure = pipeline(&canonical, camera)
            .with_illumination(Some(IlluminationSettings::new(PathBuf::from(
                "/nonexistent/garage-leds-helper",
            ))))
            .run()
            .unwrap_err();

        assert_eq!(failure.stage, Stage::Coordinator);
        assert_eq!(calls.get(), 0);
        assert_eq!(std::fs::read(&canonical).unwrap(), previous);
        assert_eq!(dir_entries(dir.path()), vec![canonical]);
    }

    #[test]
    fn test_helper_exiting_early_aborts_run() {
        let dir = TempDir::new().unwrap();
        let canonical = dir.path().join("background_frame.png");

        let camera = FakeCamera::new(Rgb([0, 0, 0]), Rgb([0, 0, 0]));
        let calls = Rc::clone(&camera.calls);
        let failure = pipeline(&canonical, camera)
            .with_illumination(Some(sh_helper(
                "exit 3",
                Readiness::Settle(Duration::from_secs(5)),
            )))
            .run()
            .unwrap_err();

        assert_eq!(failure.stage, Stage::Coordinator);
        assert_eq!(calls.get(), 0);
        assert!(!canonical.exists());
    }
}
