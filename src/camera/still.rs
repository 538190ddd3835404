//! Still-image capture through an external camera command.

use std::path::Path;
use std::time::Duration;

use super::types::{CaptureError, RawCapture, Resolution};
use crate::process;

/// Default camera program on Raspberry Pi OS (libcamera based).
pub const DEFAULT_PROGRAM: &str = "rpicam-still";

/// Default argument template for [`DEFAULT_PROGRAM`].
///
/// `{output}`, `{width}`, `{height}` and `{encoding}` are substituted per capture.
pub const DEFAULT_ARGS: &[&str] = &[
    "--nopreview",
    "--timeout",
    "1000",
    "--encoding",
    "{encoding}",
    "--width",
    "{width}",
    "--height",
    "{height}",
    "--output",
    "{output}",
];

/// Default still encoding; also the raw scratch file's extension.
pub const DEFAULT_ENCODING: &str = "jpg";

/// Something that can write a still image to a path.
pub trait CaptureDevice {
    /// Capture a still at `resolution` into `destination`, blocking until done.
    fn capture(&self, destination: &Path, resolution: Resolution)
        -> Result<RawCapture, CaptureError>;

    /// File extension matching what [`capture`](CaptureDevice::capture) writes.
    fn extension(&self) -> &str {
        DEFAULT_ENCODING
    }
}

/// Camera command configuration.
#[derive(Debug, Clone)]
pub struct StillSettings {
    /// Program to run
    pub program: String,
    /// Argument template
    pub args: Vec<String>,
    /// Image encoding requested from the camera (`jpg`, `png`, `bmp`)
    pub encoding: String,
    /// Upper bound on a single invocation
    pub timeout: Duration,
}

impl Default for StillSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            args: DEFAULT_ARGS.iter().map(|s| s.to_string()).collect(),
            encoding: DEFAULT_ENCODING.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Captures stills by running the configured camera command.
#[derive(Debug, Clone, Default)]
pub struct CommandCapture {
    settings: StillSettings,
}

impl CommandCapture {
    pub fn new(settings: StillSettings) -> Self {
        Self { settings }
    }

    /// Expand the argument template for one capture.
    pub fn expand_args(&self, destination: &Path, resolution: Resolution) -> Vec<String> {
        let output = destination.to_string_lossy();
        let width = resolution.width.to_string();
        let height = resolution.height.to_string();
        self.settings
            .args
            .iter()
            .map(|arg| {
                arg.replace("{output}", &output)
                    .replace("{width}", &width)
                    .replace("{height}", &height)
                    .replace("{encoding}", &self.settings.encoding)
            })
            .collect()
    }
}

impl CaptureDevice for CommandCapture {
    fn capture(
        &self,
        destination: &Path,
        resolution: Resolution,
    ) -> Result<RawCapture, CaptureError> {
        let args = self.expand_args(destination, resolution);
        log::info!(
            "Capturing {} still with '{}' into {}",
            resolution,
            self.settings.program,
            destination.display()
        );
        process::run_to_completion(&self.settings.program, &args, self.settings.timeout)?;
        validate_capture(destination, resolution)
    }

    fn extension(&self) -> &str {
        &self.settings.encoding
    }
}

/// Fully decode an image, choosing the decoder from its content.
pub fn open_image(path: &Path) -> image::ImageResult<image::DynamicImage> {
    image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
}

/// Check that the file at `path` is a non-empty, fully decodable image of
/// `expected` size.
pub fn validate_capture(path: &Path, expected: Resolution) -> Result<RawCapture, CaptureError> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CaptureError::Missing(path.to_path_buf()))
        }
        Err(e) => {
            return Err(CaptureError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    if metadata.len() == 0 {
        return Err(CaptureError::Empty(path.to_path_buf()));
    }

    let decoded = open_image(path).map_err(|e| CaptureError::Corrupt {
        path: path.to_path_buf(),
        source: e,
    })?;
    let actual = Resolution::new(decoded.width(), decoded.height());
    if actual != expected {
        return Err(CaptureError::ResolutionMismatch { expected, actual });
    }

    Ok(RawCapture::new(path.to_path_buf(), actual))
}
