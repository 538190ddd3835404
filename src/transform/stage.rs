//! Transform stage: orient and color-correct a raw capture.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ImageFormat, RgbImage};
use serde::Deserialize;

use super::filter::{build_filter_chain, jpeg_qscale};
use super::ops;
use crate::camera::open_image;
use crate::process::{self, ProcessError};

/// Where the transform runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformBackend {
    /// Decode, transform and encode inside this process
    #[default]
    InProcess,
    /// Shell out to ffmpeg with a filter chain
    Ffmpeg,
}

impl std::fmt::Display for TransformBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProcess => write!(f, "in-process"),
            Self::Ffmpeg => write!(f, "ffmpeg"),
        }
    }
}

/// Which correction steps are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformSettings {
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
    pub swap_channels: bool,
    /// JPEG quality (1-100) used when the output is a JPEG
    pub jpeg_quality: u8,
}

impl Default for TransformSettings {
    /// Inverted mount with a red/blue swapped sensor.
    fn default() -> Self {
        Self {
            horizontal_flip: true,
            vertical_flip: true,
            swap_channels: true,
            jpeg_quality: 95,
        }
    }
}

impl TransformSettings {
    /// Apply the enabled steps to an in-memory image, in fixed order.
    pub fn apply(&self, img: &mut RgbImage) {
        if self.horizontal_flip {
            imageops::flip_horizontal_in_place(img);
        }
        if self.vertical_flip {
            imageops::flip_vertical_in_place(img);
        }
        if self.swap_channels {
            ops::swap_red_blue(img);
        }
    }
}

/// A corrected image waiting to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedImage {
    path: PathBuf,
}

impl TransformedImage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Errors raised by the transform stage.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("cannot read source image '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("cannot write transformed image '{}': {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("I/O error writing '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transform tool failed: {0}")]
    Tool(#[from] ProcessError),

    #[error("transform tool reported success but wrote no output to '{}'", .0.display())]
    MissingOutput(PathBuf),
}

/// Something that turns a raw capture into a corrected image.
pub trait Transformer {
    /// Transform `raw` into `output`.
    ///
    /// `output` should be a fresh scratch path. On error a file created at
    /// `output` is removed; a file that was already there is left alone.
    fn transform(&self, raw: &Path, output: &Path) -> Result<TransformedImage, TransformError>;
}

/// Pure in-process transform using the `image` crate.
#[derive(Debug, Clone, Default)]
pub struct InProcessTransform {
    settings: TransformSettings,
}

impl InProcessTransform {
    pub fn new(settings: TransformSettings) -> Self {
        Self { settings }
    }

    fn write(&self, img: &RgbImage, output: &Path) -> Result<(), TransformError> {
        let format = ImageFormat::from_path(output).map_err(|e| TransformError::Write {
            path: output.to_path_buf(),
            source: e,
        })?;

        if format == ImageFormat::Jpeg {
            let io_err = |e| TransformError::Io {
                path: output.to_path_buf(),
                source: e,
            };
            let mut writer = BufWriter::new(File::create(output).map_err(io_err)?);
            let encoder = JpegEncoder::new_with_quality(&mut writer, self.settings.jpeg_quality);
            img.write_with_encoder(encoder)
                .map_err(|e| TransformError::Write {
                    path: output.to_path_buf(),
                    source: e,
                })?;
            writer.flush().map_err(io_err)?;
            Ok(())
        } else {
            img.save_with_format(output, format)
                .map_err(|e| TransformError::Write {
                    path: output.to_path_buf(),
                    source: e,
                })
        }
    }
}

impl Transformer for InProcessTransform {
    fn transform(&self, raw: &Path, output: &Path) -> Result<TransformedImage, TransformError> {
        let mut img = open_image(raw)
            .map_err(|e| TransformError::Read {
                path: raw.to_path_buf(),
                source: e,
            })?
            .into_rgb8();

        self.settings.apply(&mut img);

        let preexisting = output.exists();
        if let Err(e) = self.write(&img, output) {
            if !preexisting {
                remove_partial(output);
            }
            return Err(e);
        }
        Ok(TransformedImage::new(output.to_path_buf()))
    }
}

/// Transform through an external ffmpeg invocation.
#[derive(Debug, Clone)]
pub struct FfmpegTransform {
    settings: TransformSettings,
    program: String,
    timeout: Duration,
}

impl FfmpegTransform {
    pub fn new(settings: TransformSettings, program: String, timeout: Duration) -> Self {
        Self {
            settings,
            program,
            timeout,
        }
    }

    /// Build the ffmpeg command-line arguments for one transform.
    pub fn build_args(&self, raw: &Path, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            raw.to_string_lossy().into_owned(),
            "-vf".to_string(),
            build_filter_chain(&self.settings),
            "-frames:v".to_string(),
            "1".to_string(),
            "-q:v".to_string(),
            jpeg_qscale(self.settings.jpeg_quality).to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }
}

impl Transformer for FfmpegTransform {
    fn transform(&self, raw: &Path, output: &Path) -> Result<TransformedImage, TransformError> {
        if let Err(e) = std::fs::metadata(raw) {
            return Err(TransformError::Io {
                path: raw.to_path_buf(),
                source: e,
            });
        }

        let args = self.build_args(raw, output);
        let preexisting = output.exists();
        if let Err(e) = process::run_to_completion(&self.program, &args, self.timeout) {
            if !preexisting {
                remove_partial(output);
            }
            return Err(e.into());
        }
        if !output.exists() {
            return Err(TransformError::MissingOutput(output.to_path_buf()));
        }
        Ok(TransformedImage::new(output.to_path_buf()))
    }
}

/// Build the transformer for the configured backend.
pub fn build_transformer(
    backend: TransformBackend,
    settings: TransformSettings,
    ffmpeg_program: &str,
    timeout: Duration,
) -> Box<dyn Transformer> {
    match backend {
        TransformBackend::InProcess => Box::new(InProcessTransform::new(settings)),
        TransformBackend::Ffmpeg => Box::new(FfmpegTransform::new(
            settings,
            ffmpeg_program.to_string(),
            timeout,
        )),
    }
}

fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove partial output {}: {}", path.display(), e),
    }
}
