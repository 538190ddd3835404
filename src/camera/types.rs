//! Camera types and data structures.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::process::ProcessError;

/// Largest resolution accepted from configuration or the command line.
pub const MAX_RESOLUTION: Resolution = Resolution {
    width: 7680,
    height: 4320,
};

/// Still capture resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// 640x480, the resolution the detection process is tuned for.
    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Check the resolution is non-zero and within [`MAX_RESOLUTION`].
    pub fn validate(self) -> Result<Self, String> {
        if self.width == 0 || self.height == 0 {
            return Err("Resolution width and height must be greater than 0".to_string());
        }
        if self.width > MAX_RESOLUTION.width || self.height > MAX_RESOLUTION.height {
            return Err(format!(
                "Resolution exceeds maximum supported ({})",
                MAX_RESOLUTION
            ));
        }
        Ok(self)
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::VGA
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    /// Parse `WIDTHxHEIGHT`, e.g. `640x480`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('x').collect();
        if parts.len() != 2 {
            return Err(format!(
                "Invalid resolution format '{}'. Use WIDTHxHEIGHT (e.g., 640x480)",
                s
            ));
        }
        let width: u32 = parts[0]
            .parse()
            .map_err(|_| format!("Invalid width '{}' in resolution", parts[0]))?;
        let height: u32 = parts[1]
            .parse()
            .map_err(|_| format!("Invalid height '{}' in resolution", parts[1]))?;
        Resolution::new(width, height).validate()
    }
}

/// A still image written by the camera, not yet oriented or color-corrected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCapture {
    path: PathBuf,
    resolution: Resolution,
}

impl RawCapture {
    pub fn new(path: PathBuf, resolution: Resolution) -> Self {
        Self { path, resolution }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }
}

/// Errors raised by the camera capture adapter.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The camera command could not run or reported failure
    #[error("camera command failed: {0}")]
    Device(#[from] ProcessError),

    /// The command succeeded but wrote nothing
    #[error("camera produced no image at '{}'", .0.display())]
    Missing(PathBuf),

    /// The output file is empty
    #[error("camera produced an empty file at '{}'", .0.display())]
    Empty(PathBuf),

    /// The output file is not a decodable image
    #[error("camera produced a corrupt image at '{}': {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The image decoded but has the wrong dimensions
    #[error("camera produced a {actual} image, expected {expected}")]
    ResolutionMismatch {
        expected: Resolution,
        actual: Resolution,
    },

    #[error("I/O error inspecting capture '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_default_is_vga() {
        let res = Resolution::default();
        assert_eq!(res.width, 640);
        assert_eq!(res.height, 480);
    }

    #[test]
    fn test_resolution_display() {
        assert_eq!(Resolution::new(1280, 720).to_string(), "1280x720");
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!("640x480".parse::<Resolution>(), Ok(Resolution::VGA));
        assert_eq!(
            "1920x1080".parse::<Resolution>(),
            Ok(Resolution::new(1920, 1080))
        );
    }

    #[test]
    fn test_resolution_parse_rejects_bad_input() {
        assert!("640".parse::<Resolution>().is_err());
        assert!("640x".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
        assert!("0x480".parse::<Resolution>().is_err());
        assert!("640x0".parse::<Resolution>().is_err());
        assert!("8000x480".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_capture_error_display() {
        let err = CaptureError::ResolutionMismatch {
            expected: Resolution::VGA,
            actual: Resolution::new(320, 240),
        };
        let msg = err.to_string();
        assert!(msg.contains("320x240"));
        assert!(msg.contains("640x480"));

        let err = CaptureError::Empty(PathBuf::from("/tmp/raw.jpg"));
        assert!(err.to_string().contains("empty"));
        assert!(err.to_string().contains("/tmp/raw.jpg"));
    }
}
