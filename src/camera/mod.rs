//! Camera capture adapter.
//!
//! This module provides the still-capture side of the pipeline:
//! - The [`CaptureDevice`] seam and its command-line implementation [`CommandCapture`]
//! - Capture output validation via [`validate_capture`]
//! - Shared types [`Resolution`], [`RawCapture`] and [`CaptureError`]

mod still;
mod types;

pub use still::{
    open_image, validate_capture, CaptureDevice, CommandCapture, StillSettings, DEFAULT_ARGS,
    DEFAULT_ENCODING, DEFAULT_PROGRAM,
};
pub use types::{CaptureError, RawCapture, Resolution, MAX_RESOLUTION};
