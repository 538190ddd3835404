//! Command-line interface definitions and helpers.
//!
//! This module contains all CLI argument parsing, enums, and subcommand handlers.

mod args;
mod commands;
mod enums;

pub use args::{Args, CaptureArgs, Command, ConfigAction, CorrectionArgs};
pub use commands::{
    build_pipeline, handle_config_action, run_capture, run_transform, verify_reference,
};
pub use enums::Backend;
