//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::enums::Backend;
use crate::camera::Resolution;
use crate::config::Config;

/// Capture and publish the garage background reference image
#[derive(Parser, Debug)]
#[command(name = "garage-background")]
#[command(version, about = "Capture and publish the garage background reference image", long_about = None)]
#[command(after_help = "EXAMPLES:
    # Capture with the configured camera, helper and output path
    garage-background

    # Capture without the LED helper, into a custom path
    garage-background capture --no-illumination --output /srv/garage/background_frame.jpg

    # Re-orient an existing image with the configured correction
    garage-background transform raw.jpg background_frame.jpg

    # Check the published reference before starting detection
    garage-background verify")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Config file path
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture, correct and publish a new reference image (default)
    Capture(CaptureArgs),
    /// Apply the configured correction to an existing image
    Transform {
        /// Image to correct
        input: PathBuf,
        /// Where to write the corrected image
        output: PathBuf,
        #[command(flatten)]
        correction: CorrectionArgs,
    },
    /// Check the published reference exists and has the configured resolution
    Verify {
        /// Reference path (default: from config)
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Expected resolution (WIDTHxHEIGHT)
        #[arg(long, short)]
        resolution: Option<Resolution>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show effective configuration
    Show,
    /// Create default config file
    Init,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct CaptureArgs {
    /// Published reference path
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Capture resolution (WIDTHxHEIGHT, e.g. 640x480)
    #[arg(long, short)]
    pub resolution: Option<Resolution>,

    /// Skip the illumination helper even if one is configured
    #[arg(long)]
    pub no_illumination: bool,

    /// Illumination helper executable
    #[arg(long, conflicts_with = "no_illumination")]
    pub helper: Option<PathBuf>,

    #[command(flatten)]
    pub correction: CorrectionArgs,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct CorrectionArgs {
    /// Swap red and blue channels
    #[arg(long, conflicts_with = "no_swap_channels")]
    pub swap_channels: bool,

    /// Keep the sensor's channel order
    #[arg(long)]
    pub no_swap_channels: bool,

    /// Transform backend
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,
}

impl CorrectionArgs {
    /// Apply these flags on top of the file configuration.
    pub fn apply(&self, config: &mut Config) {
        if self.swap_channels {
            config.transform.swap_channels = true;
        }
        if self.no_swap_channels {
            config.transform.swap_channels = false;
        }
        if let Some(backend) = self.backend {
            config.transform.backend = backend.into();
        }
    }
}

impl CaptureArgs {
    /// Apply these flags on top of the file configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(output) = &self.output {
            config.publish.path = output.clone();
        }
        if let Some(res) = self.resolution {
            config.capture.width = res.width;
            config.capture.height = res.height;
        }
        if let Some(helper) = &self.helper {
            config.illumination.helper = Some(helper.clone());
        }
        if self.no_illumination {
            config.illumination.helper = None;
        }
        self.correction.apply(config);
    }
}
