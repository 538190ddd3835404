//! Subcommand handlers for capture, transform, verify and config actions.

use std::path::Path;

use super::args::ConfigAction;
use crate::camera::{self, CaptureError, CommandCapture, RawCapture, Resolution};
use crate::config::{default_path, Config, ConfigError, DEFAULT_CONFIG_TOML};
use crate::controller::{new_run_id, scratch_path, Pipeline, PipelineError, RunFailure, RunReport};
use crate::lock::RunLock;
use crate::publish::AtomicPublisher;
use crate::transform::{build_transformer, TransformedImage};

/// Build the production pipeline from configuration.
pub fn build_pipeline(config: &Config) -> Result<Pipeline, ConfigError> {
    config.validate()?;
    let resolution = config.resolution().map_err(ConfigError::Invalid)?;
    let transformer = build_transformer(
        config.transform.backend,
        config.transform_settings(),
        &config.transform.ffmpeg_program,
        config.transform_timeout(),
    );
    Ok(Pipeline::new(
        config.publish.path.clone(),
        resolution,
        Box::new(CommandCapture::new(config.still_settings())),
        transformer,
    )
    .with_illumination(config.illumination_settings()))
}

/// Run the capture pipeline once.
pub fn run_capture(pipeline: &Pipeline) -> Result<RunReport, RunFailure> {
    let report = pipeline.run()?;
    println!(
        "Published {} ({}) in {:.1}s",
        report.published.display(),
        report.resolution,
        report.elapsed.as_secs_f64()
    );
    Ok(report)
}

/// Apply the configured correction to `input` and publish it at `output`.
///
/// The result is staged beside `output` and renamed into place under the run
/// lock, so an existing file at `output` is either fully replaced or left as
/// it was.
pub fn run_transform(
    config: &Config,
    input: &Path,
    output: &Path,
) -> Result<TransformedImage, PipelineError> {
    let transformer = build_transformer(
        config.transform.backend,
        config.transform_settings(),
        &config.transform.ffmpeg_program,
        config.transform_timeout(),
    );
    let _lock = RunLock::acquire(output)?;
    let staged = scratch_path(output, &new_run_id(), "tmp");

    let result = transformer
        .transform(input, &staged)
        .map_err(PipelineError::from)
        .and_then(|t| {
            AtomicPublisher::new(output.to_path_buf())
                .publish(t.path())
                .map_err(PipelineError::from)
        });
    if result.is_err() {
        match std::fs::remove_file(&staged) {
            Ok(()) => log::debug!("Removed {}", staged.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove {}: {}", staged.display(), e),
        }
    }
    result?;

    println!("Wrote {}", output.display());
    Ok(TransformedImage::new(output.to_path_buf()))
}

/// Check that the published reference is a readable image of `expected` size.
pub fn verify_reference(path: &Path, expected: Resolution) -> Result<RawCapture, CaptureError> {
    let reference = camera::validate_capture(path, expected)?;
    println!(
        "{} is a valid {} reference",
        path.display(),
        reference.resolution()
    );
    Ok(reference)
}

/// Handle config subcommand actions.
pub fn handle_config_action(
    action: ConfigAction,
    config_path: Option<&Path>,
    config: &Config,
) -> Result<(), String> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_path);

    match action {
        ConfigAction::Show => {
            let resolution = config
                .resolution()
                .map(|r| r.to_string())
                .unwrap_or_else(|e| format!("invalid ({})", e));
            println!("Current configuration:");
            println!("  Camera:        {} {}", config.capture.program, config.capture.args.join(" "));
            println!("  Resolution:    {}", resolution);
            println!(
                "  Correction:    hflip={} vflip={} swap_channels={}",
                yes_no(config.transform.horizontal_flip),
                yes_no(config.transform.vertical_flip),
                yes_no(config.transform.swap_channels)
            );
            println!("  Backend:       {}", config.transform.backend);
            match config.illumination_settings() {
                Some(settings) => {
                    println!("  Illumination:  {}", settings.helper.display());
                    println!("  Readiness:     {:?}", settings.readiness);
                }
                None => println!("  Illumination:  disabled"),
            }
            println!("  Reference:     {}", config.publish.path.display());
            println!();

            if config_path.exists() {
                println!("Config file: {} (exists)", config_path.display());
            } else {
                println!("Config file: {} (not found)", config_path.display());
            }
            Ok(())
        }
        ConfigAction::Init => {
            if config_path.exists() {
                return Err(format!(
                    "Config file already exists: {}\nUse 'garage-background config show' to view current settings.",
                    config_path.display()
                ));
            }

            if let Some(parent) = config_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| format!("Error creating config directory: {}", e))?;
                }
            }

            std::fs::write(&config_path, DEFAULT_CONFIG_TOML)
                .map_err(|e| format!("Error writing config file: {}", e))?;

            println!("Created config file: {}", config_path.display());
            Ok(())
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
