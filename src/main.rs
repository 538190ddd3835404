use clap::Parser;
use tracing_subscriber::EnvFilter;

use garage_background::cli::{
    build_pipeline, handle_config_action, run_capture, run_transform, verify_reference, Args,
    CaptureArgs, Command,
};
use garage_background::config::Config;
use garage_background::process::setup_ctrlc_handler;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_logging();

    let args = Args::parse();

    // Explicit --config must exist (except for `config init`); the default location is optional
    let creating_config = matches!(args.command, Some(Command::Config { .. }));
    if let Some(path) = &args.config {
        if !creating_config && !path.exists() {
            eprintln!("Error: Config file not found: {}", path.display());
            std::process::exit(1);
        }
    }

    let mut config = match Config::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = setup_ctrlc_handler() {
        log::warn!("Could not install Ctrl+C handler: {}", e);
    }

    let command = args
        .command
        .unwrap_or_else(|| Command::Capture(CaptureArgs::default()));

    let result = match command {
        Command::Capture(capture) => {
            capture.apply(&mut config);
            build_pipeline(&config)
                .map_err(|e| e.to_string())
                .and_then(|pipeline| run_capture(&pipeline).map_err(|e| e.to_string()))
                .map(|_| ())
        }
        Command::Transform {
            input,
            output,
            correction,
        } => {
            correction.apply(&mut config);
            run_transform(&config, &input, &output)
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
        Command::Verify { output, resolution } => {
            let path = output.unwrap_or_else(|| config.publish.path.clone());
            match resolution.map(Ok).unwrap_or_else(|| config.resolution()) {
                Ok(expected) => verify_reference(&path, expected)
                    .map(|_| ())
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e),
            }
        }
        Command::Config { action } => {
            handle_config_action(action, args.config.as_deref(), &config)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_capture() {
        let args = Args::parse_from(["garage-background"]);
        let command = args
            .command
            .unwrap_or_else(|| Command::Capture(CaptureArgs::default()));
        assert!(matches!(command, Command::Capture(_)));
    }
}
