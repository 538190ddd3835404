//! Configuration file handling for garage-background.
//!
//! Loads configuration from `~/.config/garage-background/config.toml` or a custom path.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera::{self, Resolution, StillSettings};
use crate::illumination::{IlluminationSettings, Readiness};
use crate::transform::{TransformBackend, TransformSettings};

/// Default published reference, relative to the working directory.
pub const DEFAULT_REFERENCE_PATH: &str = "background_frame.jpg";

/// Configuration file structure for garage-background.
/// Loaded from ~/.config/garage-background/config.toml (or custom path via --config).
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub illumination: IlluminationConfig,
    #[serde(default)]
    pub publish: PublishConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaptureConfig {
    #[serde(default = "default_camera_program")]
    pub program: String,
    #[serde(default = "default_camera_args")]
    pub args: Vec<String>,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: default_camera_program(),
            args: default_camera_args(),
            encoding: default_encoding(),
            width: default_width(),
            height: default_height(),
            timeout_secs: default_tool_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransformConfig {
    #[serde(default = "default_true")]
    pub horizontal_flip: bool,
    #[serde(default = "default_true")]
    pub vertical_flip: bool,
    #[serde(default = "default_true")]
    pub swap_channels: bool,
    #[serde(default)]
    pub backend: TransformBackend,
    #[serde(default = "default_ffmpeg_program")]
    pub ffmpeg_program: String,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            horizontal_flip: true,
            vertical_flip: true,
            swap_channels: true,
            backend: TransformBackend::default(),
            ffmpeg_program: default_ffmpeg_program(),
            jpeg_quality: default_jpeg_quality(),
            timeout_secs: default_tool_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IlluminationConfig {
    /// Helper executable; absent disables coordination
    #[serde(default)]
    pub helper: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
    /// File the helper creates once lighting is ready
    #[serde(default)]
    pub ready_file: Option<PathBuf>,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_settle_millis")]
    pub settle_millis: u64,
    #[serde(default = "default_stop_grace_millis")]
    pub stop_grace_millis: u64,
}

impl Default for IlluminationConfig {
    fn default() -> Self {
        Self {
            helper: None,
            args: Vec::new(),
            ready_file: None,
            ready_timeout_secs: default_ready_timeout_secs(),
            settle_millis: default_settle_millis(),
            stop_grace_millis: default_stop_grace_millis(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublishConfig {
    #[serde(default = "default_reference_path")]
    pub path: PathBuf,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            path: default_reference_path(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_camera_program() -> String {
    camera::DEFAULT_PROGRAM.to_string()
}

fn default_camera_args() -> Vec<String> {
    camera::DEFAULT_ARGS.iter().map(|s| s.to_string()).collect()
}

fn default_encoding() -> String {
    camera::DEFAULT_ENCODING.to_string()
}

fn default_width() -> u32 {
    Resolution::VGA.width
}

fn default_height() -> u32 {
    Resolution::VGA.height
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_ffmpeg_program() -> String {
    "ffmpeg".to_string()
}

fn default_jpeg_quality() -> u8 {
    95
}

fn default_ready_timeout_secs() -> u64 {
    10
}

fn default_settle_millis() -> u64 {
    2000
}

fn default_stop_grace_millis() -> u64 {
    2000
}

fn default_reference_path() -> PathBuf {
    PathBuf::from(DEFAULT_REFERENCE_PATH)
}

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
                path: path.clone(),
                source: e,
            })?;
            let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.clone(),
                source: e,
            })?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Reject values no run could succeed with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolution().map_err(ConfigError::Invalid)?;
        if !(1..=100).contains(&self.transform.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "transform.jpeg_quality must be between 1 and 100, got {}",
                self.transform.jpeg_quality
            )));
        }
        if !["jpg", "png", "bmp"].contains(&self.capture.encoding.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "capture.encoding must be jpg, png or bmp, got '{}'",
                self.capture.encoding
            )));
        }
        if self.capture.program.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "capture.program must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn resolution(&self) -> Result<Resolution, String> {
        Resolution::new(self.capture.width, self.capture.height).validate()
    }

    pub fn still_settings(&self) -> StillSettings {
        StillSettings {
            program: self.capture.program.clone(),
            args: self.capture.args.clone(),
            encoding: self.capture.encoding.clone(),
            timeout: Duration::from_secs(self.capture.timeout_secs),
        }
    }

    pub fn transform_settings(&self) -> TransformSettings {
        TransformSettings {
            horizontal_flip: self.transform.horizontal_flip,
            vertical_flip: self.transform.vertical_flip,
            swap_channels: self.transform.swap_channels,
            jpeg_quality: self.transform.jpeg_quality,
        }
    }

    pub fn transform_timeout(&self) -> Duration {
        Duration::from_secs(self.transform.timeout_secs)
    }

    /// Illumination settings, or `None` when no helper is configured.
    pub fn illumination_settings(&self) -> Option<IlluminationSettings> {
        let cfg = &self.illumination;
        let helper = cfg.helper.clone()?;
        let readiness = match &cfg.ready_file {
            Some(path) => Readiness::ReadyFile {
                path: path.clone(),
                timeout: Duration::from_secs(cfg.ready_timeout_secs),
            },
            None => Readiness::Settle(Duration::from_millis(cfg.settle_millis)),
        };
        Some(IlluminationSettings {
            helper,
            args: cfg.args.clone(),
            readiness,
            stop_grace: Duration::from_millis(cfg.stop_grace_millis),
        })
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError { path, source } => {
                write!(
                    f,
                    "Failed to read config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::ParseError { path, source } => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("garage-background").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/garage-background/config.toml")
        })
}

/// Commented default configuration written by `config init`.
pub const DEFAULT_CONFIG_TOML: &str = r#"# garage-background configuration

[capture]
# Camera command and its arguments; {output}, {width}, {height} and {encoding} are substituted
program = "rpicam-still"
args = ["--nopreview", "--timeout", "1000", "--encoding", "{encoding}", "--width", "{width}", "--height", "{height}", "--output", "{output}"]
# Still encoding the camera writes (jpg, png or bmp)
encoding = "jpg"
# Capture resolution expected by the detection process
width = 640
height = 480
# Give up on the camera after this many seconds
timeout_secs = 30

[transform]
# Camera is mounted upside down: flip both axes
horizontal_flip = true
vertical_flip = true
# Sensor delivers red and blue swapped
swap_channels = true
# in-process or ffmpeg
backend = "in-process"
ffmpeg_program = "ffmpeg"
jpeg_quality = 95
timeout_secs = 30

[illumination]
# Helper that switches the parking LEDs on for the capture (omit to disable)
# helper = "/usr/local/bin/garage-leds-steady"
# args = []
# File the helper creates once lighting is steady; without it a fixed delay is used
# ready_file = "/run/garage-background/ready"
ready_timeout_secs = 10
settle_millis = 2000
stop_grace_millis = 2000

[publish]
# Reference image read by the detection process
path = "background_frame.jpg"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.capture.program, "rpicam-still");
        assert_eq!(config.resolution().unwrap(), Resolution::VGA);
        assert_eq!(config.publish.path, PathBuf::from("background_frame.jpg"));
        assert!(config.illumination_settings().is_none());
        assert_eq!(config.transform_settings(), TransformSettings::default());
    }

    #[test]
    fn test_default_template_matches_defaults() {
        let parsed: Config = toml::from_str(DEFAULT_CONFIG_TOML).unwrap();
        let defaults = Config::default();
        assert_eq!(parsed.capture.args, defaults.capture.args);
        assert_eq!(parsed.capture.encoding, defaults.capture.encoding);
        assert_eq!(parsed.capture.width, defaults.capture.width);
        assert_eq!(parsed.transform_settings(), defaults.transform_settings());
        assert_eq!(parsed.transform.backend, defaults.transform.backend);
        assert_eq!(parsed.publish.path, defaults.publish.path);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[transform]\nswap_channels = false\nbackend = \"ffmpeg\"\n\n[publish]\npath = \"/data/bg.jpg\"\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert!(!config.transform.swap_channels);
        assert!(config.transform.horizontal_flip);
        assert_eq!(config.transform.backend, TransformBackend::Ffmpeg);
        assert_eq!(config.publish.path, PathBuf::from("/data/bg.jpg"));
        assert_eq!(config.capture.width, 640);
    }

    #[test]
    fn test_illumination_ready_file() {
        let config: Config = toml::from_str(
            "[illumination]\nhelper = \"/usr/bin/leds\"\nready_file = \"/run/ready\"\nready_timeout_secs = 3\n",
        )
        .unwrap();
        let settings = config.illumination_settings().unwrap();
        assert_eq!(settings.helper, PathBuf::from("/usr/bin/leds"));
        assert_eq!(
            settings.readiness,
            Readiness::ReadyFile {
                path: PathBuf::from("/run/ready"),
                timeout: Duration::from_secs(3),
            }
        );
    }

    #[test]
    fn test_illumination_settle_fallback() {
        let config: Config =
            toml::from_str("[illumination]\nhelper = \"/usr/bin/leds\"\nsettle_millis = 1500\n")
                .unwrap();
        let settings = config.illumination_settings().unwrap();
        assert_eq!(settings.readiness, Readiness::Settle(Duration::from_millis(1500)));
    }

    #[test]
    fn test_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[capture\nwidth = ").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[capture]\nwidth = 0\n").unwrap();
        assert!(matches!(
            Config::load(Some(&path)),
            Err(ConfigError::Invalid(_))
        ));

        std::fs::write(&path, "[transform]\njpeg_quality = 0\n").unwrap();
        assert!(matches!(
            Config::load(Some(&path)),
            Err(ConfigError::Invalid(_))
        ));

        std::fs::write(&path, "[capture]\nencoding = \"heic\"\n").unwrap();
        assert!(matches!(
            Config::load(Some(&path)),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_default_path_structure() {
        let path = default_path();
        assert!(path.ends_with("garage-background/config.toml"));
    }
}
