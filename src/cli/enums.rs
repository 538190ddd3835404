//! CLI enum types for backend selection.

use clap::ValueEnum;

use crate::transform::TransformBackend;

/// Transform backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Backend {
    #[default]
    InProcess,
    Ffmpeg,
}

impl From<Backend> for TransformBackend {
    fn from(b: Backend) -> Self {
        match b {
            Backend::InProcess => TransformBackend::InProcess,
            Backend::Ffmpeg => TransformBackend::Ffmpeg,
        }
    }
}
