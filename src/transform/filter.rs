//! FFmpeg filter chain for the external transform backend.

use super::stage::TransformSettings;

/// Color matrix that swaps red and blue while keeping green.
pub const SWAP_RED_BLUE_MIXER: &str =
    "colorchannelmixer=rr=0:rg=0:rb=1:gr=0:gg=1:gb=0:br=1:bg=0:bb=0";

/// Build the filter chain for the enabled correction steps.
///
/// The chain applies, in order:
/// 1. Horizontal flip (hflip) if enabled
/// 2. Vertical flip (vflip) if enabled
/// 3. Red/blue channel swap if enabled
///
/// Returns `null` (the ffmpeg pass-through filter) when nothing is enabled.
pub fn build_filter_chain(settings: &TransformSettings) -> String {
    let mut filters = Vec::new();

    if settings.horizontal_flip {
        filters.push("hflip");
    }
    if settings.vertical_flip {
        filters.push("vflip");
    }
    if settings.swap_channels {
        filters.push(SWAP_RED_BLUE_MIXER);
    }

    if filters.is_empty() {
        "null".to_string()
    } else {
        filters.join(",")
    }
}

/// Map a JPEG quality (1-100) onto ffmpeg's `-q:v` scale (2 best, 31 worst).
pub fn jpeg_qscale(quality: u8) -> u8 {
    let quality = quality.clamp(1, 100) as u32;
    (2 + (100 - quality) * 29 / 99) as u8
}
