//! Image transform stage.
//!
//! Corrects a raw capture for the camera mount: horizontal flip, vertical
//! flip and an optional red/blue channel swap, applied in that order.
//! Two backends are available, see [`TransformBackend`].

mod filter;
pub mod ops;
mod stage;

pub use filter::{build_filter_chain, SWAP_RED_BLUE_MIXER};
pub use stage::{
    build_transformer, FfmpegTransform, InProcessTransform, TransformBackend, TransformError,
    TransformSettings, TransformedImage, Transformer,
};
