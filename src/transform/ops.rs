//! Channel correction on packed RGB8 buffers.
//!
//! Orientation uses `image::imageops`; the sensor's channel order has no
//! equivalent there.

use image::RgbImage;

const BPP: usize = 3;

/// Swap the red and blue channels of every pixel, leaving green untouched.
///
/// Equivalent to the color matrix with ones at (R,B), (G,G) and (B,R).
pub fn swap_red_blue(img: &mut RgbImage) {
    for px in img.chunks_exact_mut(BPP) {
        px.swap(0, 2);
    }
}
