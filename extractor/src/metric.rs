//! Perceptual difference between two frames.

use keyframe_common::Frame;

use crate::error::KeyframeError;

// ITU-R BT.709 luma weights.
const RED_WEIGHT: f64 = 0.2126;
const GREEN_WEIGHT: f64 = 0.7152;
const BLUE_WEIGHT: f64 = 0.0722;

/// Luminance of one RGBA pixel. Alpha is ignored.
pub fn luminance(rgba: &[u8]) -> f64 {
    RED_WEIGHT * rgba[0] as f64 + GREEN_WEIGHT * rgba[1] as f64 + BLUE_WEIGHT * rgba[2] as f64
}

/// Root-mean-square luminance difference between two frames of equal size.
///
/// Returns 0.0 for identical frames and is symmetric in its arguments. The
/// result is a pure function of the pixel data: pixels are visited in buffer
/// order and accumulated in `f64`, so repeated calls give bit-identical
/// results.
pub fn dissimilarity(a: &Frame, b: &Frame) -> Result<f64, KeyframeError> {
    if a.dimensions() != b.dimensions() {
        return Err(KeyframeError::DimensionMismatch {
            left: a.dimensions(),
            right: b.dimensions(),
        });
    }

    let sum_sq: f64 = a
        .pixels()
        .zip(b.pixels())
        .map(|(p, q)| {
            let d = luminance(p) - luminance(q);
            d * d
        })
        .sum();

    Ok((sum_sq / a.pixel_count() as f64).sqrt())
}
