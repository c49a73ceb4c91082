use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use tracing::debug;

use crate::frame::Frame;

/// JPEG-encode a frame at a fixed quality (1..=100). Alpha is dropped since
/// JPEG has no alpha channel.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Bytes, EncodeError> {
    let rgb: Vec<u8> = frame
        .pixels()
        .flat_map(|p| [p[0], p[1], p[2]])
        .collect();

    let mut out = Vec::with_capacity(rgb.len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).write_image(
        &rgb,
        frame.width(),
        frame.height(),
        ExtendedColorType::Rgb8,
    )?;

    debug!(
        width = frame.width(),
        height = frame.height(),
        quality,
        bytes = out.len(),
        "encoded frame as JPEG"
    );
    Ok(Bytes::from(out))
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("JPEG encode failed: {0}")]
    Image(#[from] image::ImageError),
}
