/// Bytes per pixel in a [`Frame`] buffer (R, G, B, A).
pub const CHANNELS: usize = 4;

/// A decoded raster frame sampled from a video source.
///
/// Layout: row-major RGBA8, `width * height * 4` bytes, no row padding.
///
/// A frame is immutable once built. Cloning produces an independent copy of
/// the pixel buffer, which is how the extraction session keeps its own
/// comparison reference after handing a frame to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap an RGBA8 buffer. Rejects zero dimensions and buffers whose length
    /// does not match `width * height * 4`.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroDimension { width, height });
        }
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A frame where every pixel has the same RGBA value.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self, FrameError> {
        let pixels = width as usize * height as usize;
        let data = rgba.iter().copied().cycle().take(pixels * CHANNELS).collect();
        Self::new(width, height, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Raw RGBA8 bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Iterate pixels as `[r, g, b, a]`.
    pub fn pixels(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(CHANNELS)
    }

    /// Consume the frame and return its pixel buffer.
    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame dimensions must be non-zero, got {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },
    #[error("frame buffer has {got} bytes, expected {expected}")]
    BufferSize { expected: usize, got: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_accepts_exact_buffer() {
        let frame = Frame::new(4, 2, vec![0; 4 * 2 * 4]).unwrap();
        assert_eq!(frame.dimensions(), (4, 2));
        assert_eq!(frame.pixel_count(), 8);
        assert_eq!(frame.pixels().count(), 8);
    }

    #[test]
    fn new_rejects_short_buffer() {
        let err = Frame::new(4, 2, vec![0; 31]).unwrap_err();
        assert_eq!(err, FrameError::BufferSize { expected: 32, got: 31 });
    }

    #[test]
    fn new_rejects_zero_dimension() {
        assert!(matches!(
            Frame::new(0, 10, vec![]),
            Err(FrameError::ZeroDimension { .. })
        ));
    }

    #[test]
    fn filled_repeats_pixel() {
        let frame = Frame::filled(3, 3, [10, 20, 30, 255]).unwrap();
        assert!(frame.pixels().all(|p| p == [10, 20, 30, 255]));
    }

    #[test]
    fn clone_is_independent_copy() {
        let frame = Frame::filled(2, 2, [1, 2, 3, 4]).unwrap();
        let copy = frame.clone();
        assert_ne!(frame.as_bytes().as_ptr(), copy.as_bytes().as_ptr());
        assert_eq!(frame, copy);
    }
}
