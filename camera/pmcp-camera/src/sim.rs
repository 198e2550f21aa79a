use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, Luma};

use crate::{FrameGrabber, RawCapture, Result};

/// Synthetic frame generator: a gradient that drifts one column per grab.
///
/// Used by tests and by `pmcp doctor --self-test`; deliberately cheap so it
/// can run at high frame rates.
pub struct SyntheticGrabber {
    width: u32,
    height: u32,
    phase: u32,
}

impl SyntheticGrabber {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            phase: 0,
        }
    }
}

impl FrameGrabber for SyntheticGrabber {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn grab(&mut self) -> Result<RawCapture> {
        let phase = self.phase;
        self.phase = self.phase.wrapping_add(1);
        let width = self.width;
        let img = GrayImage::from_fn(self.width, self.height, move |x, _y| {
            Luma([(((x + phase) % width) * 255 / width.max(1)) as u8])
        });
        let mut jpeg = Vec::new();
        let mut enc = JpegEncoder::new_with_quality(&mut jpeg, 85);
        enc.encode_image(&img)?;
        Ok(RawCapture {
            jpeg: Bytes::from(jpeg),
            width: self.width,
            height: self.height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grabs_are_valid_jpeg() {
        let mut g = SyntheticGrabber::new(32, 24);
        let cap = g.grab().unwrap();
        assert_eq!(&cap.jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&cap.jpeg[cap.jpeg.len() - 2..], &[0xFF, 0xD9]);
        assert_eq!((cap.width, cap.height), (32, 24));
    }
}
