//! Small image helpers shared by the loop and the HTTP surface.

use base64::Engine as _;
use bytes::Bytes;
use image::imageops::FilterType;

pub type Result<T> = std::result::Result<T, image::ImageError>;

/// Longest side of alert thumbnails.
pub const THUMBNAIL_MAX_SIDE: u32 = 320;

/// Downscale a JPEG to thumbnail size, re-encoded at modest quality.
pub fn thumbnail_jpeg(jpeg: &[u8]) -> Result<Bytes> {
    let img = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)?;
    let scaled = if img.width().max(img.height()) > THUMBNAIL_MAX_SIDE {
        img.resize(THUMBNAIL_MAX_SIDE, THUMBNAIL_MAX_SIDE, FilterType::Triangle)
    } else {
        img
    };
    let mut out = Vec::new();
    let mut enc = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 70);
    enc.encode_image(&scaled)?;
    Ok(Bytes::from(out))
}

pub fn to_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn thumbnail_shrinks_and_stays_jpeg() {
        let img = GrayImage::from_fn(640, 480, |x, _| Luma([(x % 255) as u8]));
        let mut jpeg = Vec::new();
        let mut enc = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90);
        enc.encode_image(&img).unwrap();

        let thumb = thumbnail_jpeg(&jpeg).unwrap();
        assert!(thumb.len() < jpeg.len());
        assert_eq!(&thumb[..2], &[0xFF, 0xD8]);
        assert_eq!(&thumb[thumb.len() - 2..], &[0xFF, 0xD9]);

        let decoded = image::load_from_memory(&thumb).unwrap();
        assert!(decoded.width() <= THUMBNAIL_MAX_SIDE);
        assert!(decoded.height() <= THUMBNAIL_MAX_SIDE);
    }
}
