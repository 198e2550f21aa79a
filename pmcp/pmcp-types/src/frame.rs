use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::CameraId;

/// JPEG start-of-image marker.
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker.
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// A single capture from one camera.
///
/// Immutable after creation. The image payload is JPEG-encoded so that the
/// HTTP surface can serve it without a re-encode; consumers that need pixels
/// (the change detector) decode on demand. Frames are shared by `Arc` and
/// the payload itself is a cheaply-clonable [`Bytes`].
#[derive(Debug, Clone)]
pub struct Frame {
    pub camera_id: CameraId,
    /// Strictly increasing per camera; gaps indicate dropped captures.
    pub seqno: u64,
    /// Capture timestamp as observed on the host, UTC.
    pub stamp: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    /// JPEG bytes, beginning with SOI and ending with EOI.
    pub jpeg: Bytes,
}

impl Frame {
    pub fn new(
        camera_id: CameraId,
        seqno: u64,
        stamp: DateTime<Utc>,
        width: u32,
        height: u32,
        jpeg: Bytes,
    ) -> Self {
        Self {
            camera_id,
            seqno,
            stamp,
            width,
            height,
            jpeg,
        }
    }

    /// True when the payload carries the JPEG SOI and EOI markers.
    pub fn is_well_formed_jpeg(&self) -> bool {
        self.jpeg.len() >= 4
            && self.jpeg[..2] == JPEG_SOI
            && self.jpeg[self.jpeg.len() - 2..] == JPEG_EOI
    }
}

fn _assert_frame_is_send_sync() {
    fn implements<T: Send + Sync>() {}
    implements::<Frame>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_jpeg_markers() {
        let good = Frame::new(
            CameraId::new("c"),
            0,
            Utc::now(),
            1,
            1,
            Bytes::from_static(&[0xFF, 0xD8, 0x00, 0xFF, 0xD9]),
        );
        assert!(good.is_well_formed_jpeg());

        let bad = Frame::new(
            CameraId::new("c"),
            0,
            Utc::now(),
            1,
            1,
            Bytes::from_static(b"not a jpeg"),
        );
        assert!(!bad.is_well_formed_jpeg());
    }
}
