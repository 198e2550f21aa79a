//! MJPEG multipart fan-out for live camera streams.
//!
//! Each camera has one `watch` slot holding the latest frame; every stream
//! client owns its own receiver and therefore its own position cursor. A
//! slow client simply observes fewer frames - it never back-pressures the
//! publisher or other clients, and no JPEG bytes are copied per client
//! (frames travel as `Arc<Frame>`).

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::response::Response;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::debug;

use pmcp_types::{CameraId, Frame};

/// The multipart boundary token, literally `frame`.
pub const MJPEG_BOUNDARY: &str = "frame";

/// Content type of the stream response.
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// How long a client may sit without a new frame before its stream ends.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

type FrameSlot = watch::Sender<Option<Arc<Frame>>>;

/// Publisher side of the fan-out, shared by all cameras.
#[derive(Default)]
pub struct MjpegHub {
    slots: RwLock<HashMap<CameraId, FrameSlot>>,
}

impl MjpegHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a camera streamable before its first frame arrives.
    pub fn register(&self, camera_id: CameraId) {
        self.slots
            .write()
            .entry(camera_id)
            .or_insert_with(|| watch::channel(None).0);
    }

    /// Publish the newest frame for its camera. Cheap: one Arc clone.
    pub fn publish(&self, frame: Arc<Frame>) {
        let camera_id = frame.camera_id.clone();
        {
            let slots = self.slots.read();
            if let Some(slot) = slots.get(&camera_id) {
                slot.send_replace(Some(frame));
                return;
            }
        }
        let mut slots = self.slots.write();
        slots
            .entry(camera_id)
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(frame));
    }

    /// Subscribe a new client; `None` for unknown cameras.
    pub fn subscribe(&self, camera_id: &CameraId) -> Option<watch::Receiver<Option<Arc<Frame>>>> {
        self.slots.read().get(camera_id).map(|slot| slot.subscribe())
    }

    pub fn camera_ids(&self) -> Vec<CameraId> {
        self.slots.read().keys().cloned().collect()
    }
}

/// Encode one multipart part.
///
/// `--frame\r\nContent-Type: image/jpeg\r\nContent-Length: N\r\n\r\n<jpeg>\r\n`
pub fn encode_part(jpeg: &Bytes) -> Bytes {
    let header = format!(
        "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Build the streaming HTTP response for one subscribed client.
///
/// The stream yields the current frame immediately (when one exists), then
/// one part per subsequent frame, and ends after `idle_timeout` without a
/// new frame or when the publisher goes away.
pub fn mjpeg_response(
    mut rx: watch::Receiver<Option<Arc<Frame>>>,
    idle_timeout: Duration,
) -> Response {
    let parts = async_stream::stream! {
        // mark_changed so an already-present frame is sent without waiting.
        rx.mark_changed();
        loop {
            match tokio::time::timeout(idle_timeout, rx.changed()).await {
                Ok(Ok(())) => {
                    let frame = rx.borrow_and_update().clone();
                    if let Some(frame) = frame {
                        if !frame.is_well_formed_jpeg() {
                            debug!(camera = %frame.camera_id, seqno = frame.seqno,
                                "skipping malformed JPEG frame");
                            continue;
                        }
                        yield Ok::<Bytes, Infallible>(encode_part(&frame.jpeg));
                    }
                }
                Ok(Err(_)) => break, // publisher dropped
                Err(_) => {
                    debug!("stream client idle timeout");
                    break;
                }
            }
        }
    };

    Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, MJPEG_CONTENT_TYPE)
        .header(http::header::CACHE_CONTROL, "no-cache, no-store")
        .header(http::header::PRAGMA, "no-cache")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(parts))
        .expect("static response parts are valid")
}
