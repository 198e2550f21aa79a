use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;

use crate::{mask_credentials, Error, FrameGrabber, RawCapture, Result};

/// RTSP backend: a GStreamer pipeline decoding the stream and re-encoding
/// to JPEG at an appsink. TCP transport is forced; UDP behind NAT loses too
/// many packets to be worth negotiating.
pub struct RtspGrabber {
    masked_url: String,
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
}

impl RtspGrabber {
    pub fn open(url: &str) -> Result<Self> {
        gst::init().map_err(|e| Error::NotAvailable(format!("gstreamer init: {e}")))?;

        let masked_url = mask_credentials(url);
        let desc = format!(
            "rtspsrc location={url} protocols=tcp latency=200 ! \
             decodebin ! videoconvert ! jpegenc quality=85 ! \
             appsink name=sink max-buffers=2 drop=true sync=false"
        );
        let pipeline = gst::parse::launch(&desc)
            .map_err(|e| Error::NotAvailable(format!("{masked_url}: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| Error::NotAvailable("pipeline downcast failed".into()))?;

        let appsink = pipeline
            .by_name("sink")
            .and_then(|e| e.downcast::<gst_app::AppSink>().ok())
            .ok_or_else(|| Error::NotAvailable("appsink missing from pipeline".into()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| Error::NotAvailable(format!("{masked_url}: {e}")))?;

        Ok(Self {
            masked_url,
            pipeline,
            appsink,
        })
    }
}

impl FrameGrabber for RtspGrabber {
    fn name(&self) -> &str {
        "rtsp"
    }

    fn grab(&mut self) -> Result<RawCapture> {
        let sample = self
            .appsink
            .try_pull_sample(gst::ClockTime::from_seconds(5))
            .ok_or_else(|| Error::Capture(format!("{}: no sample", self.masked_url)))?;

        let buffer = sample
            .buffer()
            .ok_or_else(|| Error::Capture("sample without buffer".into()))?;
        let map = buffer
            .map_readable()
            .map_err(|_| Error::Capture("unmappable buffer".into()))?;

        let (width, height) = sample
            .caps()
            .and_then(|caps| caps.structure(0))
            .and_then(|s| {
                let w = s.get::<i32>("width").ok()?;
                let h = s.get::<i32>("height").ok()?;
                Some((w as u32, h as u32))
            })
            .unwrap_or((0, 0));

        Ok(RawCapture {
            jpeg: Bytes::from(map.as_slice().to_vec()),
            width,
            height,
        })
    }

    fn stop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
