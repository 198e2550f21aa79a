use std::time::Duration;

use bytes::Bytes;

use crate::{mask_credentials, Error, FrameGrabber, RawCapture, Result};

/// Snapshot-polling backend for `http` cameras.
///
/// Issues one GET per grab against a still-image endpoint (the common
/// `/snapshot.jpg` style exposed by IP cameras). Non-JPEG image payloads are
/// transcoded so downstream consumers always see JPEG.
pub struct HttpSnapshotGrabber {
    url: String,
    masked_url: String,
    timeout: Duration,
    // Built lazily on the capture thread; reqwest's blocking client must
    // not be driven from inside an async runtime.
    client: Option<reqwest::blocking::Client>,
}

impl HttpSnapshotGrabber {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        let masked_url = mask_credentials(&url);
        Ok(Self {
            url,
            masked_url,
            timeout,
            client: None,
        })
    }

    fn client(&mut self) -> Result<&reqwest::blocking::Client> {
        if self.client.is_none() {
            self.client = Some(
                reqwest::blocking::Client::builder()
                    .timeout(self.timeout)
                    .build()?,
            );
        }
        Ok(self.client.as_ref().unwrap())
    }
}

impl FrameGrabber for HttpSnapshotGrabber {
    fn name(&self) -> &str {
        "http-snapshot"
    }

    fn grab(&mut self) -> Result<RawCapture> {
        let url = self.url.clone();
        let response = self.client()?.get(&url).send()?;
        if !response.status().is_success() {
            return Err(Error::Capture(format!(
                "{} returned {}",
                self.masked_url,
                response.status()
            )));
        }
        let body = response.bytes()?;

        if body.len() >= 2 && body[..2] == [0xFF, 0xD8] {
            // Already JPEG; decode only the header for dimensions.
            let (width, height) = jpeg_dimensions(&body)
                .ok_or_else(|| Error::Capture("unparseable JPEG from camera".into()))?;
            return Ok(RawCapture {
                jpeg: Bytes::from(body.to_vec()),
                width,
                height,
            });
        }

        // PNG or similar: transcode.
        let img = image::load_from_memory(&body)?;
        let (width, height) = (img.width(), img.height());
        let mut jpeg = Vec::new();
        let mut enc = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 85);
        enc.encode_image(&img)?;
        Ok(RawCapture {
            jpeg: Bytes::from(jpeg),
            width,
            height,
        })
    }
}

/// Read width/height from JPEG SOF markers without a full decode.
fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2usize;
    while i + 9 < data.len() {
        if data[i] != 0xFF {
            return None;
        }
        let marker = data[i + 1];
        // SOF0..SOF15 except DHT(C4)/JPG(C8)/DAC(CC).
        if (0xC0..=0xCF).contains(&marker) && ![0xC4, 0xC8, 0xCC].contains(&marker) {
            let height = u16::from_be_bytes([data[i + 5], data[i + 6]]) as u32;
            let width = u16::from_be_bytes([data[i + 7], data[i + 8]]) as u32;
            return Some((width, height));
        }
        let seg_len = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
        i += 2 + seg_len;
    }
    None
}
