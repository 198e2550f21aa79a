use bytes::Bytes;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::{Error, FrameGrabber, RawCapture, Result};

const MJPG: &[u8; 4] = b"MJPG";

struct OpenStream {
    // Field order matters: the stream must drop before the device it was
    // created from.
    stream: Stream<'static>,
    _device: Box<Device>,
}

/// USB camera backend over V4L2, negotiating MJPG so the device hands us
/// JPEG directly.
pub struct V4lGrabber {
    index: usize,
    width: u32,
    height: u32,
    open: Option<OpenStream>,
}

impl V4lGrabber {
    pub fn new(index: usize, width: u32, height: u32) -> Self {
        Self {
            index,
            width,
            height,
            open: None,
        }
    }

    fn ensure_open(&mut self) -> Result<&mut OpenStream> {
        if self.open.is_none() {
            let device = Box::new(Device::new(self.index).map_err(|e| {
                Error::NotAvailable(format!("/dev/video{}: {e}", self.index))
            })?);

            let mut fmt = device.format()?;
            fmt.width = self.width;
            fmt.height = self.height;
            fmt.fourcc = FourCC::new(MJPG);
            let fmt = device.set_format(&fmt)?;
            if &fmt.fourcc.repr != MJPG {
                return Err(Error::NotAvailable(format!(
                    "/dev/video{} cannot deliver MJPG (got {})",
                    self.index, fmt.fourcc
                )));
            }
            self.width = fmt.width;
            self.height = fmt.height;

            let stream = Stream::with_buffers(&device, Type::VideoCapture, 4)?;
            // The stream borrows the boxed device, which stays at a stable
            // address inside OpenStream and is dropped after the stream.
            let stream: Stream<'static> =
                unsafe { std::mem::transmute::<Stream<'_>, Stream<'static>>(stream) };
            self.open = Some(OpenStream {
                stream,
                _device: device,
            });
        }
        Ok(self.open.as_mut().unwrap())
    }
}

impl FrameGrabber for V4lGrabber {
    fn name(&self) -> &str {
        "v4l2"
    }

    fn grab(&mut self) -> Result<RawCapture> {
        let width = self.width;
        let height = self.height;
        let open = self.ensure_open()?;
        let (buf, _meta) = open.stream.next()?;
        if buf.len() < 4 || buf[..2] != [0xFF, 0xD8] {
            return Err(Error::Capture("V4L2 buffer is not a JPEG frame".into()));
        }
        Ok(RawCapture {
            jpeg: Bytes::from(buf.to_vec()),
            width,
            height,
        })
    }

    fn stop(&mut self) {
        self.open = None;
    }
}
