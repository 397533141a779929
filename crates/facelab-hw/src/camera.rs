//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera device not found: {0}")]
    DeviceNotFound(String),
    #[error("camera device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

/// Outcome of a single frame read.
///
/// `EndOfStream` is not a fault: a camera that unplugs or stops
/// producing drives the session to natural completion.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("end of stream")]
    EndOfStream,
    #[error("device read failed: {0}")]
    Device(String),
}

/// A live source of frames. One source owns one physical device; the
/// handle moves into the session worker and is released by dropping it,
/// which is what makes close race-free against an in-flight read.
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Result<Frame, ReadError>;
}

/// V4L2 camera handle, opened by device index.
///
/// The mmap stream is created on the first read and kept for the
/// handle's lifetime. The `'static` parameter is sound: the stream
/// holds the device via its ref-counted handle, the lifetime only
/// names the mapped buffers.
pub struct V4lCamera {
    device: Device,
    stream: Option<MmapStream<'static>>,
    pub width: u32,
    pub height: u32,
    pub index: u32,
}

impl V4lCamera {
    /// Open `/dev/video{index}` and negotiate interleaved YUYV at
    /// 640x480.
    pub fn open(index: u32) -> Result<Self, CameraError> {
        let path = format!("/dev/video{index}");
        if !Path::new(&path).exists() {
            return Err(CameraError::DeviceNotFound(path));
        }

        let device = Device::new(index as usize).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = 640;
        fmt.height = 480;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("set format: {e}")))?;
        if negotiated.fourcc != FourCC::new(b"YUYV") {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "device offers {:?}, need YUYV",
                negotiated.fourcc
            )));
        }

        tracing::info!(
            index,
            driver = %caps.driver,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            "camera opened"
        );

        Ok(Self {
            device,
            stream: None,
            width: negotiated.width,
            height: negotiated.height,
            index,
        })
    }
}

impl FrameSource for V4lCamera {
    fn read_frame(&mut self) -> Result<Frame, ReadError> {
        // On a failed read the stream stays dropped and the next tick
        // negotiates a fresh one.
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
                .map_err(|e| ReadError::Device(format!("mmap stream: {e}")))?,
        };

        let rgb = {
            let (buf, _meta) = stream.next().map_err(|e| {
                // A yanked cable surfaces as ENODEV; treat it as the
                // stream ending rather than a fault.
                if e.raw_os_error() == Some(libc_enodev()) {
                    ReadError::EndOfStream
                } else {
                    ReadError::Device(format!("dequeue buffer: {e}"))
                }
            })?;

            frame::yuyv_to_rgb(buf, self.width, self.height)
                .map_err(|e| ReadError::Device(e.to_string()))?
        };
        self.stream = Some(stream);

        Frame::from_raw(rgb, self.width, self.height)
            .ok_or_else(|| ReadError::Device("converted frame has wrong size".into()))
    }
}

const fn libc_enodev() -> i32 {
    19 // ENODEV on Linux
}
