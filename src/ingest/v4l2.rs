//! V4L2 capture for local cameras.
//!
//! Requests RGB24 at the device's current resolution and falls back to
//! whatever format the driver keeps (YUYV or NV12 are normalized to RGB).

use ouroboros::self_referencing;

use super::normalize::{self, PixelFormat};
use crate::error::{DvrError, DvrResult};
use crate::frame::Frame;

const CAPTURE_BUFFERS: u32 = 4;

pub struct V4l2Source {
    device_path: String,
    state: V4l2State,
    format: PixelFormat,
    width: u32,
    height: u32,
    frame_count: u64,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn open(device_path: &str, fps: u32) -> DvrResult<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(device_path)
            .map_err(|e| DvrError::unavailable(&format!("open {}", device_path), e))?;
        let mut requested = device
            .format()
            .map_err(|e| DvrError::unavailable("read v4l2 format", e))?;
        requested.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&requested) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("v4l2 {}: cannot select RGB24: {}", device_path, err);
                device
                    .format()
                    .map_err(|e| DvrError::unavailable("read v4l2 format", e))?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            DvrError::SourceUnavailable(format!(
                "v4l2 {}: unsupported pixel format {}",
                device_path, format.fourcc
            ))
        })?;

        if fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("v4l2 {}: cannot set {} fps: {}", device_path, fps, err);
            }
        }

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, CAPTURE_BUFFERS)
                    .map_err(|e| DvrError::unavailable("create v4l2 stream", e))
            },
        }
        .try_build()?;

        log::info!(
            "v4l2 {}: capturing {}x{} {:?}",
            device_path,
            format.width,
            format.height,
            pixel_format
        );
        Ok(Self {
            device_path: device_path.to_string(),
            state,
            format: pixel_format,
            width: format.width,
            height: format.height,
            frame_count: 0,
        })
    }

    pub fn device(&self) -> &str {
        &self.device_path
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    pub fn next_frame(&mut self) -> DvrResult<Frame> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.width, self.height, self.format);
        let frame = self.state.with_stream_mut(|stream| {
            let (buf, meta) = stream
                .next()
                .map_err(|e| DvrError::unavailable("capture v4l2 frame", e))?;
            let used = (meta.bytesused as usize).min(buf.len());
            let data = if used == 0 { buf } else { &buf[..used] };
            normalize::to_frame(data, width, height, format)
        })?;
        self.frame_count += 1;
        Ok(frame)
    }
}
