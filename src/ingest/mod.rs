//! Frame sources for the Ingestion Worker.
//!
//! Every camera source kind resolves to a `FrameSource`:
//! - `stub://` locators on local or network-stream cameras: synthetic frames
//! - local devices: V4L2 (feature: ingest-v4l2)
//! - network streams: GStreamer uridecodebin (feature: rtsp-gstreamer)
//! - remote sensors: TCP + stream wire protocol
//!
//! Opening a source either succeeds with a connected handle or returns
//! `SourceUnavailable`; the worker owns the retry policy. A handle is released
//! by dropping it.

#[cfg(feature = "rtsp-gstreamer")]
pub mod gstreamer;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod remote;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::time::Duration;

use crate::camera::{CameraSource, DEFAULT_VIDEO_PORT};
use crate::error::DvrResult;
use crate::frame::Frame;
use crate::wire::DEFAULT_MAX_FRAME_BYTES;

#[cfg(feature = "rtsp-gstreamer")]
pub use self::gstreamer::StreamSource;
pub use remote::RemoteSensorSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_millis(5_000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10_000);

#[derive(Clone, Debug, PartialEq)]
pub struct IngestSettings {
    /// Capture pacing for local and synthetic sources.
    pub fps: u32,
    pub reconnect_backoff: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_frame_bytes: usize,
    /// Port used for remote sensors without an explicit port.
    pub default_video_port: u16,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            fps: 20,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            default_video_port: DEFAULT_VIDEO_PORT,
        }
    }
}

/// A connected frame source.
pub struct FrameSource {
    backend: SourceBackend,
}

enum SourceBackend {
    Synthetic(SyntheticSource),
    Remote(RemoteSensorSource),
    #[cfg(feature = "ingest-v4l2")]
    V4l2(V4l2Source),
    #[cfg(feature = "rtsp-gstreamer")]
    Stream(StreamSource),
}

impl FrameSource {
    /// Acquire the source for a camera.
    pub fn open(source: &CameraSource, settings: &IngestSettings) -> DvrResult<Self> {
        let backend = match source {
            CameraSource::Local { device } if synthetic::is_stub(device) => {
                SourceBackend::Synthetic(SyntheticSource::open(device, settings.fps)?)
            }
            CameraSource::NetworkStream { url } if synthetic::is_stub(url) => {
                SourceBackend::Synthetic(SyntheticSource::open(url, settings.fps)?)
            }
            CameraSource::Local { device } => open_local(device, settings)?,
            CameraSource::NetworkStream { url } => open_stream(url, settings)?,
            CameraSource::RemoteSensor { address, port } => {
                let port = port.unwrap_or(settings.default_video_port);
                SourceBackend::Remote(RemoteSensorSource::connect(address, port, settings)?)
            }
        };
        Ok(Self { backend })
    }

    /// Capture the next frame.
    ///
    /// `Ok(None)` means the source ended cleanly. A frame-local error
    /// (`is_frame_local`) leaves the source usable; any other error means the
    /// handle must be released and reacquired.
    pub fn next_frame(&mut self) -> DvrResult<Option<Frame>> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.next_frame().map(Some),
            SourceBackend::Remote(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            SourceBackend::V4l2(source) => source.next_frame().map(Some),
            #[cfg(feature = "rtsp-gstreamer")]
            SourceBackend::Stream(source) => source.next_frame(),
        }
    }

    pub fn describe(&self) -> String {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.locator().to_string(),
            SourceBackend::Remote(source) => format!("tcp://{}", source.peer()),
            #[cfg(feature = "ingest-v4l2")]
            SourceBackend::V4l2(source) => source.device().to_string(),
            #[cfg(feature = "rtsp-gstreamer")]
            SourceBackend::Stream(source) => source.uri().to_string(),
        }
    }
}

/// `/dev/video<N>` for a bare decimal index, else the path as given.
pub fn local_device_path(device: &str) -> String {
    let device = device.trim();
    if !device.is_empty() && device.chars().all(|c| c.is_ascii_digit()) {
        format!("/dev/video{}", device)
    } else {
        device.to_string()
    }
}

#[cfg(feature = "ingest-v4l2")]
fn open_local(device: &str, settings: &IngestSettings) -> DvrResult<SourceBackend> {
    Ok(SourceBackend::V4l2(V4l2Source::open(
        &local_device_path(device),
        settings.fps,
    )?))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_local(device: &str, _settings: &IngestSettings) -> DvrResult<SourceBackend> {
    Err(crate::error::DvrError::SourceUnavailable(format!(
        "local capture of {} requires the ingest-v4l2 feature",
        local_device_path(device)
    )))
}

#[cfg(feature = "rtsp-gstreamer")]
fn open_stream(url: &str, settings: &IngestSettings) -> DvrResult<SourceBackend> {
    Ok(SourceBackend::Stream(StreamSource::open(url, settings)?))
}

#[cfg(not(feature = "rtsp-gstreamer"))]
fn open_stream(url: &str, _settings: &IngestSettings) -> DvrResult<SourceBackend> {
    Err(crate::error::DvrError::SourceUnavailable(format!(
        "stream {} requires the rtsp-gstreamer feature",
        url
    )))
}
