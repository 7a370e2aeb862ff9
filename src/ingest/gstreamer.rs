//! Network stream source backed by GStreamer.
//!
//! `uridecodebin` handles RTSP as well as HTTP MJPEG and file URIs; frames are
//! converted to RGB and pulled from an appsink that keeps only the newest
//! buffer.

use std::time::Duration;

use gstreamer::prelude::*;

use crate::error::{DvrError, DvrResult};
use crate::frame::Frame;
use crate::ingest::IngestSettings;

pub struct StreamSource {
    uri: String,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    pull_timeout: Duration,
    frame_count: u64,
}

impl StreamSource {
    pub fn open(uri: &str, settings: &IngestSettings) -> DvrResult<Self> {
        gstreamer::init().map_err(|e| DvrError::unavailable("initialize gstreamer", e))?;

        let description = format!(
            "uridecodebin uri=\"{}\" ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            uri
        );
        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| DvrError::unavailable("build stream pipeline", e))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| DvrError::SourceUnavailable("stream pipeline is not a Pipeline".into()))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| DvrError::SourceUnavailable("appsink missing from pipeline".into()))?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| DvrError::SourceUnavailable("appsink has unexpected type".into()))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| DvrError::unavailable(&format!("start {}", uri), e))?;
        log::info!("stream {}: playing", uri);

        Ok(Self {
            uri: uri.to_string(),
            pipeline,
            appsink,
            pull_timeout: settings.read_timeout,
            frame_count: 0,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    /// `Ok(None)` at end of stream.
    pub fn next_frame(&mut self) -> DvrResult<Option<Frame>> {
        self.check_bus()?;
        if self.appsink.is_eos() {
            return Ok(None);
        }
        let timeout = gstreamer::ClockTime::from_mseconds(self.pull_timeout.as_millis() as u64);
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            if self.appsink.is_eos() {
                return Ok(None);
            }
            return Err(DvrError::SourceUnavailable(format!(
                "stream {} stalled for {:?}",
                self.uri, self.pull_timeout
            )));
        };
        let frame = sample_to_frame(&sample)?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn check_bus(&self) -> DvrResult<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            if let MessageView::Error(err) = message.view() {
                return Err(DvrError::SourceUnavailable(format!(
                    "stream {}: {} ({:?})",
                    self.uri,
                    err.error(),
                    err.src().map(|s| s.path_string())
                )));
            }
        }
        Ok(())
    }
}

impl Drop for StreamSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

fn sample_to_frame(sample: &gstreamer::Sample) -> DvrResult<Frame> {
    let buffer = sample
        .buffer()
        .ok_or_else(|| DvrError::Decode("sample missing buffer".into()))?;
    let caps = sample
        .caps()
        .ok_or_else(|| DvrError::Decode("sample missing caps".into()))?;
    let info = gstreamer_video::VideoInfo::from_caps(caps)
        .map_err(|e| DvrError::Decode(format!("parse caps: {}", e)))?;

    let width = info.width();
    let height = info.height();
    let row_bytes = width as usize * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer
        .map_readable()
        .map_err(|e| DvrError::Decode(format!("map buffer: {}", e)))?;
    let data = map.as_slice();

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .ok_or_else(|| DvrError::Decode("buffer row out of bounds".into()))?,
        );
    }
    Frame::from_rgb(width, height, pixels)
}
