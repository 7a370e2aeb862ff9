//! VP8/WebM recordings through a GStreamer encode pipeline.

use std::path::{Path, PathBuf};

use gstreamer::prelude::*;

use super::sink::{create_unique, recording_file_name, ContainerFormat, SessionFactory, SessionRequest, VideoSink};
use crate::error::{DvrError, DvrResult};
use crate::frame::Frame;

const FINISH_TIMEOUT_SECS: u64 = 5;

#[derive(Clone, Debug)]
pub struct WebmSessionFactory {
    dir: PathBuf,
    fps: u32,
}

impl WebmSessionFactory {
    pub fn new(dir: impl Into<PathBuf>, fps: u32) -> DvrResult<Self> {
        gstreamer::init().map_err(|e| DvrError::write("initialize gstreamer", e))?;
        Ok(Self {
            dir: dir.into(),
            fps: fps.max(1),
        })
    }
}

impl SessionFactory for WebmSessionFactory {
    fn open(&self, request: &SessionRequest<'_>) -> DvrResult<Box<dyn VideoSink>> {
        let name = recording_file_name(
            request.camera,
            request.started_at,
            ContainerFormat::Webm.extension(),
        );
        // Reserve the name; filesink reopens it for writing.
        let (_file, path) = create_unique(&self.dir, &name)?;

        let description = format!(
            "appsrc name=src is-live=true format=time ! videoconvert ! vp8enc deadline=1 ! \
             webmmux ! filesink location=\"{}\"",
            path.display()
        );
        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| DvrError::write("build webm pipeline", e))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| DvrError::Write("webm pipeline is not a Pipeline".into()))?;
        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| DvrError::Write("appsrc missing from pipeline".into()))?
            .downcast::<gstreamer_app::AppSrc>()
            .map_err(|_| DvrError::Write("appsrc has unexpected type".into()))?;

        let info = gstreamer_video::VideoInfo::builder(
            gstreamer_video::VideoFormat::Rgb,
            request.width,
            request.height,
        )
        .fps(gstreamer::Fraction::new(self.fps as i32, 1))
        .build()
        .map_err(|e| DvrError::write("webm caps", e))?;
        let caps = info
            .to_caps()
            .map_err(|e| DvrError::write("webm caps", e))?;
        appsrc.set_caps(Some(&caps));

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| DvrError::write("start webm pipeline", e))?;

        Ok(Box::new(WebmSink {
            path,
            pipeline,
            appsrc,
            frame_duration: gstreamer::ClockTime::SECOND / self.fps as u64,
            frames: 0,
        }))
    }
}

struct WebmSink {
    path: PathBuf,
    pipeline: gstreamer::Pipeline,
    appsrc: gstreamer_app::AppSrc,
    frame_duration: gstreamer::ClockTime,
    frames: u64,
}

impl VideoSink for WebmSink {
    fn append(&mut self, frame: &Frame) -> DvrResult<()> {
        let mut buffer = gstreamer::Buffer::from_slice(frame.as_rgb().to_vec());
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(self.frame_duration * self.frames);
            buffer.set_duration(self.frame_duration);
        }
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| DvrError::write("push webm frame", format!("{:?}", e)))?;
        self.frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> DvrResult<()> {
        let _ = self.appsrc.end_of_stream();
        let result = match self.pipeline.bus() {
            Some(bus) => {
                use gstreamer::MessageView;
                match bus.timed_pop_filtered(
                    gstreamer::ClockTime::from_seconds(FINISH_TIMEOUT_SECS),
                    &[gstreamer::MessageType::Eos, gstreamer::MessageType::Error],
                ) {
                    Some(msg) => match msg.view() {
                        MessageView::Error(err) => {
                            Err(DvrError::write("finalize webm", err.error()))
                        }
                        _ => Ok(()),
                    },
                    None => Err(DvrError::Write("webm finalize timed out".into())),
                }
            }
            None => Ok(()),
        };
        let _ = self.pipeline.set_state(gstreamer::State::Null);
        result
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn container(&self) -> ContainerFormat {
        ContainerFormat::Webm
    }
}
