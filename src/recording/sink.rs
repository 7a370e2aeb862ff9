//! Recording output: one video container per recording session.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::codec;
use crate::error::{DvrError, DvrResult};
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerFormat {
    /// Concatenated JPEG frames.
    Mjpeg,
    /// VP8 in WebM (feature `record-webm`).
    Webm,
}

impl ContainerFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ContainerFormat::Mjpeg => "mjpeg",
            ContainerFormat::Webm => "webm",
        }
    }
}

/// What a factory needs to open a session file.
#[derive(Clone, Debug)]
pub struct SessionRequest<'a> {
    pub camera: &'a str,
    pub started_at: DateTime<Local>,
    pub width: u32,
    pub height: u32,
}

/// An open video file receiving frames.
pub trait VideoSink: Send {
    fn append(&mut self, frame: &Frame) -> DvrResult<()>;

    /// Append a frame whose JPEG encoding the caller already holds. Sinks that
    /// store JPEG write `jpeg` as is; the rest encode from `frame`.
    fn append_encoded(&mut self, frame: &Frame, jpeg: &[u8]) -> DvrResult<()> {
        let _ = jpeg;
        self.append(frame)
    }

    /// Flush and finalize the container.
    fn finish(self: Box<Self>) -> DvrResult<()>;

    fn path(&self) -> &Path;

    fn container(&self) -> ContainerFormat;
}

/// Opens video sinks for new recording sessions.
pub trait SessionFactory: Send + Sync {
    fn open(&self, request: &SessionRequest<'_>) -> DvrResult<Box<dyn VideoSink>>;
}

/// `<camera>_<YYYYmmdd_HHMMSS>.<ext>` with path-unsafe characters replaced.
pub fn recording_file_name(camera: &str, started_at: DateTime<Local>, extension: &str) -> String {
    format!(
        "{}_{}.{}",
        sanitize_camera_name(camera),
        started_at.format("%Y%m%d_%H%M%S"),
        extension
    )
}

pub fn sanitize_camera_name(camera: &str) -> String {
    camera
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect()
}

/// Create `dir/<name>`, appending `-1`, `-2`, ... to the stem when the file
/// already exists. Never truncates an existing recording.
pub(crate) fn create_unique(dir: &Path, file_name: &str) -> DvrResult<(File, PathBuf)> {
    fs::create_dir_all(dir).map_err(|e| DvrError::write("create recording dir", e))?;
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{}", ext)),
        None => (file_name.to_string(), String::new()),
    };
    for attempt in 0..100u32 {
        let candidate = if attempt == 0 {
            dir.join(file_name)
        } else {
            dir.join(format!("{}-{}{}", stem, attempt, ext))
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((file, candidate)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(DvrError::write("create recording file", e)),
        }
    }
    Err(DvrError::Write(format!(
        "no free file name for {} in {}",
        file_name,
        dir.display()
    )))
}

// ----------------------------------------------------------------------------
// MJPEG files
// ----------------------------------------------------------------------------

/// Writes each session as a `.mjpeg` file of back-to-back JPEG frames.
#[derive(Clone, Debug)]
pub struct MjpegSessionFactory {
    dir: PathBuf,
    quality: u8,
}

impl MjpegSessionFactory {
    pub fn new(dir: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            dir: dir.into(),
            quality,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SessionFactory for MjpegSessionFactory {
    fn open(&self, request: &SessionRequest<'_>) -> DvrResult<Box<dyn VideoSink>> {
        let name = recording_file_name(
            request.camera,
            request.started_at,
            ContainerFormat::Mjpeg.extension(),
        );
        let (file, path) = create_unique(&self.dir, &name)?;
        Ok(Box::new(MjpegSink {
            writer: BufWriter::new(file),
            path,
            quality: self.quality,
        }))
    }
}

struct MjpegSink {
    writer: BufWriter<File>,
    path: PathBuf,
    quality: u8,
}

impl MjpegSink {
    fn write_jpeg(&mut self, jpeg: &[u8]) -> DvrResult<()> {
        self.writer
            .write_all(jpeg)
            .and_then(|_| self.writer.flush())
            .map_err(|e| DvrError::write("append mjpeg frame", e))
    }
}

impl VideoSink for MjpegSink {
    fn append(&mut self, frame: &Frame) -> DvrResult<()> {
        let jpeg = codec::encode(frame, self.quality)?;
        self.write_jpeg(&jpeg)
    }

    fn append_encoded(&mut self, _frame: &Frame, jpeg: &[u8]) -> DvrResult<()> {
        self.write_jpeg(jpeg)
    }

    fn finish(mut self: Box<Self>) -> DvrResult<()> {
        self.writer
            .flush()
            .map_err(|e| DvrError::write("flush mjpeg file", e))?;
        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| DvrError::write("sync mjpeg file", e))
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn container(&self) -> ContainerFormat {
        ContainerFormat::Mjpeg
    }
}
