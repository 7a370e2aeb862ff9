//! Live view adapter over the Frame Cache.
//!
//! Yields `multipart/x-mixed-replace` parts at a fixed cadence for the
//! presentation layer to stream. The feed never waits for a new frame; when
//! the camera publishes slower than the poll rate the same frame repeats.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::FrameCache;
use crate::shutdown::StopToken;

pub const MULTIPART_BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// One multipart part wrapping a JPEG.
pub fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\n\r\n",
        MULTIPART_BOUNDARY
    );
    let mut out = Vec::with_capacity(header.len() + jpeg.len() + 2);
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(jpeg);
    out.extend_from_slice(b"\r\n");
    out
}

pub struct LiveFeed {
    cache: Arc<FrameCache>,
    camera: String,
    interval: Duration,
    stop: StopToken,
    next_at: Option<Instant>,
}

impl LiveFeed {
    pub fn new(cache: Arc<FrameCache>, camera: impl Into<String>, fps: u32, stop: StopToken) -> Self {
        Self {
            cache,
            camera: camera.into(),
            interval: Duration::from_secs(1) / fps.max(1),
            stop,
            next_at: None,
        }
    }
}

impl Iterator for LiveFeed {
    type Item = Vec<u8>;

    /// Ends only when the stop token fires.
    fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            if let Some(at) = self.next_at {
                let wait = at.saturating_duration_since(Instant::now());
                if self.stop.wait_timeout(wait) {
                    return None;
                }
            } else if self.stop.is_stopped() {
                return None;
            }
            self.next_at = Some(Instant::now() + self.interval);
            if let Some(jpeg) = self.cache.read(&self.camera) {
                return Some(multipart_chunk(&jpeg));
            }
        }
    }
}
