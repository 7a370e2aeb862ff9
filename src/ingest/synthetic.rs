//! Synthetic source for `stub://` locators.
//!
//! `stub://<name>?motion_every=N&width=W&height=H&noise=K&fps=F`
//!
//! Frames are a flat background with a bright blob covering the middle ninth
//! of the frame that appears and disappears every `motion_every` frames (0
//! keeps the scene static). `noise` adds uniform per-pixel jitter of ±K.
//! Frames are paced at the configured fps.

use std::time::{Duration, Instant};

use rand::Rng;
use url::Url;

use crate::error::{DvrError, DvrResult};
use crate::frame::Frame;

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const BACKGROUND: [u8; 3] = [40, 40, 40];
const BLOB: [u8; 3] = [230, 230, 230];

pub fn is_stub(locator: &str) -> bool {
    locator.trim_start().starts_with("stub://")
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct SyntheticConfig {
    width: u32,
    height: u32,
    motion_every: u64,
    noise: u8,
    fps: Option<u32>,
}

impl SyntheticConfig {
    fn parse(locator: &str) -> DvrResult<Self> {
        let url = Url::parse(locator.trim())
            .map_err(|e| DvrError::Config(format!("bad stub locator '{}': {}", locator, e)))?;
        let mut config = Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            motion_every: 0,
            noise: 0,
            fps: None,
        };
        for (key, value) in url.query_pairs() {
            let bad = || DvrError::Config(format!("bad stub parameter {}={}", key, value));
            match key.as_ref() {
                "width" => config.width = value.parse().map_err(|_| bad())?,
                "height" => config.height = value.parse().map_err(|_| bad())?,
                "motion_every" => config.motion_every = value.parse().map_err(|_| bad())?,
                "noise" => config.noise = value.parse().map_err(|_| bad())?,
                "fps" => config.fps = Some(value.parse().map_err(|_| bad())?),
                _ => log::debug!("stub source: ignoring parameter {}", key),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(DvrError::Config(format!(
                "stub locator '{}' has zero dimensions",
                locator
            )));
        }
        Ok(config)
    }
}

pub struct SyntheticSource {
    locator: String,
    config: SyntheticConfig,
    interval: Duration,
    next_at: Option<Instant>,
    frame_count: u64,
    blob_visible: bool,
}

impl SyntheticSource {
    pub fn open(locator: &str, fps: u32) -> DvrResult<Self> {
        let config = SyntheticConfig::parse(locator)?;
        let fps = config.fps.unwrap_or(fps).max(1);
        log::info!("synthetic source {} ({}x{})", locator, config.width, config.height);
        Ok(Self {
            locator: locator.to_string(),
            config,
            interval: Duration::from_secs(1) / fps,
            next_at: None,
            frame_count: 0,
            blob_visible: false,
        })
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    pub fn next_frame(&mut self) -> DvrResult<Frame> {
        if let Some(at) = self.next_at {
            let now = Instant::now();
            if at > now {
                std::thread::sleep(at - now);
            }
        }
        self.next_at = Some(Instant::now() + self.interval);

        if self.config.motion_every > 0
            && self.frame_count > 0
            && self.frame_count % self.config.motion_every == 0
        {
            self.blob_visible = !self.blob_visible;
        }
        self.frame_count += 1;
        Ok(self.render())
    }

    fn render(&self) -> Frame {
        let (w, h) = (self.config.width, self.config.height);
        let mut frame = Frame::filled(w, h, BACKGROUND);
        if self.blob_visible {
            frame.fill_rect(w / 3, h / 3, w / 3, h / 3, BLOB);
        }
        if self.config.noise > 0 {
            let k = self.config.noise as i16;
            let mut rng = rand::thread_rng();
            for px in frame.image_mut().pixels_mut() {
                let jitter = rng.gen_range(-k..=k);
                for c in px.0.iter_mut() {
                    *c = (*c as i16 + jitter).clamp(0, 255) as u8;
                }
            }
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_parameters() {
        let config =
            SyntheticConfig::parse("stub://yard?motion_every=5&width=64&height=48&noise=3").unwrap();
        assert_eq!(
            config,
            SyntheticConfig {
                width: 64,
                height: 48,
                motion_every: 5,
                noise: 3,
                fps: None,
            }
        );
        assert!(SyntheticConfig::parse("stub://yard?width=abc").is_err());
        assert!(SyntheticConfig::parse("stub://yard?width=0").is_err());
    }

    #[test]
    fn blob_toggles_every_n_frames() {
        let mut source = SyntheticSource::open("stub://t?motion_every=3&width=30&height=30&fps=1000", 20).unwrap();
        let centre = |f: &Frame| f.image().get_pixel(15, 15).0[0];
        let seen: Vec<u8> = (0..9).map(|_| centre(&source.next_frame().unwrap())).collect();
        assert_eq!(
            seen,
            vec![40, 40, 40, 230, 230, 230, 40, 40, 40]
        );
        assert_eq!(source.frames_captured(), 9);
    }

    #[test]
    fn static_scene_never_changes() {
        let mut source = SyntheticSource::open("stub://t?width=16&height=16&fps=1000", 20).unwrap();
        let a = source.next_frame().unwrap();
        let b = source.next_frame().unwrap();
        assert_eq!(a.as_rgb(), b.as_rgb());
    }
}
