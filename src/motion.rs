//! Frame-difference motion detection.
//!
//! Per cycle: grayscale + gaussian blur the current frame, take the absolute
//! difference against the previous prepared frame, binary threshold, dilate,
//! then label connected regions. Motion is reported when any region's pixel
//! area exceeds the configured sensitivity (smaller = more sensitive).
//!
//! The first frame of a camera (or the first after a resolution change) has
//! nothing to compare against and never reports motion.

use std::time::{Duration, Instant};

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::frame::Frame;

pub const DEFAULT_SENSITIVITY: u32 = 5000;
pub const DEFAULT_PIXEL_THRESHOLD: u8 = 25;
pub const DEFAULT_BLUR_SIGMA: f32 = 3.5;
pub const DEFAULT_DILATE_RADIUS: u8 = 2;
pub const DEFAULT_SNAPSHOT_MIN_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq)]
pub struct MotionSettings {
    /// Minimum region area in pixels that counts as motion.
    pub sensitivity: u32,
    /// Per-pixel luma difference that marks a pixel as changed.
    pub pixel_threshold: u8,
    pub blur_sigma: f32,
    pub dilate_radius: u8,
    pub take_snapshot: bool,
    pub snapshot_min_interval: Duration,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            sensitivity: DEFAULT_SENSITIVITY,
            pixel_threshold: DEFAULT_PIXEL_THRESHOLD,
            blur_sigma: DEFAULT_BLUR_SIGMA,
            dilate_radius: DEFAULT_DILATE_RADIUS,
            take_snapshot: true,
            snapshot_min_interval: DEFAULT_SNAPSHOT_MIN_INTERVAL,
        }
    }
}

/// Per-camera motion state. Owned by the camera's runtime state.
#[derive(Default)]
pub struct MotionTracker {
    previous: Option<GrayImage>,
    last_motion: Option<Instant>,
    last_snapshot: Option<Instant>,
}

impl MotionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_motion(&self) -> Option<Instant> {
        self.last_motion
    }

    pub fn last_snapshot(&self) -> Option<Instant> {
        self.last_snapshot
    }

    /// Forget the reference frame, e.g. after the source reconnects.
    pub fn reset_reference(&mut self) {
        self.previous = None;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MotionObservation {
    pub motion: bool,
    pub largest_region: u32,
    pub snapshot_due: bool,
}

pub struct MotionDetector {
    settings: MotionSettings,
}

impl MotionDetector {
    pub fn new(settings: MotionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &MotionSettings {
        &self.settings
    }

    /// Grayscale and blur a frame into detector input.
    pub fn prepare(&self, frame: &Frame) -> GrayImage {
        let gray = frame.to_gray();
        if self.settings.blur_sigma > 0.0 {
            imageproc::filter::gaussian_blur_f32(&gray, self.settings.blur_sigma)
        } else {
            gray
        }
    }

    /// Area in pixels of the largest changed region between two prepared frames.
    pub fn largest_region(&self, previous: &GrayImage, current: &GrayImage) -> u32 {
        if previous.dimensions() != current.dimensions() {
            return 0;
        }
        let threshold = self.settings.pixel_threshold;
        let mut mask = GrayImage::new(current.width(), current.height());
        let mut any_changed = false;
        for ((out, prev), cur) in mask
            .pixels_mut()
            .zip(previous.pixels())
            .zip(current.pixels())
        {
            if prev.0[0].abs_diff(cur.0[0]) > threshold {
                *out = Luma([255]);
                any_changed = true;
            }
        }
        if !any_changed {
            return 0;
        }

        let mask = if self.settings.dilate_radius > 0 {
            imageproc::morphology::dilate(&mask, Norm::LInf, self.settings.dilate_radius)
        } else {
            mask
        };

        let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));
        let mut areas: Vec<u32> = Vec::new();
        for label in labels.pixels() {
            let id = label.0[0] as usize;
            if id == 0 {
                continue;
            }
            if areas.len() < id {
                areas.resize(id, 0);
            }
            areas[id - 1] += 1;
        }
        areas.into_iter().max().unwrap_or(0)
    }

    /// Feed one prepared frame through the tracker.
    ///
    /// Updates the reference frame, the last-motion timestamp and, when a
    /// snapshot is due, the last-snapshot timestamp.
    pub fn observe(
        &self,
        tracker: &mut MotionTracker,
        prepared: GrayImage,
        now: Instant,
    ) -> MotionObservation {
        let largest_region = match tracker.previous.as_ref() {
            Some(previous) => self.largest_region(previous, &prepared),
            None => 0,
        };
        tracker.previous = Some(prepared);

        let motion = largest_region > self.settings.sensitivity;
        let mut snapshot_due = false;
        if motion {
            tracker.last_motion = Some(now);
            let interval_elapsed = tracker.last_snapshot.map_or(true, |last| {
                now.saturating_duration_since(last) >= self.settings.snapshot_min_interval
            });
            if self.settings.take_snapshot && interval_elapsed {
                tracker.last_snapshot = Some(now);
                snapshot_due = true;
            }
        }

        MotionObservation {
            motion,
            largest_region,
            snapshot_due,
        }
    }
}
