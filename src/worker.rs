//! Ingestion Worker: one supervised thread per camera.
//!
//! ```text
//!   ┌────────────► acquire source ──(fail)──► backoff ──┐
//!   │                    │                              │
//!   │                 frames                            │
//!   │                    ▼                              │
//!   │   prepare → overlay → motion → record → encode → publish
//!   │                    │
//!   │            (EOF / read error)
//!   │                    ▼
//!   └──── backoff ◄── release source, close session
//! ```
//!
//! All per-camera mutable state lives in `CameraRuntimeState`, owned by the
//! worker thread. The only things shared with other threads are the cache
//! slot, the stop token and the read-only stats counters.

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crate::cache::{FrameCache, FrameSlot};
use crate::camera::CameraConfig;
use crate::codec::{self, DEFAULT_JPEG_QUALITY};
use crate::error::DvrError;
use crate::frame::Frame;
use crate::ingest::{FrameSource, IngestSettings};
use crate::motion::{MotionDetector, MotionSettings, MotionTracker};
use crate::overlay;
use crate::recording::{RecordingController, RecordingPolicy, SessionFactory};
use crate::shutdown::StopToken;
use crate::storage::SnapshotSink;

/// Everything a worker needs to know about how to process frames.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    pub jpeg_quality: u8,
    pub overlay_timestamp: bool,
    pub motion: MotionSettings,
    pub recording: RecordingPolicy,
    pub ingest: IngestSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            overlay_timestamp: true,
            motion: MotionSettings::default(),
            recording: RecordingPolicy::default(),
            ingest: IngestSettings::default(),
        }
    }
}

/// Shared collaborators handed to every worker.
#[derive(Clone)]
pub struct PipelineContext {
    pub settings: Arc<PipelineSettings>,
    pub cache: Arc<FrameCache>,
    pub sessions: Arc<dyn SessionFactory>,
    pub snapshots: Arc<dyn SnapshotSink>,
}

/// Counters a worker exposes for health reporting.
#[derive(Debug, Default)]
pub struct WorkerStats {
    frames: AtomicU64,
    recordings: AtomicU64,
    connected: AtomicBool,
    recording: AtomicBool,
}

impl WorkerStats {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn recordings_started(&self) -> u64 {
        self.recordings.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }
}

pub struct WorkerHandle {
    camera: CameraConfig,
    stop: StopToken,
    stats: Arc<WorkerStats>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn camera(&self) -> &CameraConfig {
        &self.camera
    }

    pub fn name(&self) -> &str {
        &self.camera.name
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |j| j.is_finished())
    }

    /// Ask the worker to stop without waiting for it.
    pub fn signal_stop(&self) {
        self.stop.stop();
    }

    /// Stop and wait. Latency is bounded by the source's current I/O timeout.
    pub fn stop(mut self) -> Result<()> {
        self.stop.stop();
        self.join_thread()
    }

    fn join_thread(&mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("camera worker {} panicked", self.camera.name))?;
        }
        Ok(())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop.stop();
        if let Err(e) = self.join_thread() {
            log::error!("{}", e);
        }
    }
}

pub fn spawn_worker(camera: CameraConfig, ctx: PipelineContext) -> Result<WorkerHandle> {
    let stop = StopToken::new();
    let stats = Arc::new(WorkerStats::default());
    let thread_name = camera.name.clone();
    let join = {
        let camera = camera.clone();
        let stop = stop.clone();
        let stats = stats.clone();
        std::thread::Builder::new()
            .name(format!("camera-{}", thread_name))
            .spawn(move || run_worker(camera, ctx, stop, stats))
            .with_context(|| format!("spawn worker for {}", thread_name))?
    };
    Ok(WorkerHandle {
        camera,
        stop,
        stats,
        join: Some(join),
    })
}

/// Per-camera state, owned by the worker thread only.
struct CameraRuntimeState {
    tracker: MotionTracker,
    recorder: RecordingController,
}

enum CycleEnd {
    Stopped,
    Ended,
    Failed(DvrError),
}

fn run_worker(camera: CameraConfig, ctx: PipelineContext, stop: StopToken, stats: Arc<WorkerStats>) {
    let settings = ctx.settings.clone();
    let backoff = settings.ingest.reconnect_backoff;
    let detector = MotionDetector::new(settings.motion.clone());
    let slot = ctx.cache.slot(&camera.name);
    let mut state = CameraRuntimeState {
        tracker: MotionTracker::new(),
        recorder: RecordingController::new(camera.name.clone(), ctx.sessions.clone())
            .with_failure_backoff(backoff),
    };
    log::info!("camera {}: worker started ({})", camera.name, camera.source.kind());

    while !stop.is_stopped() {
        let mut source = match FrameSource::open(&camera.source, &settings.ingest) {
            Ok(source) => source,
            Err(e) => {
                log::warn!("camera {}: {}; retrying in {:?}", camera.name, e, backoff);
                if stop.wait_timeout(backoff) {
                    break;
                }
                continue;
            }
        };
        log::info!("camera {}: connected to {}", camera.name, source.describe());
        stats.connected.store(true, Ordering::Relaxed);
        state.tracker.reset_reference();

        let end = loop {
            if stop.is_stopped() {
                break CycleEnd::Stopped;
            }
            match source.next_frame() {
                Ok(Some(frame)) => {
                    process_frame(&camera.name, frame, &detector, &mut state, &ctx, &slot, &stats)
                }
                Ok(None) => break CycleEnd::Ended,
                Err(e) if e.is_frame_local() => {
                    log::debug!("camera {}: skipped frame: {}", camera.name, e)
                }
                Err(e) => break CycleEnd::Failed(e),
            }
        };

        drop(source);
        stats.connected.store(false, Ordering::Relaxed);
        state.recorder.stop();
        stats.recording.store(false, Ordering::Relaxed);

        match end {
            CycleEnd::Stopped => break,
            CycleEnd::Ended => log::info!("camera {}: source closed", camera.name),
            CycleEnd::Failed(e) => log::warn!("camera {}: source lost: {}", camera.name, e),
        }
        if stop.wait_timeout(backoff) {
            break;
        }
    }

    state.recorder.stop();
    log::info!("camera {}: worker stopped", camera.name);
}

fn process_frame(
    camera: &str,
    mut frame: Frame,
    detector: &MotionDetector,
    state: &mut CameraRuntimeState,
    ctx: &PipelineContext,
    slot: &FrameSlot,
    stats: &WorkerStats,
) {
    let now = Instant::now();
    let wall = Local::now();
    let settings = &ctx.settings;

    // Motion runs on the clean frame so the ticking clock is never "motion".
    let prepared = detector.prepare(&frame);
    if settings.overlay_timestamp {
        overlay::stamp(&mut frame, wall);
    }
    let observation = detector.observe(&mut state.tracker, prepared, now);

    let should_record = settings.recording.should_record(
        observation.motion,
        state.tracker.last_motion(),
        now,
        wall.naive_local(),
    );
    // One encode serves the recording, the snapshot and the cache.
    let encoded = match codec::encode(&frame, settings.jpeg_quality) {
        Ok(jpeg) => Some(jpeg),
        Err(e) => {
            log::debug!("camera {}: frame not published: {}", camera, e);
            None
        }
    };

    let was_recording = state.recorder.is_recording();
    match &encoded {
        Some(jpeg) => state.recorder.step_encoded(should_record, &frame, jpeg, wall),
        None => state.recorder.step(should_record, &frame, wall),
    };
    let recording = state.recorder.is_recording();
    if recording && !was_recording {
        stats.recordings.fetch_add(1, Ordering::Relaxed);
    }
    stats.recording.store(recording, Ordering::Relaxed);

    let Some(jpeg) = encoded else {
        return;
    };
    if observation.snapshot_due {
        if let Err(e) = ctx.snapshots.save(camera, wall, &jpeg) {
            log::warn!("camera {}: snapshot failed: {}", camera, e);
        }
    }
    slot.publish(Arc::new(jpeg));
    stats.frames.fetch_add(1, Ordering::Relaxed);
}
