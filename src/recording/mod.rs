//! Recording controller.
//!
//! Each camera owns one `RecordingController`, a two-state machine:
//!
//! ```text
//!            should_record && no session
//!   Idle  ───────────────────────────────▶  Recording
//!         ◀───────────────────────────────
//!            !should_record  (session finalized)
//! ```
//!
//! The recording flag is the state itself: a camera is recording iff it holds
//! an open session. The "should record" predicate lives in `RecordingPolicy`
//! and debounces motion with a post-motion hold, so one motion burst yields one
//! contiguous recording.

pub mod sink;
#[cfg(feature = "record-webm")]
pub mod webm;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Local, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{DvrError, DvrResult};
use crate::frame::Frame;

pub use sink::{
    recording_file_name, sanitize_camera_name, ContainerFormat, MjpegSessionFactory,
    SessionFactory, SessionRequest, VideoSink,
};
#[cfg(feature = "record-webm")]
pub use webm::WebmSessionFactory;

pub const DEFAULT_POST_MOTION_HOLD: Duration = Duration::from_secs(10);
/// How long a failed session keeps the controller from opening another one.
pub const DEFAULT_FAILURE_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    Continuous,
    Motion,
}

impl std::str::FromStr for RecordingMode {
    type Err = DvrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continuous" => Ok(RecordingMode::Continuous),
            "motion" => Ok(RecordingMode::Motion),
            other => Err(DvrError::Config(format!(
                "unknown recording mode '{}'; expected continuous or motion",
                other
            ))),
        }
    }
}

// ----------------------------------------------------------------------------
// Schedules
// ----------------------------------------------------------------------------

/// Weekly recording window. Days are numbered from Monday = 0.
///
/// A window whose end is earlier than its start runs past midnight into the
/// following day.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleWindow {
    days: Vec<u8>,
    start: NaiveTime,
    end: NaiveTime,
}

impl ScheduleWindow {
    pub fn new(days: Vec<u8>, start: &str, end: &str) -> DvrResult<Self> {
        if let Some(day) = days.iter().find(|d| **d > 6) {
            return Err(DvrError::Config(format!(
                "schedule day {} out of range 0..=6",
                day
            )));
        }
        Ok(Self {
            days,
            start: parse_hhmm(start)?,
            end: parse_hhmm(end)?,
        })
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        let day = at.weekday().num_days_from_monday() as u8;
        let time = at.time();
        if self.start <= self.end {
            self.days.contains(&day) && self.start <= time && time < self.end
        } else {
            let previous_day = (day + 6) % 7;
            (self.days.contains(&day) && time >= self.start)
                || (self.days.contains(&previous_day) && time < self.end)
        }
    }
}

fn parse_hhmm(value: &str) -> DvrResult<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| DvrError::Config(format!("schedule time '{}' is not HH:MM", value)))
}

// ----------------------------------------------------------------------------
// Policy
// ----------------------------------------------------------------------------

/// The "should record" predicate, evaluated once per processed frame.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordingPolicy {
    pub auto_recording: bool,
    pub mode: RecordingMode,
    pub use_schedules: bool,
    pub schedules: Vec<ScheduleWindow>,
    pub post_motion_hold: Duration,
}

impl Default for RecordingPolicy {
    fn default() -> Self {
        Self {
            auto_recording: true,
            mode: RecordingMode::Motion,
            use_schedules: false,
            schedules: Vec::new(),
            post_motion_hold: DEFAULT_POST_MOTION_HOLD,
        }
    }
}

impl RecordingPolicy {
    /// With schedules enabled the current time must fall in a window; with
    /// schedules disabled auto-recording must be on. Inside that gate,
    /// continuous mode always records and motion mode records while motion is
    /// present or within the post-motion hold.
    pub fn should_record(
        &self,
        motion: bool,
        last_motion: Option<Instant>,
        now: Instant,
        wall: NaiveDateTime,
    ) -> bool {
        let gate_open = if self.use_schedules {
            self.schedules.iter().any(|window| window.contains(wall))
        } else {
            self.auto_recording
        };
        if !gate_open {
            return false;
        }
        match self.mode {
            RecordingMode::Continuous => true,
            RecordingMode::Motion => {
                motion
                    || last_motion.is_some_and(|last| {
                        now.saturating_duration_since(last) < self.post_motion_hold
                    })
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Controller
// ----------------------------------------------------------------------------

/// Outcome of one controller step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingEvent {
    Idle,
    Started,
    Continued,
    Stopped,
    /// A write error closed (or prevented) the session.
    Failed,
}

/// Metadata of the open session.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub path: PathBuf,
    pub container: ContainerFormat,
    pub started_at: DateTime<Local>,
    pub frames: u64,
}

struct RecordingSession {
    sink: Box<dyn VideoSink>,
    started_at: DateTime<Local>,
    frames: u64,
}

enum RecordingState {
    Idle,
    Recording(RecordingSession),
}

pub struct RecordingController {
    camera: String,
    sessions: Arc<dyn SessionFactory>,
    state: RecordingState,
    completed: u64,
    failure_backoff: Duration,
    /// Set after an open or write failure; cleared once the predicate drops.
    retry_after: Option<Instant>,
}

impl RecordingController {
    pub fn new(camera: impl Into<String>, sessions: Arc<dyn SessionFactory>) -> Self {
        Self {
            camera: camera.into(),
            sessions,
            state: RecordingState::Idle,
            completed: 0,
            failure_backoff: DEFAULT_FAILURE_BACKOFF,
            retry_after: None,
        }
    }

    pub fn with_failure_backoff(mut self, backoff: Duration) -> Self {
        self.failure_backoff = backoff;
        self
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, RecordingState::Recording(_))
    }

    /// Number of sessions closed so far.
    pub fn completed_sessions(&self) -> u64 {
        self.completed
    }

    pub fn session(&self) -> Option<SessionInfo> {
        match &self.state {
            RecordingState::Idle => None,
            RecordingState::Recording(session) => Some(SessionInfo {
                path: session.sink.path().to_path_buf(),
                container: session.sink.container(),
                started_at: session.started_at,
                frames: session.frames,
            }),
        }
    }

    /// Drive the state machine with this cycle's predicate value. While
    /// recording, `frame` is appended before the call returns.
    ///
    /// After a failed session no new one is opened until the failure backoff
    /// has passed or the predicate has gone false at least once.
    pub fn step(
        &mut self,
        should_record: bool,
        frame: &Frame,
        wall: DateTime<Local>,
    ) -> RecordingEvent {
        self.advance(should_record, frame, None, wall)
    }

    /// Like [`step`](Self::step), with `jpeg` holding `frame` already encoded
    /// so sinks that store JPEG can skip a second encode.
    pub fn step_encoded(
        &mut self,
        should_record: bool,
        frame: &Frame,
        jpeg: &[u8],
        wall: DateTime<Local>,
    ) -> RecordingEvent {
        self.advance(should_record, frame, Some(jpeg), wall)
    }

    fn advance(
        &mut self,
        should_record: bool,
        frame: &Frame,
        jpeg: Option<&[u8]>,
        wall: DateTime<Local>,
    ) -> RecordingEvent {
        if !should_record {
            self.retry_after = None;
        }
        match (should_record, self.is_recording()) {
            (false, false) => RecordingEvent::Idle,
            (false, true) => {
                self.stop();
                RecordingEvent::Stopped
            }
            (true, false) if self.held_off() => RecordingEvent::Idle,
            (true, false) => {
                let request = SessionRequest {
                    camera: &self.camera,
                    started_at: wall,
                    width: frame.width(),
                    height: frame.height(),
                };
                match self.sessions.open(&request) {
                    Ok(sink) => {
                        log::info!(
                            "camera {}: recording started {}",
                            self.camera,
                            sink.path().display()
                        );
                        self.state = RecordingState::Recording(RecordingSession {
                            sink,
                            started_at: wall,
                            frames: 0,
                        });
                        if self.append(frame, jpeg) {
                            RecordingEvent::Started
                        } else {
                            RecordingEvent::Failed
                        }
                    }
                    Err(e) => {
                        log::warn!("camera {}: cannot open recording: {}", self.camera, e);
                        self.hold_off();
                        RecordingEvent::Failed
                    }
                }
            }
            (true, true) => {
                if self.append(frame, jpeg) {
                    RecordingEvent::Continued
                } else {
                    RecordingEvent::Failed
                }
            }
        }
    }

    /// Close the open session, if any. Returns the finalized file path.
    pub fn stop(&mut self) -> Option<PathBuf> {
        let RecordingState::Recording(session) =
            std::mem::replace(&mut self.state, RecordingState::Idle)
        else {
            return None;
        };
        let path = session.sink.path().to_path_buf();
        let frames = session.frames;
        self.completed += 1;
        match session.sink.finish() {
            Ok(()) => log::info!(
                "camera {}: recording stopped {} ({} frames)",
                self.camera,
                path.display(),
                frames
            ),
            Err(e) => log::warn!(
                "camera {}: recording {} not finalized cleanly: {}",
                self.camera,
                path.display(),
                e
            ),
        }
        Some(path)
    }

    /// Append to the open session. A write failure closes the session and
    /// drops to idle; an encode failure only skips the frame.
    fn append(&mut self, frame: &Frame, jpeg: Option<&[u8]>) -> bool {
        let RecordingState::Recording(session) = &mut self.state else {
            return false;
        };
        let appended = match jpeg {
            Some(jpeg) => session.sink.append_encoded(frame, jpeg),
            None => session.sink.append(frame),
        };
        match appended {
            Ok(()) => {
                session.frames += 1;
                true
            }
            Err(e) if e.is_frame_local() => {
                log::debug!("camera {}: frame not recorded: {}", self.camera, e);
                true
            }
            Err(e) => {
                log::warn!(
                    "camera {}: recording write failed: {}; not reopening for {:?}",
                    self.camera,
                    e,
                    self.failure_backoff
                );
                self.stop();
                self.hold_off();
                false
            }
        }
    }

    fn hold_off(&mut self) {
        self.retry_after = Some(Instant::now() + self.failure_backoff);
    }

    fn held_off(&self) -> bool {
        self.retry_after.is_some_and(|at| Instant::now() < at)
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Log {
        opened: Vec<u64>,
        appended: Vec<u64>,
        closed: u64,
    }

    /// Session factory recording what happens to its sinks, stamping each
    /// frame with its red channel as a sequence number.
    #[derive(Default, Clone)]
    struct MemoryFactory {
        log: Arc<Mutex<Log>>,
        fail_writes: bool,
    }

    struct MemorySink {
        log: Arc<Mutex<Log>>,
        path: PathBuf,
        fail_writes: bool,
    }

    impl SessionFactory for MemoryFactory {
        fn open(&self, request: &SessionRequest<'_>) -> DvrResult<Box<dyn VideoSink>> {
            self.log
                .lock()
                .unwrap()
                .opened
                .push(request.started_at.timestamp() as u64);
            Ok(Box::new(MemorySink {
                log: self.log.clone(),
                path: PathBuf::from(format!("{}.mem", request.camera)),
                fail_writes: self.fail_writes,
            }))
        }
    }

    impl VideoSink for MemorySink {
        fn append(&mut self, frame: &Frame) -> DvrResult<()> {
            if self.fail_writes {
                return Err(DvrError::Write("disk full".into()));
            }
            let seq = frame.image().get_pixel(0, 0).0[0] as u64;
            self.log.lock().unwrap().appended.push(seq);
            Ok(())
        }

        fn finish(self: Box<Self>) -> DvrResult<()> {
            self.log.lock().unwrap().closed += 1;
            Ok(())
        }

        fn path(&self) -> &Path {
            &self.path
        }

        fn container(&self) -> ContainerFormat {
            ContainerFormat::Mjpeg
        }
    }

    fn wall() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn seq_frame(seq: u8) -> Frame {
        Frame::filled(4, 4, [seq, 0, 0])
    }

    #[test]
    fn motion_mode_without_motion_never_records() {
        let factory = MemoryFactory::default();
        let mut ctl = RecordingController::new("cam", Arc::new(factory.clone()));
        let policy = RecordingPolicy::default();
        let t0 = Instant::now();
        for i in 0..50u8 {
            let now = t0 + Duration::from_millis(100 * i as u64);
            let record = policy.should_record(false, None, now, wall());
            let event = ctl.step(record, &seq_frame(i), Local::now());
            assert_eq!(event, RecordingEvent::Idle);
        }
        assert!(factory.log.lock().unwrap().opened.is_empty());
        assert!(!ctl.is_recording());
    }

    #[test]
    fn single_motion_event_yields_one_contiguous_envelope() {
        let factory = MemoryFactory::default();
        let mut ctl = RecordingController::new("cam", Arc::new(factory.clone()));
        let policy = RecordingPolicy {
            post_motion_hold: Duration::from_secs(2),
            ..RecordingPolicy::default()
        };

        let t0 = Instant::now();
        let step = Duration::from_millis(100);
        let motion_at = 10u8;
        let mut last_motion = None;
        let mut started = None;
        let mut stopped = None;

        for i in 0..60u8 {
            let now = t0 + step * i as u32;
            let motion = i == motion_at;
            if motion {
                last_motion = Some(now);
            }
            let record = policy.should_record(motion, last_motion, now, wall());
            match ctl.step(record, &seq_frame(i), Local::now()) {
                RecordingEvent::Started => started = Some(i),
                RecordingEvent::Stopped => stopped = Some(i),
                _ => {}
            }
        }

        let log = factory.log.lock().unwrap();
        assert_eq!(log.opened.len(), 1, "exactly one session");
        assert_eq!(log.closed, 1);
        assert_eq!(started, Some(motion_at));
        // Hold of 2s at 100ms cycles: frames 10..=29 are inside [T, T+D).
        assert_eq!(stopped, Some(motion_at + 20));
        let expected: Vec<u64> = (10..30).collect();
        assert_eq!(log.appended, expected);
    }

    #[test]
    fn continuous_mode_records_without_motion() {
        let policy = RecordingPolicy {
            mode: RecordingMode::Continuous,
            ..RecordingPolicy::default()
        };
        assert!(policy.should_record(false, None, Instant::now(), wall()));
    }

    #[test]
    fn auto_recording_off_blocks_everything_without_schedules() {
        let policy = RecordingPolicy {
            auto_recording: false,
            mode: RecordingMode::Continuous,
            ..RecordingPolicy::default()
        };
        assert!(!policy.should_record(true, None, Instant::now(), wall()));
    }

    #[test]
    fn schedules_gate_recording_regardless_of_auto_recording() {
        // 2024-01-01 is a Monday.
        let policy = RecordingPolicy {
            auto_recording: false,
            mode: RecordingMode::Continuous,
            use_schedules: true,
            schedules: vec![ScheduleWindow::new(vec![0], "08:00", "18:00").unwrap()],
            ..RecordingPolicy::default()
        };
        let now = Instant::now();
        assert!(policy.should_record(false, None, now, wall()));

        let evening = wall().date().and_hms_opt(18, 0, 0).unwrap();
        assert!(!policy.should_record(false, None, now, evening));

        let tuesday = wall() + chrono::Duration::days(1);
        assert!(!policy.should_record(false, None, now, tuesday));
    }

    #[test]
    fn overnight_window_spans_midnight() {
        let window = ScheduleWindow::new(vec![4], "22:00", "06:00").unwrap();
        // 2024-01-05 is a Friday.
        let friday_late = NaiveDate::from_ymd_opt(2024, 1, 5)
            .unwrap()
            .and_hms_opt(23, 30, 0)
            .unwrap();
        let saturday_early = friday_late + chrono::Duration::hours(5);
        let saturday_late = friday_late + chrono::Duration::days(1);
        assert!(window.contains(friday_late));
        assert!(window.contains(saturday_early));
        assert!(!window.contains(saturday_late));
    }

    #[test]
    fn schedule_rejects_bad_input() {
        assert!(ScheduleWindow::new(vec![7], "08:00", "09:00").is_err());
        assert!(ScheduleWindow::new(vec![0], "8am", "09:00").is_err());
    }

    #[test]
    fn write_failure_drops_to_idle() {
        let factory = MemoryFactory {
            fail_writes: true,
            ..MemoryFactory::default()
        };
        let mut ctl = RecordingController::new("cam", Arc::new(factory.clone()));
        let at = Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(ctl.step(true, &seq_frame(1), at), RecordingEvent::Failed);
        assert!(!ctl.is_recording());
        assert_eq!(factory.log.lock().unwrap().closed, 1);
    }

    #[test]
    fn persistent_write_failure_does_not_reopen_every_frame() {
        let factory = MemoryFactory {
            fail_writes: true,
            ..MemoryFactory::default()
        };
        let mut ctl = RecordingController::new("cam", Arc::new(factory.clone()));
        let mut failed = 0;
        for i in 0..20u8 {
            match ctl.step(true, &seq_frame(i), Local::now()) {
                RecordingEvent::Failed => failed += 1,
                event => assert_eq!(event, RecordingEvent::Idle),
            }
        }
        assert_eq!(failed, 1);
        assert_eq!(factory.log.lock().unwrap().opened.len(), 1);

        // The predicate dropping clears the hold-off.
        assert_eq!(ctl.step(false, &seq_frame(20), Local::now()), RecordingEvent::Idle);
        assert_eq!(ctl.step(true, &seq_frame(21), Local::now()), RecordingEvent::Failed);
        assert_eq!(factory.log.lock().unwrap().opened.len(), 2);
    }

    #[test]
    fn failed_session_reopens_after_backoff() {
        let factory = MemoryFactory {
            fail_writes: true,
            ..MemoryFactory::default()
        };
        let mut ctl = RecordingController::new("cam", Arc::new(factory.clone()))
            .with_failure_backoff(Duration::from_millis(50));
        assert_eq!(ctl.step(true, &seq_frame(1), Local::now()), RecordingEvent::Failed);
        assert_eq!(ctl.step(true, &seq_frame(2), Local::now()), RecordingEvent::Idle);
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(ctl.step(true, &seq_frame(3), Local::now()), RecordingEvent::Failed);
        assert_eq!(factory.log.lock().unwrap().opened.len(), 2);
    }

    #[test]
    fn encoded_frames_reach_the_sink() {
        let factory = MemoryFactory::default();
        let mut ctl = RecordingController::new("cam", Arc::new(factory.clone()));
        let at = Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(
            ctl.step_encoded(true, &seq_frame(7), b"jpeg", at),
            RecordingEvent::Started
        );
        assert_eq!(
            ctl.step_encoded(true, &seq_frame(8), b"jpeg", at),
            RecordingEvent::Continued
        );
        assert_eq!(ctl.session().unwrap().frames, 2);
        assert_eq!(factory.log.lock().unwrap().appended, vec![7, 8]);
    }

    #[test]
    fn drop_closes_open_session() {
        let factory = MemoryFactory::default();
        {
            let mut ctl = RecordingController::new("cam", Arc::new(factory.clone()));
            ctl.step(true, &seq_frame(1), Local::now());
            assert!(ctl.is_recording());
            assert!(ctl.session().is_some());
        }
        assert_eq!(factory.log.lock().unwrap().closed, 1);
    }

    #[test]
    fn recording_mode_parses() {
        assert_eq!("Motion".parse::<RecordingMode>().unwrap(), RecordingMode::Motion);
        assert_eq!(
            "continuous".parse::<RecordingMode>().unwrap(),
            RecordingMode::Continuous
        );
        assert!("sometimes".parse::<RecordingMode>().is_err());
    }
}
