use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::camera::{CameraConfig, DEFAULT_VIDEO_PORT};
use crate::discovery::{Ipv4Subnet, ScanSettings, DEFAULT_DISCOVERY_PORT};
use crate::ingest::IngestSettings;
use crate::motion::MotionSettings;
use crate::recording::{RecordingMode, RecordingPolicy, ScheduleWindow};
use crate::registry::parse_camera_entries;
use crate::storage::RetentionPolicy;
use crate::wire::DEFAULT_MAX_FRAME_BYTES;
use crate::worker::PipelineSettings;

const DEFAULT_FPS: u32 = 20;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_RECORDINGS_DIR: &str = "recordings";
const DEFAULT_SNAPSHOTS_DIR: &str = "snapshots";
const DEFAULT_REGISTRY_PATH: &str = "cameras.json";
const DEFAULT_POST_MOTION_HOLD_SECS: u64 = 10;
const DEFAULT_SENSITIVITY: u32 = 5000;
const DEFAULT_PIXEL_THRESHOLD: u8 = 25;
const DEFAULT_BLUR_SIGMA: f32 = 3.5;
const DEFAULT_DILATE_RADIUS: u8 = 2;
const DEFAULT_SNAPSHOT_MIN_INTERVAL_SECS: u64 = 5;
const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 5_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;
const DEFAULT_SCAN_CONNECT_TIMEOUT_MS: u64 = 300;
const DEFAULT_PREFIX_LEN: u8 = 24;
const DEFAULT_RETENTION_SECS: u64 = 60 * 60 * 24 * 7;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 600;

#[derive(Debug, Deserialize, Default)]
struct DvrConfigFile {
    fps: Option<u32>,
    jpeg_quality: Option<u8>,
    overlay_timestamp: Option<bool>,
    recordings_dir: Option<PathBuf>,
    snapshots_dir: Option<PathBuf>,
    registry_path: Option<PathBuf>,
    recording: Option<RecordingConfigFile>,
    motion: Option<MotionConfigFile>,
    ingest: Option<IngestConfigFile>,
    discovery: Option<DiscoveryConfigFile>,
    retention: Option<RetentionConfigFile>,
    cameras: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize, Default)]
struct RecordingConfigFile {
    auto_recording: Option<bool>,
    mode: Option<String>,
    use_schedules: Option<bool>,
    schedules: Option<Vec<ScheduleConfigFile>>,
    post_motion_hold_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ScheduleConfigFile {
    days: Vec<u8>,
    start: String,
    end: String,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    sensitivity: Option<u32>,
    pixel_threshold: Option<u8>,
    blur_sigma: Option<f32>,
    dilate_radius: Option<u8>,
    take_snapshot: Option<bool>,
    snapshot_min_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct IngestConfigFile {
    reconnect_backoff_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    max_frame_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DiscoveryConfigFile {
    scan_enabled: Option<bool>,
    listener_enabled: Option<bool>,
    discovery_port: Option<u16>,
    video_port: Option<u16>,
    scan_interval_secs: Option<u64>,
    connect_timeout_ms: Option<u64>,
    subnet: Option<String>,
    prefix_len: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct RetentionConfigFile {
    enabled: Option<bool>,
    max_age_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DvrConfig {
    pub fps: u32,
    pub jpeg_quality: u8,
    pub overlay_timestamp: bool,
    pub recordings_dir: PathBuf,
    pub snapshots_dir: PathBuf,
    pub registry_path: PathBuf,
    pub recording: RecordingPolicy,
    pub motion: MotionSettings,
    pub ingest: IngestTimings,
    pub discovery: DiscoverySettings,
    pub retention: RetentionSettings,
    pub cameras: Vec<CameraConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestTimings {
    pub reconnect_backoff: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySettings {
    pub scan_enabled: bool,
    pub listener_enabled: bool,
    pub discovery_port: u16,
    pub video_port: u16,
    pub scan_interval: Duration,
    pub connect_timeout: Duration,
    pub subnet: Option<Ipv4Subnet>,
    pub prefix_len: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionSettings {
    pub enabled: bool,
    pub max_age: Duration,
    pub sweep_interval: Duration,
}

impl DvrConfig {
    /// Load from the file named by `DVR_CONFIG` (defaults when unset), then
    /// apply environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DVR_CONFIG").ok().filter(|p| !p.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => DvrConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DvrConfigFile) -> Result<Self> {
        let recording_file = file.recording.unwrap_or_default();
        let mode = match recording_file.mode.as_deref() {
            Some(mode) => mode.parse::<RecordingMode>()?,
            None => RecordingMode::Motion,
        };
        let schedules = recording_file
            .schedules
            .unwrap_or_default()
            .into_iter()
            .map(|s| ScheduleWindow::new(s.days, &s.start, &s.end))
            .collect::<Result<Vec<_>, _>>()?;
        let recording = RecordingPolicy {
            auto_recording: recording_file.auto_recording.unwrap_or(true),
            mode,
            use_schedules: recording_file.use_schedules.unwrap_or(false),
            schedules,
            post_motion_hold: Duration::from_secs(
                recording_file
                    .post_motion_hold_secs
                    .unwrap_or(DEFAULT_POST_MOTION_HOLD_SECS),
            ),
        };

        let motion_file = file.motion.unwrap_or_default();
        let motion = MotionSettings {
            sensitivity: motion_file.sensitivity.unwrap_or(DEFAULT_SENSITIVITY),
            pixel_threshold: motion_file.pixel_threshold.unwrap_or(DEFAULT_PIXEL_THRESHOLD),
            blur_sigma: motion_file.blur_sigma.unwrap_or(DEFAULT_BLUR_SIGMA),
            dilate_radius: motion_file.dilate_radius.unwrap_or(DEFAULT_DILATE_RADIUS),
            take_snapshot: motion_file.take_snapshot.unwrap_or(true),
            snapshot_min_interval: Duration::from_secs(
                motion_file
                    .snapshot_min_interval_secs
                    .unwrap_or(DEFAULT_SNAPSHOT_MIN_INTERVAL_SECS),
            ),
        };

        let ingest_file = file.ingest.unwrap_or_default();
        let ingest = IngestTimings {
            reconnect_backoff: Duration::from_millis(
                ingest_file
                    .reconnect_backoff_ms
                    .unwrap_or(DEFAULT_RECONNECT_BACKOFF_MS),
            ),
            connect_timeout: Duration::from_millis(
                ingest_file
                    .connect_timeout_ms
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            ),
            read_timeout: Duration::from_millis(
                ingest_file.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS),
            ),
            max_frame_bytes: ingest_file.max_frame_bytes.unwrap_or(DEFAULT_MAX_FRAME_BYTES),
        };

        let discovery_file = file.discovery.unwrap_or_default();
        let discovery = DiscoverySettings {
            scan_enabled: discovery_file.scan_enabled.unwrap_or(true),
            listener_enabled: discovery_file.listener_enabled.unwrap_or(false),
            discovery_port: discovery_file
                .discovery_port
                .unwrap_or(DEFAULT_DISCOVERY_PORT),
            video_port: discovery_file.video_port.unwrap_or(DEFAULT_VIDEO_PORT),
            scan_interval: Duration::from_secs(
                discovery_file
                    .scan_interval_secs
                    .unwrap_or(DEFAULT_SCAN_INTERVAL_SECS),
            ),
            connect_timeout: Duration::from_millis(
                discovery_file
                    .connect_timeout_ms
                    .unwrap_or(DEFAULT_SCAN_CONNECT_TIMEOUT_MS),
            ),
            subnet: discovery_file
                .subnet
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .map(str::parse)
                .transpose()?,
            prefix_len: discovery_file.prefix_len.unwrap_or(DEFAULT_PREFIX_LEN),
        };

        let retention_file = file.retention.unwrap_or_default();
        let retention = RetentionSettings {
            enabled: retention_file.enabled.unwrap_or(true),
            max_age: Duration::from_secs(
                retention_file.max_age_secs.unwrap_or(DEFAULT_RETENTION_SECS),
            ),
            sweep_interval: Duration::from_secs(
                retention_file
                    .sweep_interval_secs
                    .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
            ),
        };

        Ok(Self {
            fps: file.fps.unwrap_or(DEFAULT_FPS),
            jpeg_quality: file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            overlay_timestamp: file.overlay_timestamp.unwrap_or(true),
            recordings_dir: file
                .recordings_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORDINGS_DIR)),
            snapshots_dir: file
                .snapshots_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOTS_DIR)),
            registry_path: file
                .registry_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REGISTRY_PATH)),
            recording,
            motion,
            ingest,
            discovery,
            retention,
            cameras: parse_camera_entries(&file.cameras.unwrap_or_default()),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(dir) = env_nonempty("DVR_RECORDINGS_DIR") {
            self.recordings_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_nonempty("DVR_SNAPSHOTS_DIR") {
            self.snapshots_dir = PathBuf::from(dir);
        }
        if let Some(fps) = env_nonempty("DVR_FPS") {
            self.fps = fps
                .parse()
                .map_err(|_| anyhow!("DVR_FPS must be a positive integer"))?;
        }
        if let Some(mode) = env_nonempty("DVR_RECORDING_MODE") {
            self.recording.mode = mode.parse()?;
        }
        if let Some(sensitivity) = env_nonempty("DVR_MOTION_SENSITIVITY") {
            self.motion.sensitivity = sensitivity
                .parse()
                .map_err(|_| anyhow!("DVR_MOTION_SENSITIVITY must be a pixel count"))?;
        }
        if let Some(port) = env_nonempty("DVR_VIDEO_PORT") {
            self.discovery.video_port = port
                .parse()
                .map_err(|_| anyhow!("DVR_VIDEO_PORT must be a port number"))?;
        }
        if let Some(enabled) = env_nonempty("DVR_SCAN_ENABLED") {
            self.discovery.scan_enabled = parse_bool(&enabled)
                .ok_or_else(|| anyhow!("DVR_SCAN_ENABLED must be true or false"))?;
        }
        if let Some(subnet) = env_nonempty("DVR_SCAN_SUBNET") {
            self.discovery.subnet = Some(subnet.parse()?);
        }
        if let Some(retention) = env_nonempty("DVR_RETENTION_SECS") {
            let seconds: u64 = retention.parse().map_err(|_| {
                anyhow!("DVR_RETENTION_SECS must be an integer number of seconds")
            })?;
            self.retention.max_age = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.fps == 0 {
            return Err(anyhow!("fps must be greater than zero"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        if self.retention.enabled && self.retention.max_age.is_zero() {
            return Err(anyhow!("retention must be greater than zero"));
        }
        if self.retention.enabled && self.retention.sweep_interval.is_zero() {
            return Err(anyhow!("retention sweep interval must be greater than zero"));
        }
        if self.discovery.video_port == 0 {
            return Err(anyhow!("discovery video_port must be non-zero"));
        }
        if self.ingest.max_frame_bytes == 0 {
            return Err(anyhow!("ingest max_frame_bytes must be greater than zero"));
        }
        if self.discovery.subnet.is_none() {
            Ipv4Subnet::new(std::net::Ipv4Addr::UNSPECIFIED, self.discovery.prefix_len)
                .context("discovery prefix_len")?;
        }
        Ok(())
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            fps: self.fps,
            reconnect_backoff: self.ingest.reconnect_backoff,
            connect_timeout: self.ingest.connect_timeout,
            read_timeout: self.ingest.read_timeout,
            max_frame_bytes: self.ingest.max_frame_bytes,
            default_video_port: self.discovery.video_port,
        }
    }

    pub fn pipeline_settings(&self) -> Arc<PipelineSettings> {
        Arc::new(PipelineSettings {
            jpeg_quality: self.jpeg_quality,
            overlay_timestamp: self.overlay_timestamp,
            motion: self.motion.clone(),
            recording: self.recording.clone(),
            ingest: self.ingest_settings(),
        })
    }

    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            subnet: self.discovery.subnet,
            prefix_len: self.discovery.prefix_len,
            video_port: self.discovery.video_port,
            connect_timeout: self.discovery.connect_timeout,
            interval: self.discovery.scan_interval,
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age: self.retention.max_age,
            sweep_interval: self.retention.sweep_interval,
        }
    }
}

fn read_config_file(path: &Path) -> Result<DvrConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = DvrConfig::from_file(DvrConfigFile::default()).unwrap();
        assert_eq!(cfg.fps, 20);
        assert_eq!(cfg.jpeg_quality, 80);
        assert_eq!(cfg.recording.mode, RecordingMode::Motion);
        assert!(cfg.recording.auto_recording);
        assert_eq!(cfg.recording.post_motion_hold, Duration::from_secs(10));
        assert_eq!(cfg.motion.sensitivity, 5000);
        assert_eq!(cfg.discovery.video_port, 5554);
        assert_eq!(cfg.discovery.discovery_port, 5552);
        assert!(cfg.discovery.scan_enabled);
        assert!(!cfg.discovery.listener_enabled);
        assert_eq!(cfg.retention.max_age, Duration::from_secs(604_800));
        assert!(cfg.cameras.is_empty());
        cfg.validate().unwrap();
    }

    #[test]
    fn bad_schedule_or_mode_fails_loading() {
        let file: DvrConfigFile = serde_json::from_str(
            r#"{"recording": {"schedules": [{"days": [0], "start": "25:00", "end": "26:00"}]}}"#,
        )
        .unwrap();
        assert!(DvrConfig::from_file(file).is_err());

        let file: DvrConfigFile =
            serde_json::from_str(r#"{"recording": {"mode": "sometimes"}}"#).unwrap();
        assert!(DvrConfig::from_file(file).is_err());
    }

    #[test]
    fn malformed_cameras_are_skipped_not_fatal() {
        let file: DvrConfigFile = serde_json::from_str(
            r#"{"cameras": [{"name": "a", "source": 0}, {"source": 1}, {"name": "b", "kind": "remote-sensor", "address": "10.0.0.2"}]}"#,
        )
        .unwrap();
        let cfg = DvrConfig::from_file(file).unwrap();
        let names: Vec<_> = cfg.cameras.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn validation_rejects_zero_fps_and_bad_quality() {
        let mut cfg = DvrConfig::from_file(DvrConfigFile::default()).unwrap();
        cfg.fps = 0;
        assert!(cfg.validate().is_err());
        cfg.fps = 10;
        cfg.jpeg_quality = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bool_parsing() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
