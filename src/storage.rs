//! On-disk outputs outside the recording sessions: motion snapshots, the
//! retention sweep over recordings and snapshots, and atomic file writes.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use crate::error::{DvrError, DvrResult};
use crate::recording::sink::{create_unique, recording_file_name};
use crate::shutdown::StopToken;

/// File extensions the retention sweep is allowed to delete.
pub const SWEPT_EXTENSIONS: [&str; 3] = ["mjpeg", "webm", "jpg"];

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

pub trait SnapshotSink: Send + Sync {
    fn save(&self, camera: &str, at: DateTime<Local>, jpeg: &[u8]) -> DvrResult<()>;
}

/// Writes snapshots as `<camera>_<YYYYmmdd_HHMMSS>.jpg`.
#[derive(Clone, Debug)]
pub struct FileSnapshotSink {
    dir: PathBuf,
}

impl FileSnapshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SnapshotSink for FileSnapshotSink {
    fn save(&self, camera: &str, at: DateTime<Local>, jpeg: &[u8]) -> DvrResult<()> {
        let name = recording_file_name(camera, at, "jpg");
        let (mut file, path) = create_unique(&self.dir, &name)?;
        file.write_all(jpeg)
            .and_then(|_| file.sync_all())
            .map_err(|e| DvrError::write("write snapshot", e))?;
        log::info!("camera {}: snapshot {}", camera, path.display());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySnapshotSink {
    saved: Mutex<Vec<(String, Vec<u8>)>>,
}

impl InMemorySnapshotSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Vec<(String, Vec<u8>)> {
        self.saved.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count_for(&self, camera: &str) -> usize {
        self.saved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(name, _)| name == camera)
            .count()
    }
}

impl SnapshotSink for InMemorySnapshotSink {
    fn save(&self, camera: &str, _at: DateTime<Local>, jpeg: &[u8]) -> DvrResult<()> {
        self.saved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((camera.to_string(), jpeg.to_vec()));
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Retention
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Duration,
    pub sweep_interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_RETENTION,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: usize,
    pub bytes: u64,
}

/// Delete recordings and snapshots last modified more than `max_age` before
/// `now`. Missing directories are skipped; per-file failures are logged and
/// do not stop the sweep.
pub fn sweep_once(dirs: &[PathBuf], max_age: Duration, now: SystemTime) -> Result<SweepReport> {
    let cutoff = now
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut report = SweepReport::default();

    for dir in dirs {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e).with_context(|| format!("read {}", dir.display())),
        };
        for entry in entries {
            let entry = entry.with_context(|| format!("list {}", dir.display()))?;
            let path = entry.path();
            let swept = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| SWEPT_EXTENSIONS.contains(&ext));
            if !swept {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let modified = match metadata.modified() {
                Ok(t) => t,
                Err(_) => continue,
            };
            if modified >= cutoff {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    log::info!("retention: deleted {}", path.display());
                    report.deleted += 1;
                    report.bytes += metadata.len();
                }
                Err(e) => log::warn!("retention: cannot delete {}: {}", path.display(), e),
            }
        }
    }
    Ok(report)
}

pub fn spawn_retention_sweeper(
    dirs: Vec<PathBuf>,
    policy: RetentionPolicy,
    stop: StopToken,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("retention".to_string())
        .spawn(move || loop {
            match sweep_once(&dirs, policy.max_age, SystemTime::now()) {
                Ok(report) if report.deleted > 0 => log::info!(
                    "retention: removed {} files ({} bytes)",
                    report.deleted,
                    report.bytes
                ),
                Ok(_) => {}
                Err(e) => log::warn!("retention sweep failed: {:#}", e),
            }
            if stop.wait_timeout(policy.sweep_interval) {
                break;
            }
        })
        .context("spawn retention thread")
}

/// Write via a sibling temp file and rename, so readers never see a torn file.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("create {}", tmp_path.display()))?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("rename {} to {}", tmp_path.display(), path.display()))?;
    Ok(())
}
