//! Camera Registry: the authoritative camera list and the worker set that
//! mirrors it.
//!
//! Every mutation runs under one lock and goes persist → stop all workers →
//! start one worker per valid entry before the lock is released, so nobody
//! can observe a worker whose camera differs from the registry. A failed
//! persist leaves both the list and the worker set as they were.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::cache::FrameCache;
use crate::camera::{normalize_address, CameraConfig};
use crate::storage::write_atomic;
use crate::worker::{spawn_worker, PipelineContext, PipelineSettings, WorkerHandle};

pub trait RegistryStore: Send {
    /// `Ok(None)` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<Vec<CameraConfig>>>;

    fn save(&mut self, cameras: &[CameraConfig]) -> Result<()>;
}

/// Parse raw registry entries, dropping malformed ones with a log line.
pub fn parse_camera_entries(entries: &[Value]) -> Vec<CameraConfig> {
    entries
        .iter()
        .filter_map(|value| match CameraConfig::from_value(value) {
            Ok(camera) => Some(camera),
            Err(e) => {
                log::warn!("registry: skipping entry: {}", e);
                None
            }
        })
        .collect()
}

/// JSON array of camera entries, replaced atomically on every save.
#[derive(Clone, Debug)]
pub struct JsonRegistryStore {
    path: PathBuf,
}

impl JsonRegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegistryStore for JsonRegistryStore {
    fn load(&self) -> Result<Option<Vec<CameraConfig>>> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("read registry {}", self.path.display()))
            }
        };
        let value: Value = serde_json::from_slice(&raw)
            .with_context(|| format!("parse registry {}", self.path.display()))?;
        let entries = match &value {
            Value::Array(entries) => entries.as_slice(),
            Value::Object(map) => map
                .get("cameras")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .ok_or_else(|| anyhow!("registry object has no cameras array"))?,
            _ => return Err(anyhow!("registry must be a JSON array")),
        };
        Ok(Some(parse_camera_entries(entries)))
    }

    fn save(&mut self, cameras: &[CameraConfig]) -> Result<()> {
        let json = serde_json::to_vec_pretty(cameras)?;
        write_atomic(&self.path, &json)
    }
}

/// Registry store for tests. Clones share state, so a test can keep one to
/// inspect saves or inject failures after handing another to the registry.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRegistryStore {
    saved: Arc<Mutex<Option<Vec<CameraConfig>>>>,
    fail_saves: Arc<AtomicBool>,
}

impl InMemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Option<Vec<CameraConfig>> {
        self.saved.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl RegistryStore for InMemoryRegistryStore {
    fn load(&self) -> Result<Option<Vec<CameraConfig>>> {
        Ok(self.saved())
    }

    fn save(&mut self, cameras: &[CameraConfig]) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(anyhow!("registry store unavailable"));
        }
        *self.saved.lock().unwrap_or_else(|e| e.into_inner()) = Some(cameras.to_vec());
        Ok(())
    }
}

/// Health snapshot of one running worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerStatus {
    pub name: String,
    pub frames: u64,
    pub connected: bool,
    pub recording: bool,
}

struct Inner {
    cameras: Vec<CameraConfig>,
    ctx: PipelineContext,
    store: Box<dyn RegistryStore>,
    workers: Vec<WorkerHandle>,
    running: bool,
}

pub struct CameraRegistry {
    inner: Mutex<Inner>,
    cache: Arc<FrameCache>,
}

impl CameraRegistry {
    pub fn new(cameras: Vec<CameraConfig>, ctx: PipelineContext, store: Box<dyn RegistryStore>) -> Self {
        let cache = ctx.cache.clone();
        Self {
            inner: Mutex::new(Inner {
                cameras,
                ctx,
                store,
                workers: Vec::new(),
                running: false,
            }),
            cache,
        }
    }

    /// Use the persisted camera list when there is one, else `fallback`.
    pub fn open(
        store: Box<dyn RegistryStore>,
        fallback: Vec<CameraConfig>,
        ctx: PipelineContext,
    ) -> Result<Self> {
        let cameras = match store.load()? {
            Some(cameras) => {
                log::info!("registry: loaded {} cameras", cameras.len());
                cameras
            }
            None => fallback,
        };
        Ok(Self::new(cameras, ctx, store))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cache(&self) -> Arc<FrameCache> {
        self.cache.clone()
    }

    /// Start one worker per valid camera.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.running = true;
        inner.restart(&self.cache);
        Ok(())
    }

    pub fn cameras(&self) -> Vec<CameraConfig> {
        self.lock().cameras.clone()
    }

    pub fn camera(&self, name: &str) -> Option<CameraConfig> {
        self.lock().cameras.iter().find(|c| c.name == name).cloned()
    }

    pub fn add_camera(&self, camera: CameraConfig) -> Result<()> {
        camera.validate()?;
        self.mutate(|cameras| {
            if cameras.iter().any(|c| c.name == camera.name) {
                return Err(anyhow!("camera '{}' already exists", camera.name));
            }
            cameras.push(camera);
            Ok(Some(()))
        })
        .map(|_| ())
    }

    /// Returns false when no camera has that name.
    pub fn remove_camera(&self, name: &str) -> Result<bool> {
        self.mutate(|cameras| {
            let before = cameras.len();
            cameras.retain(|c| c.name != name);
            Ok((cameras.len() != before).then_some(()))
        })
        .map(|changed| changed.is_some())
    }

    pub fn rename_camera(&self, old: &str, new: &str) -> Result<()> {
        let new = new.trim();
        if new.is_empty() {
            return Err(anyhow!("camera name is empty"));
        }
        self.mutate(|cameras| {
            if !cameras.iter().any(|c| c.name == old) {
                return Err(anyhow!("no camera named '{}'", old));
            }
            if old == new {
                return Ok(None);
            }
            if cameras.iter().any(|c| c.name == new) {
                return Err(anyhow!("camera '{}' already exists", new));
            }
            if let Some(camera) = cameras.iter_mut().find(|c| c.name == old) {
                camera.name = new.to_string();
            }
            Ok(Some(()))
        })
        .map(|_| ())
    }

    /// Replace the whole list. Invalid or duplicate entries are kept in the
    /// registry but get no worker.
    pub fn replace_cameras(&self, next: Vec<CameraConfig>) -> Result<()> {
        self.mutate(|cameras| {
            *cameras = next;
            Ok(Some(()))
        })
        .map(|_| ())
    }

    /// Register a discovered sensor unless a remote-sensor entry for the same
    /// address exists. Returns the name it was registered under.
    pub fn register_remote_sensor(&self, name: &str, ip: IpAddr, port: u16) -> Result<Option<String>> {
        let address = normalize_address(&ip.to_string());
        self.mutate(|cameras| {
            if cameras
                .iter()
                .any(|c| c.source.remote_address().as_deref() == Some(address.as_str()))
            {
                return Ok(None);
            }
            let name = unique_name(name, cameras);
            cameras.push(CameraConfig::remote_sensor(name.clone(), address.clone(), Some(port)));
            Ok(Some(name))
        })
        .map(|registered| {
            if let Some(name) = &registered {
                log::info!("registry: registered remote sensor {} at {}:{}", name, ip, port);
            }
            registered
        })
    }

    /// Swap pipeline settings and restart every worker under them.
    pub fn update_settings(&self, settings: PipelineSettings) -> Result<()> {
        let mut inner = self.lock();
        inner.ctx.settings = Arc::new(settings);
        if inner.running {
            inner.restart(&self.cache);
        }
        Ok(())
    }

    pub fn settings(&self) -> Arc<PipelineSettings> {
        self.lock().ctx.settings.clone()
    }

    pub fn worker_names(&self) -> Vec<String> {
        self.lock().workers.iter().map(|w| w.name().to_string()).collect()
    }

    pub fn worker_count(&self) -> usize {
        self.lock().workers.len()
    }

    pub fn worker_status(&self) -> Vec<WorkerStatus> {
        self.lock()
            .workers
            .iter()
            .map(|w| WorkerStatus {
                name: w.name().to_string(),
                frames: w.stats().frames(),
                connected: w.stats().is_connected(),
                recording: w.stats().is_recording(),
            })
            .collect()
    }

    /// Stop every worker. The registry can be started again.
    pub fn shutdown(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.running = false;
        inner.stop_all()
    }

    fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut Vec<CameraConfig>) -> Result<Option<T>>,
    ) -> Result<Option<T>> {
        let mut inner = self.lock();
        let mut next = inner.cameras.clone();
        let Some(out) = apply(&mut next)? else {
            return Ok(None);
        };
        if let Err(e) = inner.store.save(&next) {
            log::error!("registry: persist failed, change rolled back: {:#}", e);
            return Err(e.context("persist camera registry"));
        }
        inner.cameras = next;
        if inner.running {
            inner.restart(&self.cache);
        }
        Ok(Some(out))
    }
}

impl Drop for CameraRegistry {
    fn drop(&mut self) {
        if let Err(e) = self.lock().stop_all() {
            log::error!("registry: {:#}", e);
        }
    }
}

impl Inner {
    fn stop_all(&mut self) -> Result<()> {
        for worker in &self.workers {
            worker.signal_stop();
        }
        let mut failures = Vec::new();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.stop() {
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(failures.join("; ")))
        }
    }

    fn restart(&mut self, cache: &FrameCache) {
        if let Err(e) = self.stop_all() {
            log::error!("registry: {:#}", e);
        }

        let mut names = HashSet::new();
        for camera in &self.cameras {
            if let Err(e) = camera.validate() {
                log::warn!("registry: {}", e);
                continue;
            }
            if !names.insert(camera.name.clone()) {
                log::warn!("registry: duplicate camera name '{}' skipped", camera.name);
                continue;
            }
            match spawn_worker(camera.clone(), self.ctx.clone()) {
                Ok(handle) => self.workers.push(handle),
                Err(e) => {
                    names.remove(&camera.name);
                    log::error!("registry: {:#}", e);
                }
            }
        }
        cache.retain(names.iter().map(String::as_str));
        log::info!("registry: {} workers running", self.workers.len());
    }
}

/// `base`, else `base-2`, `base-3`, ... whichever is free.
fn unique_name(base: &str, cameras: &[CameraConfig]) -> String {
    let base = base.trim();
    let taken = |n: &str| cameras.iter().any(|c| c.name == n);
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|i| format!("{}-{}", base, i))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}
