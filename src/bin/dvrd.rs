//! dvrd - SecureCam DVR daemon
//!
//! This daemon:
//! 1. Loads configuration and the persisted camera registry
//! 2. Runs one ingestion worker per camera
//! 3. Discovers remote sensors on the LAN
//! 4. Sweeps expired recordings and snapshots

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use securecam_dvr::{
    discovery::{BroadcastListener, SubnetScanner},
    storage::spawn_retention_sweeper,
    CameraRegistry, DvrConfig, FileSnapshotSink, FrameCache, JsonRegistryStore, PipelineContext,
    SessionFactory, StopToken,
};

const HEALTH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "dvrd", about = "SecureCam DVR daemon")]
struct Args {
    /// Path to a JSON or TOML config file.
    #[arg(long, env = "DVR_CONFIG")]
    config: Option<PathBuf>,
    /// Override the camera registry file.
    #[arg(long)]
    registry: Option<PathBuf>,
    /// Disable the active subnet scanner.
    #[arg(long)]
    no_scan: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = DvrConfig::load_from(args.config.as_deref())?;
    if let Some(registry) = args.registry {
        config.registry_path = registry;
    }
    if args.no_scan {
        config.discovery.scan_enabled = false;
    }
    for dir in [&config.recordings_dir, &config.snapshots_dir] {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }

    let ctx = PipelineContext {
        settings: config.pipeline_settings(),
        cache: Arc::new(FrameCache::new()),
        sessions: session_factory(&config)?,
        snapshots: Arc::new(FileSnapshotSink::new(&config.snapshots_dir)),
    };
    let store = Box::new(JsonRegistryStore::new(&config.registry_path));
    let registry = Arc::new(CameraRegistry::open(store, config.cameras.clone(), ctx)?);
    registry.start()?;
    log::info!(
        "dvrd: {} cameras, recording to {}",
        registry.worker_count(),
        config.recordings_dir.display()
    );

    let stop = StopToken::new();
    let mut threads: Vec<JoinHandle<()>> = Vec::new();

    if config.discovery.scan_enabled {
        let scanner = SubnetScanner::new(config.scan_settings(), registry.clone());
        threads.push(scanner.spawn(stop.clone())?);
    }
    if config.discovery.listener_enabled {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.discovery.discovery_port));
        match BroadcastListener::bind(addr, registry.clone(), config.discovery.video_port) {
            Ok(listener) => threads.push(listener.spawn(stop.clone())?),
            Err(e) => log::warn!("dvrd: broadcast listener disabled: {:#}", e),
        }
    }
    if config.retention.enabled {
        let dirs = vec![config.recordings_dir.clone(), config.snapshots_dir.clone()];
        threads.push(spawn_retention_sweeper(dirs, config.retention_policy(), stop.clone())?);
    }
    threads.push(spawn_health_log(registry.clone(), stop.clone())?);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("dvrd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping cameras...");

    stop.stop();
    registry.shutdown()?;
    for thread in threads {
        if thread.join().is_err() {
            log::warn!("dvrd: background thread panicked");
        }
    }
    Ok(())
}

#[cfg(feature = "record-webm")]
fn session_factory(config: &DvrConfig) -> Result<Arc<dyn SessionFactory>> {
    let factory = securecam_dvr::recording::WebmSessionFactory::new(&config.recordings_dir, config.fps)?;
    Ok(Arc::new(factory))
}

#[cfg(not(feature = "record-webm"))]
fn session_factory(config: &DvrConfig) -> Result<Arc<dyn SessionFactory>> {
    Ok(Arc::new(securecam_dvr::MjpegSessionFactory::new(
        &config.recordings_dir,
        config.jpeg_quality,
    )))
}

fn spawn_health_log(registry: Arc<CameraRegistry>, stop: StopToken) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("health".to_string())
        .spawn(move || {
            while !stop.wait_timeout(HEALTH_INTERVAL) {
                for status in registry.worker_status() {
                    log::info!(
                        "camera {}: frames={} connected={} recording={}",
                        status.name,
                        status.frames,
                        status.connected,
                        status.recording
                    );
                }
            }
        })
        .context("spawn health logger")
}
