//! securecam_sensor - remote camera for a SecureCam DVR
//!
//! Captures from a local source, streams length-prefixed JPEG frames to the
//! DVR that connects to the video port, and announces itself over UDP.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::mpsc;

use securecam_dvr::{
    discovery::DEFAULT_DISCOVERY_PORT,
    sensor::{spawn_broadcaster, DEFAULT_BROADCAST_INTERVAL, DEFAULT_CAMERA_RETRY},
    CameraSource, SensorServer, SensorSettings, StopToken, DEFAULT_VIDEO_PORT,
};

#[derive(Parser, Debug)]
#[command(name = "securecam_sensor", about = "SecureCam remote sensor")]
struct Args {
    /// Name announced to DVRs on the LAN.
    #[arg(long, env = "SENSOR_NAME", default_value = "SecureCam")]
    name: String,
    /// Device index, device path, stream URL or stub:// locator.
    #[arg(long, env = "SENSOR_SOURCE", default_value = "0")]
    source: String,
    #[arg(long, env = "SENSOR_VIDEO_PORT", default_value_t = DEFAULT_VIDEO_PORT)]
    port: u16,
    #[arg(long, default_value_t = 20)]
    fps: u32,
    #[arg(long, default_value_t = 80)]
    quality: u8,
    /// Output resolution as WIDTHxHEIGHT.
    #[arg(long, value_parser = parse_resolution)]
    resolution: Option<(u32, u32)>,
    #[arg(long, default_value_t = DEFAULT_DISCOVERY_PORT)]
    discovery_port: u16,
    /// Do not announce over UDP broadcast.
    #[arg(long)]
    no_broadcast: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("--fps must be greater than zero"));
    }
    if !(1..=100).contains(&args.quality) {
        return Err(anyhow!("--quality must be within 1..=100"));
    }

    let source = if args.source.contains("://") && !args.source.starts_with("stub://") {
        CameraSource::NetworkStream { url: args.source }
    } else {
        CameraSource::Local { device: args.source }
    };
    let settings = SensorSettings {
        source,
        fps: args.fps,
        jpeg_quality: args.quality,
        resolution: args.resolution,
        camera_retry: DEFAULT_CAMERA_RETRY,
    };

    let stop = StopToken::new();
    let server = SensorServer::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.port)))?;
    log::info!("sensor {} streaming on {}", args.name, server.local_addr()?);
    let server_thread = server.spawn(settings, stop.clone())?;

    let broadcaster = if args.no_broadcast {
        None
    } else {
        let target = SocketAddr::from((Ipv4Addr::BROADCAST, args.discovery_port));
        Some(spawn_broadcaster(
            args.name.clone(),
            target,
            DEFAULT_BROADCAST_INTERVAL,
            stop.clone(),
        )?)
    };

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping sensor...");

    stop.stop();
    for thread in std::iter::once(server_thread).chain(broadcaster) {
        if thread.join().is_err() {
            log::warn!("sensor: thread panicked");
        }
    }
    Ok(())
}

fn parse_resolution(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value}"))?;
    let w: u32 = w.trim().parse().map_err(|_| format!("bad width in {value}"))?;
    let h: u32 = h.trim().parse().map_err(|_| format!("bad height in {value}"))?;
    if w == 0 || h == 0 {
        return Err("resolution must be non-zero".to_string());
    }
    Ok((w, h))
}
