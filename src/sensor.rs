//! Remote sensor side of the stream wire protocol.
//!
//! The sensor listens on its video port and streams length-prefixed JPEG
//! frames to one connected DVR at a time. It also announces its name over UDP
//! so passive discovery can find it.

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use std::io::{BufWriter, ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::camera::CameraSource;
use crate::codec::{self, DEFAULT_JPEG_QUALITY};
use crate::frame::Frame;
use crate::ingest::{FrameSource, IngestSettings};
use crate::shutdown::StopToken;
use crate::wire::write_frame;

pub const DEFAULT_CAMERA_RETRY: Duration = Duration::from_secs(3);
pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_secs(5);
const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq)]
pub struct SensorSettings {
    pub source: CameraSource,
    pub fps: u32,
    pub jpeg_quality: u8,
    /// Resize frames before encoding.
    pub resolution: Option<(u32, u32)>,
    pub camera_retry: Duration,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            source: CameraSource::Local {
                device: "0".to_string(),
            },
            fps: 20,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            resolution: None,
            camera_retry: DEFAULT_CAMERA_RETRY,
        }
    }
}

pub struct SensorServer {
    listener: TcpListener,
}

enum StreamEnd {
    Stopped,
    PeerGone,
    SourceLost,
}

impl SensorServer {
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).with_context(|| format!("bind video port {}", addr))?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve connections one at a time until stopped. The capture source is
    /// kept open across connections and reopened when it fails.
    pub fn serve(&self, stop: &StopToken, settings: &SensorSettings) -> Result<()> {
        let ingest = IngestSettings {
            fps: settings.fps,
            ..IngestSettings::default()
        };
        let mut source: Option<FrameSource> = None;

        while !stop.is_stopped() {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    stop.wait_timeout(ACCEPT_POLL);
                    continue;
                }
                Err(e) => return Err(e).context("accept DVR connection"),
            };
            log::info!("sensor: dvr connected from {}", peer);
            if let Err(e) = stream.set_nonblocking(false) {
                log::warn!("sensor: {}: {}", peer, e);
                continue;
            }
            let _ = stream.set_nodelay(true);

            match stream_frames(stream, &mut source, &ingest, settings, stop) {
                StreamEnd::Stopped => break,
                StreamEnd::PeerGone => log::info!("sensor: dvr {} disconnected", peer),
                StreamEnd::SourceLost => {
                    log::warn!("sensor: capture lost while streaming to {}", peer)
                }
            }
        }
        Ok(())
    }

    pub fn spawn(self, settings: SensorSettings, stop: StopToken) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("sensor-stream".to_string())
            .spawn(move || {
                if let Err(e) = self.serve(&stop, &settings) {
                    log::error!("sensor: server stopped: {:#}", e);
                }
            })
            .context("spawn sensor server")
    }
}

fn stream_frames(
    stream: TcpStream,
    source: &mut Option<FrameSource>,
    ingest: &IngestSettings,
    settings: &SensorSettings,
    stop: &StopToken,
) -> StreamEnd {
    let mut writer = BufWriter::new(stream);
    loop {
        if stop.is_stopped() {
            return StreamEnd::Stopped;
        }
        let active = match source {
            Some(active) => active,
            None => match FrameSource::open(&settings.source, ingest) {
                Ok(opened) => source.insert(opened),
                Err(e) => {
                    log::warn!("sensor: camera unavailable: {}; retrying", e);
                    if stop.wait_timeout(settings.camera_retry) {
                        return StreamEnd::Stopped;
                    }
                    continue;
                }
            },
        };

        let frame = match active.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                *source = None;
                return StreamEnd::SourceLost;
            }
            Err(e) if e.is_frame_local() => continue,
            Err(e) => {
                log::warn!("sensor: capture failed: {}", e);
                *source = None;
                return StreamEnd::SourceLost;
            }
        };

        let frame = match settings.resolution {
            Some((w, h)) if (w, h) != (frame.width(), frame.height()) => {
                Frame::from_image(imageops::resize(frame.image(), w, h, FilterType::Triangle))
            }
            _ => frame,
        };
        let jpeg = match codec::encode(&frame, settings.jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                log::debug!("sensor: frame not sent: {}", e);
                continue;
            }
        };
        if write_frame(&mut writer, &jpeg).and_then(|_| writer.flush()).is_err() {
            return StreamEnd::PeerGone;
        }
    }
}

/// Announce `name` to `target` (normally the broadcast address on the
/// discovery port) every `interval` until stopped.
pub fn spawn_broadcaster(
    name: String,
    target: SocketAddr,
    interval: Duration,
    stop: StopToken,
) -> Result<JoinHandle<()>> {
    let socket = UdpSocket::bind("0.0.0.0:0").context("bind broadcast socket")?;
    socket.set_broadcast(true)?;
    std::thread::Builder::new()
        .name("sensor-announce".to_string())
        .spawn(move || loop {
            if let Err(e) = socket.send_to(name.as_bytes(), target) {
                log::debug!("sensor: announce to {} failed: {}", target, e);
            }
            if stop.wait_timeout(interval) {
                break;
            }
        })
        .context("spawn broadcaster")
}
