//! Passive listener for sensor presence broadcasts.
//!
//! A datagram's payload is the sensor's UTF-8 name and nothing else; the
//! sender address identifies the sensor.

use anyhow::{Context, Result};
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::discovered_name;
use crate::registry::CameraRegistry;
use crate::shutdown::StopToken;

pub const DEFAULT_DISCOVERY_PORT: u16 = 5552;
const RECV_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_DATAGRAM: usize = 1024;

pub struct BroadcastListener {
    socket: UdpSocket,
    registry: Arc<CameraRegistry>,
    video_port: u16,
}

impl BroadcastListener {
    pub fn bind(addr: SocketAddr, registry: Arc<CameraRegistry>, video_port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(addr).with_context(|| format!("bind discovery port {}", addr))?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        Ok(Self {
            socket,
            registry,
            video_port,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Register the sender of one datagram. Returns the new camera name, or
    /// `None` when the address is already registered.
    pub fn handle_datagram(&self, payload: &[u8], from: IpAddr) -> Result<Option<String>> {
        self.registry
            .register_remote_sensor(&sensor_name(payload, from), from, self.video_port)
    }

    /// Receive until stopped. Stop latency is bounded by the receive timeout.
    pub fn run(&self, stop: &StopToken) {
        let mut buf = [0u8; MAX_DATAGRAM];
        while !stop.is_stopped() {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => match self.handle_datagram(&buf[..len], from.ip()) {
                    Ok(Some(name)) => log::info!("discovery: {} announced itself as {}", from.ip(), name),
                    Ok(None) => {}
                    Err(e) => log::error!("discovery: cannot register {}: {:#}", from.ip(), e),
                },
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) => {}
                Err(e) => {
                    log::warn!("discovery: receive failed: {}", e);
                    if stop.wait_timeout(RECV_TIMEOUT) {
                        break;
                    }
                }
            }
        }
    }

    pub fn spawn(self, stop: StopToken) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("discovery-listen".to_string())
            .spawn(move || self.run(&stop))
            .context("spawn discovery listener")
    }
}

/// Declared name, or the fallback `SecureCam-<octet>` when it is blank.
pub fn sensor_name(payload: &[u8], from: IpAddr) -> String {
    let name = String::from_utf8_lossy(payload);
    let name = name.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if name.is_empty() {
        discovered_name(from)
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_names_fall_back_to_address() {
        let ip: IpAddr = "192.168.0.42".parse().unwrap();
        assert_eq!(sensor_name(b"  Garage\n", ip), "Garage");
        assert_eq!(sensor_name(b"\0\0", ip), "SecureCam-42");
        assert_eq!(sensor_name(b"", ip), "SecureCam-42");
    }
}
