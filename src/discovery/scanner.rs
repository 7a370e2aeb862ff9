//! Active scanner: try a TCP connect to every host of the local subnet on the sensor
//! video port and register whoever answers.
//!
//! Each cycle is independent. A cycle that cannot even determine the subnet
//! logs and waits for the next interval.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::subnet::{detect_local_ipv4, Ipv4Subnet};
use super::discovered_name;
use crate::camera::DEFAULT_VIDEO_PORT;
use crate::registry::CameraRegistry;
use crate::shutdown::StopToken;

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_SCAN_CONNECT_TIMEOUT: Duration = Duration::from_millis(300);
pub const SCAN_PARALLELISM: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanSettings {
    /// Fixed subnet; detected from the local address when unset.
    pub subnet: Option<Ipv4Subnet>,
    /// Prefix applied to the detected local address.
    pub prefix_len: u8,
    pub video_port: u16,
    pub connect_timeout: Duration,
    pub interval: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            subnet: None,
            prefix_len: 24,
            video_port: DEFAULT_VIDEO_PORT,
            connect_timeout: DEFAULT_SCAN_CONNECT_TIMEOUT,
            interval: DEFAULT_SCAN_INTERVAL,
        }
    }
}

pub struct SubnetScanner {
    settings: ScanSettings,
    registry: Arc<CameraRegistry>,
}

impl SubnetScanner {
    pub fn new(settings: ScanSettings, registry: Arc<CameraRegistry>) -> Self {
        Self { settings, registry }
    }

    pub fn subnet(&self) -> Result<Ipv4Subnet> {
        if let Some(subnet) = self.settings.subnet {
            return Ok(subnet);
        }
        let local = detect_local_ipv4()?;
        Ok(Ipv4Subnet::new(local, self.settings.prefix_len)?)
    }

    /// Hosts in `subnet` accepting a TCP connection on the video port, in
    /// address order.
    pub fn scan(&self, subnet: &Ipv4Subnet, skip: &HashSet<Ipv4Addr>) -> Vec<Ipv4Addr> {
        let hosts: Vec<Ipv4Addr> = subnet.hosts().filter(|h| !skip.contains(h)).collect();
        let port = self.settings.video_port;
        let timeout = self.settings.connect_timeout;

        let mut found = Vec::new();
        for batch in hosts.chunks(SCAN_PARALLELISM) {
            std::thread::scope(|scope| {
                let attempts: Vec<_> = batch
                    .iter()
                    .map(|&host| scope.spawn(move || accepts_connection(host, port, timeout).then_some(host)))
                    .collect();
                for handle in attempts {
                    if let Ok(Some(host)) = handle.join() {
                        found.push(host);
                    }
                }
            });
        }
        found
    }

    /// One scan cycle. Returns the names of newly registered cameras.
    pub fn run_cycle(&self) -> Result<Vec<String>> {
        let subnet = self.subnet().context("determine scan subnet")?;
        let known: HashSet<Ipv4Addr> = self
            .registry
            .cameras()
            .iter()
            .filter_map(|c| c.source.remote_address())
            .filter_map(|a| a.parse().ok())
            .collect();
        log::debug!("discovery: scanning {} port {}", subnet, self.settings.video_port);

        let mut registered = Vec::new();
        for host in self.scan(&subnet, &known) {
            let ip = IpAddr::V4(host);
            match self
                .registry
                .register_remote_sensor(&discovered_name(ip), ip, self.settings.video_port)
            {
                Ok(Some(name)) => registered.push(name),
                Ok(None) => {}
                Err(e) => log::error!("discovery: cannot register {}: {:#}", host, e),
            }
        }
        Ok(registered)
    }

    pub fn spawn(self, stop: StopToken) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("discovery-scan".to_string())
            .spawn(move || loop {
                match self.run_cycle() {
                    Ok(names) if !names.is_empty() => {
                        log::info!("discovery: found {}", names.join(", "))
                    }
                    Ok(_) => {}
                    Err(e) => log::warn!("discovery: scan failed: {:#}", e),
                }
                if stop.wait_timeout(self.settings.interval) {
                    break;
                }
            })
            .context("spawn discovery scanner")
    }
}

pub fn accepts_connection(host: Ipv4Addr, port: u16, timeout: Duration) -> bool {
    TcpStream::connect_timeout(&SocketAddr::from((host, port)), timeout).is_ok()
}
