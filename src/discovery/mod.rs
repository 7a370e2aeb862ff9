//! LAN discovery of remote sensors.
//!
//! Two independent mechanisms feed the same registration action
//! (`CameraRegistry::register_remote_sensor`, deduplicated by address):
//! - `BroadcastListener`: sensors announce their name over UDP.
//! - `SubnetScanner`: periodic TCP connect attempts across the local subnet.

pub mod listener;
pub mod scanner;
pub mod subnet;

use std::net::IpAddr;

pub use listener::{BroadcastListener, DEFAULT_DISCOVERY_PORT};
pub use scanner::{ScanSettings, SubnetScanner};
pub use subnet::Ipv4Subnet;

/// Name given to a sensor found without a declared name.
pub fn discovered_name(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => format!("SecureCam-{}", v4.octets()[3]),
        IpAddr::V6(v6) => format!("SecureCam-{:x}", v6.segments()[7]),
    }
}
