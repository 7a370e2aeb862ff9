use std::fmt;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::str::FromStr;

use crate::error::{DvrError, DvrResult};

/// Shortest prefix the scanner accepts; a /16 is already 65k connects.
pub const MIN_PREFIX_LEN: u8 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv4Subnet {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Subnet {
    /// Subnet containing `addr`. Host bits are cleared.
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> DvrResult<Self> {
        if !(MIN_PREFIX_LEN..=32).contains(&prefix_len) {
            return Err(DvrError::Config(format!(
                "subnet prefix /{} outside /{}../32",
                prefix_len, MIN_PREFIX_LEN
            )));
        }
        let network = Ipv4Addr::from(u32::from(addr) & mask(prefix_len));
        Ok(Self {
            network,
            prefix_len,
        })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & mask(self.prefix_len) == u32::from(self.network)
    }

    /// Usable host addresses. Network and broadcast addresses are excluded
    /// except on /31 and /32, where every address is a host.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let first = u32::from(self.network);
        let last = first | !mask(self.prefix_len);
        let (start, end) = if self.prefix_len >= 31 {
            (first, last)
        } else {
            (first + 1, last - 1)
        };
        (start..=end).map(Ipv4Addr::from)
    }
}

fn mask(prefix_len: u8) -> u32 {
    match prefix_len {
        0 => 0,
        n => u32::MAX << (32 - n as u32),
    }
}

impl FromStr for Ipv4Subnet {
    type Err = DvrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| DvrError::Config(format!("subnet '{}' is not CIDR", s)))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| DvrError::Config(format!("subnet '{}': bad address", s)))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| DvrError::Config(format!("subnet '{}': bad prefix", s)))?;
        Self::new(addr, prefix)
    }
}

impl fmt::Display for Ipv4Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Primary IPv4 address of this host: the source address the kernel picks for
/// an outbound route. Connecting a UDP socket sends nothing.
pub fn detect_local_ipv4() -> DvrResult<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .map_err(|e| DvrError::unavailable("bind route lookup socket", e))?;
    socket
        .connect("8.8.8.8:80")
        .map_err(|e| DvrError::unavailable("no IPv4 route", e))?;
    match socket
        .local_addr()
        .map_err(|e| DvrError::unavailable("read local address", e))?
        .ip()
    {
        IpAddr::V4(ip) if !ip.is_unspecified() && !ip.is_loopback() => Ok(ip),
        other => Err(DvrError::SourceUnavailable(format!(
            "no usable local IPv4 address (got {})",
            other
        ))),
    }
}
