//! Remote sensor source: pull frames from a sensor listening on its video
//! port, using the stream wire protocol.

use std::io::BufReader;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use crate::codec;
use crate::error::{DvrError, DvrResult};
use crate::frame::Frame;
use crate::ingest::IngestSettings;
use crate::wire::FrameReader;

pub struct RemoteSensorSource {
    peer: SocketAddr,
    reader: FrameReader<BufReader<TcpStream>>,
}

impl RemoteSensorSource {
    /// Connect with the configured connect timeout; reads are bounded by the
    /// read timeout so a silent sensor surfaces as an error, not a hang.
    pub fn connect(address: &str, port: u16, settings: &IngestSettings) -> DvrResult<Self> {
        let candidates: Vec<SocketAddr> = (address.trim(), port)
            .to_socket_addrs()
            .map_err(|e| DvrError::unavailable(&format!("resolve {}", address), e))?
            .collect();

        let mut last_err = None;
        for addr in candidates {
            match TcpStream::connect_timeout(&addr, settings.connect_timeout) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(settings.read_timeout))
                        .map_err(|e| DvrError::unavailable("set read timeout", e))?;
                    let _ = stream.set_nodelay(true);
                    log::info!("remote sensor {}: connected", addr);
                    return Ok(Self {
                        peer: addr,
                        reader: FrameReader::new(BufReader::new(stream), settings.max_frame_bytes),
                    });
                }
                Err(e) => last_err = Some((addr, e)),
            }
        }
        Err(match last_err {
            Some((addr, e)) => DvrError::unavailable(&format!("connect {}", addr), e),
            None => DvrError::SourceUnavailable(format!("{}:{} did not resolve", address, port)),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn frames_received(&self) -> u64 {
        self.reader.frames_read()
    }

    /// `Ok(None)` on clean close. A `Decode` error leaves the connection
    /// usable; `Protocol` and `SourceUnavailable` do not.
    pub fn next_frame(&mut self) -> DvrResult<Option<Frame>> {
        match self.reader.read_frame()? {
            Some(payload) => codec::decode(&payload).map(Some),
            None => Ok(None),
        }
    }
}

impl Drop for RemoteSensorSource {
    fn drop(&mut self) {
        let _ = self.reader.get_ref().get_ref().shutdown(std::net::Shutdown::Both);
    }
}
