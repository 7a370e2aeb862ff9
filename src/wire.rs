//! Stream Wire Protocol.
//!
//! One encoded frame per message over an established TCP connection:
//!
//! ```text
//! +----------------------+---------------------------+
//! | u32 big-endian  L    | L bytes of JPEG payload   |
//! +----------------------+---------------------------+
//! ```
//!
//! No handshake, no acknowledgement, no end-of-stream marker other than the
//! TCP close. The same framing is used in both directions; only who connects
//! to whom differs.
//!
//! Reader contract:
//! - fewer than 4 prefix bytes before EOF: clean end of stream (`Ok(None)`)
//! - `L` above the configured maximum: `Protocol`
//! - EOF or read timeout before `L` payload bytes arrive: `Protocol`

use std::io::{self, ErrorKind, Read, Write};

use crate::error::{DvrError, DvrResult};

pub const LENGTH_PREFIX_BYTES: usize = 4;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Write one length-prefixed frame.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "frame exceeds u32 length"))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

/// Length-prefixed frame reader over any byte stream.
pub struct FrameReader<R> {
    inner: R,
    max_frame_bytes: usize,
    frames_read: u64,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, max_frame_bytes: usize) -> Self {
        Self {
            inner,
            max_frame_bytes,
            frames_read: 0,
        }
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Read the next frame payload. `Ok(None)` means the peer closed the
    /// stream on a frame boundary.
    pub fn read_frame(&mut self) -> DvrResult<Option<Vec<u8>>> {
        let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
        let mut filled = 0;
        while filled < LENGTH_PREFIX_BYTES {
            match self.inner.read(&mut prefix[filled..]) {
                Ok(0) => return Ok(None),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) && filled > 0 => {
                    return Err(DvrError::Protocol(format!(
                        "timed out inside length prefix after {} bytes",
                        filled
                    )))
                }
                Err(e) => return Err(DvrError::unavailable("read length prefix", e)),
            }
        }

        let len = u32::from_be_bytes(prefix) as usize;
        if len > self.max_frame_bytes {
            return Err(DvrError::Protocol(format!(
                "frame of {} bytes exceeds limit of {}",
                len, self.max_frame_bytes
            )));
        }

        let mut payload = vec![0u8; len];
        let mut received = 0;
        while received < len {
            match self.inner.read(&mut payload[received..]) {
                Ok(0) => {
                    return Err(DvrError::Protocol(format!(
                        "stream closed after {} of {} payload bytes",
                        received, len
                    )))
                }
                Ok(n) => received += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) => {
                    return Err(DvrError::Protocol(format!(
                        "timed out after {} of {} payload bytes",
                        received, len
                    )))
                }
                Err(e) => return Err(DvrError::unavailable("read payload", e)),
            }
        }

        self.frames_read += 1;
        Ok(Some(payload))
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}
