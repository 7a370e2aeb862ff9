//! Pipeline error taxonomy.
//!
//! Every failure inside a camera pipeline is classified so the Ingestion Worker
//! can decide locally how to recover:
//! - `SourceUnavailable`: capture or connect failed. Retry with backoff.
//! - `Protocol`: framing violation on a remote-sensor stream. Tear the
//!   connection down and take the `SourceUnavailable` path.
//! - `Decode` / `Encode`: one bad frame. Skip it, keep the pipeline running.
//! - `Write`: recording I/O failed. Close the session, drop to idle.
//! - `Config`: malformed camera entry. Skip that camera at restart.
//!
//! Nothing in this taxonomy is fatal to the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DvrError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("recording write error: {0}")]
    Write(String),

    #[error("invalid camera config: {0}")]
    Config(String),
}

impl DvrError {
    /// True when the failure is confined to a single frame and the source
    /// connection is still usable.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, DvrError::Decode(_) | DvrError::Encode(_))
    }

    pub(crate) fn unavailable(context: &str, err: impl std::fmt::Display) -> Self {
        DvrError::SourceUnavailable(format!("{}: {}", context, err))
    }

    pub(crate) fn write(context: &str, err: impl std::fmt::Display) -> Self {
        DvrError::Write(format!("{}: {}", context, err))
    }
}

pub type DvrResult<T> = std::result::Result<T, DvrError>;
