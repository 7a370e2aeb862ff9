//! Camera configuration entries.
//!
//! The source kind is a closed enum; each variant carries only the fields its
//! ingestion path needs.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DvrError, DvrResult};

pub const DEFAULT_VIDEO_PORT: u16 = 5554;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CameraSource {
    /// Local capture device. A decimal index maps to `/dev/video<N>`.
    Local { device: String },
    /// RTSP/HTTP stream URL.
    NetworkStream { url: String },
    /// Remote sensor pushing the stream wire protocol.
    RemoteSensor {
        address: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
}

impl CameraSource {
    pub fn kind(&self) -> &'static str {
        match self {
            CameraSource::Local { .. } => "local",
            CameraSource::NetworkStream { .. } => "network-stream",
            CameraSource::RemoteSensor { .. } => "remote-sensor",
        }
    }

    /// Host address for remote sensors, normalized for dedup comparisons.
    pub fn remote_address(&self) -> Option<String> {
        match self {
            CameraSource::RemoteSensor { address, .. } => Some(normalize_address(address)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub name: String,
    #[serde(flatten)]
    pub source: CameraSource,
}

impl CameraConfig {
    pub fn local(name: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: CameraSource::Local {
                device: device.into(),
            },
        }
    }

    pub fn network_stream(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: CameraSource::NetworkStream { url: url.into() },
        }
    }

    pub fn remote_sensor(name: impl Into<String>, address: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            name: name.into(),
            source: CameraSource::RemoteSensor {
                address: address.into(),
                port,
            },
        }
    }

    pub fn validate(&self) -> DvrResult<()> {
        if self.name.trim().is_empty() {
            return Err(DvrError::Config("camera name is empty".to_string()));
        }
        match &self.source {
            CameraSource::Local { device } if device.trim().is_empty() => Err(DvrError::Config(
                format!("camera '{}': local device is empty", self.name),
            )),
            CameraSource::NetworkStream { url } if url.trim().is_empty() => Err(
                DvrError::Config(format!("camera '{}': stream url is empty", self.name)),
            ),
            CameraSource::RemoteSensor { address, port } => {
                if address.trim().is_empty() {
                    return Err(DvrError::Config(format!(
                        "camera '{}': remote address is empty",
                        self.name
                    )));
                }
                if *port == Some(0) {
                    return Err(DvrError::Config(format!(
                        "camera '{}': remote port must be non-zero",
                        self.name
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Parse one registry entry, accepting the tagged form as well as the
    /// older `source` / `type: securecam` layouts.
    pub fn from_value(value: &Value) -> DvrResult<Self> {
        let camera = if value.get("kind").is_some() {
            serde_json::from_value::<CameraConfig>(value.clone())
                .map_err(|e| DvrError::Config(format!("camera entry: {}", e)))?
        } else {
            parse_legacy(value)?
        };
        camera.validate()?;
        Ok(camera)
    }
}

fn parse_legacy(value: &Value) -> DvrResult<CameraConfig> {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| DvrError::Config("camera entry has no name".to_string()))?;

    if value.get("type").and_then(Value::as_str) == Some("securecam") {
        let address = value
            .get("ip")
            .and_then(Value::as_str)
            .ok_or_else(|| DvrError::Config(format!("camera '{}': missing ip", name)))?;
        let port = match value.get("video_port") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                v.as_u64()
                    .and_then(|p| u16::try_from(p).ok())
                    .ok_or_else(|| {
                        DvrError::Config(format!("camera '{}': invalid video_port", name))
                    })?,
            ),
        };
        return Ok(CameraConfig::remote_sensor(name, address, port));
    }

    match value.get("source") {
        Some(Value::Number(n)) => {
            let index = n
                .as_u64()
                .ok_or_else(|| DvrError::Config(format!("camera '{}': invalid device index", name)))?;
            Ok(CameraConfig::local(name, index.to_string()))
        }
        Some(Value::String(s)) => {
            let s = s.trim();
            if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
                Ok(CameraConfig::local(name, s))
            } else if s.starts_with("/dev/") {
                Ok(CameraConfig::local(name, s))
            } else {
                Ok(CameraConfig::network_stream(name, s))
            }
        }
        _ => Err(DvrError::Config(format!(
            "camera '{}': missing kind or source",
            name
        ))),
    }
}

/// Canonical textual form of a host address, used for remote-sensor dedup.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    match trimmed.parse::<IpAddr>() {
        Ok(ip) => ip.to_string(),
        Err(_) => trimmed.to_ascii_lowercase(),
    }
}
