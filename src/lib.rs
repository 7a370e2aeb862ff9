//! SecureCam DVR core
//!
//! A multi-camera recorder: each configured camera gets a worker thread that
//! pulls frames from its source, stamps them, runs motion detection, drives a
//! recording session and publishes the latest encoded frame for live viewers.
//!
//! # Module Structure
//!
//! - `camera`, `registry`: camera descriptors and the persisted, hot-reloadable set of them
//! - `ingest`: frame sources (local devices, network streams, remote sensors, synthetic)
//! - `motion`, `overlay`, `codec`: per-frame processing
//! - `recording`, `storage`: sessions, containers, snapshots and retention
//! - `cache`, `live`: latest-frame cache and MJPEG live feeds
//! - `worker`: the per-camera pipeline
//! - `discovery`, `sensor`, `wire`: LAN sensors and their stream protocol

pub mod cache;
pub mod camera;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod live;
pub mod motion;
pub mod overlay;
pub mod recording;
pub mod registry;
pub mod sensor;
pub mod shutdown;
pub mod storage;
pub mod wire;
pub mod worker;

pub use cache::{EncodedFrame, FrameCache};
pub use camera::{CameraConfig, CameraSource, DEFAULT_VIDEO_PORT};
pub use config::DvrConfig;
pub use discovery::{BroadcastListener, Ipv4Subnet, ScanSettings, SubnetScanner};
pub use error::{DvrError, DvrResult};
pub use frame::Frame;
pub use ingest::{FrameSource, IngestSettings};
pub use live::LiveFeed;
pub use motion::{MotionDetector, MotionSettings};
pub use recording::{
    ContainerFormat, MjpegSessionFactory, RecordingController, RecordingMode, RecordingPolicy,
    ScheduleWindow, SessionFactory, VideoSink,
};
pub use registry::{CameraRegistry, InMemoryRegistryStore, JsonRegistryStore, RegistryStore};
pub use sensor::{SensorServer, SensorSettings};
pub use shutdown::StopToken;
pub use storage::{FileSnapshotSink, InMemorySnapshotSink, RetentionPolicy, SnapshotSink};
pub use worker::{spawn_worker, PipelineContext, PipelineSettings, WorkerHandle};
