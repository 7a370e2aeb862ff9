mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use securecam_dvr::live::LiveFeed;
use securecam_dvr::{
    codec, CameraConfig, CameraRegistry, CameraSource, FrameCache, InMemoryRegistryStore,
    InMemorySnapshotSink, IngestSettings, MjpegSessionFactory, PipelineContext, PipelineSettings,
    RecordingMode, RecordingPolicy, SensorServer, SensorSettings, StopToken,
};

use common::wait_for;

fn context(dir: &Path) -> PipelineContext {
    context_with(dir, RecordingPolicy::default())
}

fn context_with(dir: &Path, recording: RecordingPolicy) -> PipelineContext {
    PipelineContext {
        settings: Arc::new(PipelineSettings {
            overlay_timestamp: false,
            recording,
            ingest: IngestSettings {
                reconnect_backoff: Duration::from_millis(100),
                read_timeout: Duration::from_secs(2),
                ..IngestSettings::default()
            },
            ..PipelineSettings::default()
        }),
        cache: Arc::new(FrameCache::new()),
        sessions: Arc::new(MjpegSessionFactory::new(dir, 70)),
        snapshots: Arc::new(InMemorySnapshotSink::new()),
    }
}

fn start_sensor(stop: &StopToken) -> (u16, std::thread::JoinHandle<()>) {
    start_sensor_on(0, stop)
}

fn start_sensor_on(port: u16, stop: &StopToken) -> (u16, std::thread::JoinHandle<()>) {
    let server = SensorServer::bind(format!("127.0.0.1:{}", port).parse().unwrap()).unwrap();
    let port = server.local_addr().unwrap().port();
    let settings = SensorSettings {
        source: CameraSource::Local {
            device: "stub://porch?width=64&height=48".to_string(),
        },
        fps: 30,
        ..SensorSettings::default()
    };
    (port, server.spawn(settings, stop.clone()).unwrap())
}

#[test]
fn sensor_frames_reach_the_cache_and_live_feed() {
    let dir = tempfile::tempdir().unwrap();
    let sensor_stop = StopToken::new();
    let (port, sensor) = start_sensor(&sensor_stop);

    let registry = CameraRegistry::new(
        vec![CameraConfig::remote_sensor("porch", "127.0.0.1", Some(port))],
        context(dir.path()),
        Box::new(InMemoryRegistryStore::new()),
    );
    registry.start().unwrap();
    let cache = registry.cache();

    assert!(wait_for(Duration::from_secs(5), || cache.sequence("porch") >= 5));
    let jpeg = cache.read("porch").expect("published frame");
    let frame = codec::decode(&jpeg).unwrap();
    assert_eq!((frame.width(), frame.height()), (64, 48));

    let feed_stop = StopToken::new();
    let parts: Vec<Vec<u8>> = LiveFeed::new(cache.clone(), "porch", 50, feed_stop.clone())
        .take(3)
        .collect();
    assert_eq!(parts.len(), 3);
    assert!(parts[0].starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));

    let status = registry.worker_status();
    assert_eq!(status.len(), 1);
    assert!(status[0].connected);

    registry.shutdown().unwrap();
    sensor_stop.stop();
    sensor.join().unwrap();
}

#[test]
fn worker_reconnects_after_sensor_restart() {
    let dir = tempfile::tempdir().unwrap();
    let first_stop = StopToken::new();
    let (port, first) = start_sensor(&first_stop);

    let registry = CameraRegistry::new(
        vec![CameraConfig::remote_sensor("porch", "127.0.0.1", Some(port))],
        context(dir.path()),
        Box::new(InMemoryRegistryStore::new()),
    );
    registry.start().unwrap();
    let cache = registry.cache();
    assert!(wait_for(Duration::from_secs(5), || cache.sequence("porch") > 0));

    first_stop.stop();
    first.join().unwrap();
    let seen = cache.sequence("porch");

    // Same port, new server process.
    let server = SensorServer::bind(format!("127.0.0.1:{}", port).parse().unwrap()).unwrap();
    let second_stop = StopToken::new();
    let settings = SensorSettings {
        source: CameraSource::Local {
            device: "stub://porch2?width=64&height=48".to_string(),
        },
        fps: 30,
        ..SensorSettings::default()
    };
    let second = server.spawn(settings, second_stop.clone()).unwrap();

    assert!(wait_for(Duration::from_secs(8), || cache.sequence("porch") > seen + 3));

    registry.shutdown().unwrap();
    second_stop.stop();
    second.join().unwrap();
}

fn recordings(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "mjpeg"))
        .collect();
    files.sort();
    files
}

fn is_finished_mjpeg(path: &Path) -> bool {
    let bytes = std::fs::read(path).unwrap();
    bytes.starts_with(&[0xFF, 0xD8]) && bytes.ends_with(&[0xFF, 0xD9])
}

#[test]
fn sensor_disconnect_finalizes_the_recording_session() {
    let dir = tempfile::tempdir().unwrap();
    let first_stop = StopToken::new();
    let (port, first) = start_sensor(&first_stop);

    let policy = RecordingPolicy {
        mode: RecordingMode::Continuous,
        ..RecordingPolicy::default()
    };
    let registry = CameraRegistry::new(
        vec![CameraConfig::remote_sensor("porch", "127.0.0.1", Some(port))],
        context_with(dir.path(), policy),
        Box::new(InMemoryRegistryStore::new()),
    );
    registry.start().unwrap();
    let recording = || registry.worker_status()[0].recording;
    assert!(wait_for(Duration::from_secs(5), recording));
    assert!(wait_for(Duration::from_secs(5), || registry.cache().sequence("porch") >= 3));

    first_stop.stop();
    first.join().unwrap();
    assert!(wait_for(Duration::from_secs(5), || !recording()));

    let after_disconnect = recordings(dir.path());
    assert_eq!(after_disconnect.len(), 1);
    assert!(is_finished_mjpeg(&after_disconnect[0]));

    let second_stop = StopToken::new();
    let (_, second) = start_sensor_on(port, &second_stop);
    assert!(wait_for(Duration::from_secs(8), recording));

    registry.shutdown().unwrap();
    second_stop.stop();
    second.join().unwrap();

    let all = recordings(dir.path());
    assert_eq!(all.len(), 2, "one session per connection: {:?}", all);
    assert!(all.contains(&after_disconnect[0]));
    assert!(all.iter().all(|path| is_finished_mjpeg(path)));
}
