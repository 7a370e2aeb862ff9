mod common;

use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use securecam_dvr::discovery::{BroadcastListener, ScanSettings, SubnetScanner};
use securecam_dvr::{
    CameraRegistry, CameraSource, FrameCache, InMemoryRegistryStore, InMemorySnapshotSink,
    MjpegSessionFactory, PipelineContext, PipelineSettings, StopToken,
};

use common::wait_for;

fn registry(dir: &Path) -> Arc<CameraRegistry> {
    let ctx = PipelineContext {
        settings: Arc::new(PipelineSettings::default()),
        cache: Arc::new(FrameCache::new()),
        sessions: Arc::new(MjpegSessionFactory::new(dir, 70)),
        snapshots: Arc::new(InMemorySnapshotSink::new()),
    };
    Arc::new(CameraRegistry::new(
        Vec::new(),
        ctx,
        Box::new(InMemoryRegistryStore::new()),
    ))
}

#[test]
fn scanner_registers_responding_host_once() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());
    let sensor = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = sensor.local_addr().unwrap().port();

    let scanner = SubnetScanner::new(
        ScanSettings {
            subnet: Some("127.0.0.1/32".parse().unwrap()),
            video_port: port,
            connect_timeout: Duration::from_millis(200),
            ..ScanSettings::default()
        },
        registry.clone(),
    );

    assert_eq!(scanner.run_cycle().unwrap(), vec!["SecureCam-1".to_string()]);
    assert!(scanner.run_cycle().unwrap().is_empty());

    let cameras = registry.cameras();
    assert_eq!(cameras.len(), 1);
    assert_eq!(
        cameras[0].source,
        CameraSource::RemoteSensor {
            address: "127.0.0.1".to_string(),
            port: Some(port)
        }
    );
}

#[test]
fn scanner_finds_nothing_on_a_closed_port() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());
    let port = {
        let closed = TcpListener::bind("127.0.0.1:0").unwrap();
        closed.local_addr().unwrap().port()
    };
    let scanner = SubnetScanner::new(
        ScanSettings {
            subnet: Some("127.0.0.0/30".parse().unwrap()),
            video_port: port,
            connect_timeout: Duration::from_millis(200),
            ..ScanSettings::default()
        },
        registry.clone(),
    );
    assert!(scanner.run_cycle().unwrap().is_empty());
    assert!(registry.cameras().is_empty());
}

#[test]
fn broadcast_listener_registers_announcing_sensor_once() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());
    let listener =
        BroadcastListener::bind("127.0.0.1:0".parse().unwrap(), registry.clone(), 5554).unwrap();
    let target: SocketAddr = listener.local_addr().unwrap();
    let stop = StopToken::new();
    let handle = listener.spawn(stop.clone()).unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(b"Garage", target).unwrap();
    assert!(wait_for(Duration::from_secs(3), || registry.cameras().len() == 1));

    sender.send_to(b"Garage again", target).unwrap();
    std::thread::sleep(Duration::from_millis(200));

    stop.stop();
    handle.join().unwrap();

    let cameras = registry.cameras();
    assert_eq!(cameras.len(), 1);
    assert_eq!(cameras[0].name, "Garage");
    assert_eq!(cameras[0].source.remote_address().as_deref(), Some("127.0.0.1"));
}
