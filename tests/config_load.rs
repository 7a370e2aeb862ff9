use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use securecam_dvr::{CameraSource, DvrConfig, RecordingMode};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "DVR_CONFIG",
        "DVR_RECORDINGS_DIR",
        "DVR_SNAPSHOTS_DIR",
        "DVR_FPS",
        "DVR_RECORDING_MODE",
        "DVR_MOTION_SENSITIVITY",
        "DVR_VIDEO_PORT",
        "DVR_SCAN_ENABLED",
        "DVR_SCAN_SUBNET",
        "DVR_RETENTION_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "fps": 15,
        "recordings_dir": "/srv/dvr/recordings",
        "recording": {
            "mode": "continuous",
            "use_schedules": true,
            "schedules": [{"days": [0, 1, 2, 3, 4], "start": "22:00", "end": "06:00"}]
        },
        "motion": {"sensitivity": 1200},
        "discovery": {"listener_enabled": true, "subnet": "10.1.2.0/24"},
        "cameras": [
            {"name": "Front Door", "kind": "local", "device": "0"},
            {"name": "Garage", "source": "rtsp://10.1.2.9/stream"},
            {"name": "Shed", "type": "securecam", "ip": "10.1.2.30", "video_port": 6000},
            {"kind": "local", "device": "1"}
        ]
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("DVR_CONFIG", file.path());
    std::env::set_var("DVR_MOTION_SENSITIVITY", "800");
    std::env::set_var("DVR_RETENTION_SECS", "3600");
    std::env::set_var("DVR_SCAN_ENABLED", "false");

    let cfg = DvrConfig::load().expect("load config");
    clear_env();

    assert_eq!(cfg.fps, 15);
    assert_eq!(cfg.recordings_dir.to_str(), Some("/srv/dvr/recordings"));
    assert_eq!(cfg.snapshots_dir.to_str(), Some("snapshots"));
    assert_eq!(cfg.recording.mode, RecordingMode::Continuous);
    assert!(cfg.recording.use_schedules);
    assert_eq!(cfg.recording.schedules.len(), 1);
    assert_eq!(cfg.motion.sensitivity, 800);
    assert_eq!(cfg.retention.max_age, Duration::from_secs(3600));
    assert!(!cfg.discovery.scan_enabled);
    assert!(cfg.discovery.listener_enabled);
    assert_eq!(
        cfg.discovery.subnet.map(|s| s.to_string()),
        Some("10.1.2.0/24".to_string())
    );

    // The nameless entry is skipped; legacy entries are converted.
    assert_eq!(cfg.cameras.len(), 3);
    assert_eq!(
        cfg.cameras[1].source,
        CameraSource::NetworkStream {
            url: "rtsp://10.1.2.9/stream".to_string()
        }
    );
    assert_eq!(
        cfg.cameras[2].source,
        CameraSource::RemoteSensor {
            address: "10.1.2.30".to_string(),
            port: Some(6000)
        }
    );

    let pipeline = cfg.pipeline_settings();
    assert_eq!(pipeline.ingest.fps, 15);
    assert_eq!(pipeline.motion.sensitivity, 800);
}

#[test]
fn loads_toml_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
fps = 10
jpeg_quality = 70

[recording]
mode = "motion"
post_motion_hold_secs = 4

[[cameras]]
name = "Porch"
kind = "remote-sensor"
address = "192.168.1.50"
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = DvrConfig::load_from(Some(file.path())).expect("load toml config");
    assert_eq!(cfg.fps, 10);
    assert_eq!(cfg.jpeg_quality, 70);
    assert_eq!(cfg.recording.post_motion_hold, Duration::from_secs(4));
    assert_eq!(cfg.cameras.len(), 1);
    assert_eq!(cfg.cameras[0].name, "Porch");
}

#[test]
fn invalid_values_fail_loading() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{"jpeg_quality": 0}"#).expect("write config");
    assert!(DvrConfig::load_from(Some(file.path())).is_err());

    std::env::set_var("DVR_FPS", "fast");
    let err = DvrConfig::load_from(None).unwrap_err();
    clear_env();
    assert!(err.to_string().contains("DVR_FPS"));

    std::env::set_var("DVR_RECORDING_MODE", "sometimes");
    assert!(DvrConfig::load_from(None).is_err());
    clear_env();

    std::env::set_var("DVR_RETENTION_SECS", "0");
    assert!(DvrConfig::load_from(None).is_err());
    clear_env();
}

#[test]
fn missing_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let err = DvrConfig::load_from(Some(&dir.path().join("absent.json"))).unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}
