mod common;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Local;

use securecam_dvr::storage::{spawn_retention_sweeper, sweep_once};
use securecam_dvr::{
    FileSnapshotSink, Frame, MjpegSessionFactory, RecordingController, RetentionPolicy,
    SnapshotSink, StopToken,
};

use common::wait_for;

#[test]
fn open_session_file_survives_a_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let dirs = vec![dir.path().to_path_buf()];
    let mut recorder = RecordingController::new(
        "Front Door",
        Arc::new(MjpegSessionFactory::new(dir.path(), 70)),
    );

    let frame = Frame::filled(32, 24, [90, 90, 90]);
    for _ in 0..3 {
        recorder.step(true, &frame, Local::now());
    }
    let working = recorder.session().expect("open session").path;

    let report = sweep_once(&dirs, Duration::from_secs(3600), SystemTime::now()).unwrap();
    assert_eq!(report.deleted, 0);
    assert!(working.exists());

    let closed = recorder.stop().expect("closed session path");
    assert_eq!(closed, working);
    assert!(closed
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("Front_Door_") && n.ends_with(".mjpeg")));

    // Once it is old enough the finished file goes like any other.
    let later = SystemTime::now() + Duration::from_secs(7200);
    let report = sweep_once(&dirs, Duration::from_secs(3600), later).unwrap();
    assert_eq!(report.deleted, 1);
    assert!(!closed.exists());
}

#[test]
fn background_sweeper_removes_expired_snapshots() {
    let recordings = tempfile::tempdir().unwrap();
    let snapshots = tempfile::tempdir().unwrap();
    let sink = FileSnapshotSink::new(snapshots.path());
    sink.save("yard", Local::now(), b"\xff\xd8jpeg\xff\xd9").unwrap();
    let snapshot = std::fs::read_dir(snapshots.path())
        .unwrap()
        .next()
        .expect("snapshot written")
        .unwrap()
        .path();
    let unrelated = snapshots.path().join("README");
    std::fs::write(&unrelated, b"keep me").unwrap();

    let stop = StopToken::new();
    let handle = spawn_retention_sweeper(
        vec![recordings.path().to_path_buf(), snapshots.path().to_path_buf()],
        RetentionPolicy {
            max_age: Duration::from_millis(200),
            sweep_interval: Duration::from_millis(50),
        },
        stop.clone(),
    )
    .unwrap();

    assert!(wait_for(Duration::from_secs(5), || !snapshot.exists()));
    stop.stop();
    handle.join().unwrap();
    assert!(unrelated.exists());
}
