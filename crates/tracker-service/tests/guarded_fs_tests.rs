//! Guarded filesystem operations against real files.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

use tracker_core::config::TrackerConfig;
use tracker_core::context::Passive;
use tracker_core::control::ControlStatus;
use tracker_core::identity::FixedIdentity;
use tracker_core::record::{DeletionEvent, EVENT_RECORD_SIZE};
use tracker_core::subsystem::Subsystem;
use tracker_service::intercept::GuardedFs;

fn setup(dir: &Path) -> (Arc<Subsystem>, GuardedFs) {
    let subsystem = Arc::new(
        Subsystem::start(
            &TrackerConfig::default(),
            Arc::new(FixedIdentity::new("guarded-test", "2025-03-02 14:30:45")),
        )
        .unwrap(),
    );
    let fs = GuardedFs::with_base(subsystem.clone(), dir.to_path_buf());
    (subsystem, fs)
}

fn track(subsystem: &Subsystem, path: &Path, protected: bool) {
    let status = Passive::enter(|cx| {
        subsystem
            .control()
            .add_file(cx, path.to_str().unwrap(), protected)
    });
    assert_eq!(status, ControlStatus::Ok);
}

fn next_event(subsystem: &Subsystem) -> Option<DeletionEvent> {
    let mut buf = [0u8; EVENT_RECORD_SIZE];
    Passive::enter(|cx| subsystem.control().drain_one_event(cx, &mut buf)).ok()
}

#[test]
fn protected_file_survives_remove() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("a.txt");
    fs::write(&file, b"keep").unwrap();
    let (subsystem, gfs) = setup(dir.path());
    track(&subsystem, &file, true);

    let err = gfs.remove_file(&file).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    let err = gfs.set_delete_disposition(&file).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert!(file.exists());
    assert!(next_event(&subsystem).is_none());
}

#[test]
fn tracked_file_removal_is_recorded() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("b.txt");
    fs::write(&file, b"gone").unwrap();
    let (subsystem, gfs) = setup(dir.path());
    track(&subsystem, &file, false);

    gfs.remove_file(Path::new("b.txt")).unwrap();
    assert!(!file.exists());

    let event = next_event(&subsystem).unwrap();
    assert_eq!(event.file_path, file.to_str().unwrap());
    assert_eq!(event.process_name, "guarded-test");
    assert!(next_event(&subsystem).is_none());
}

#[test]
fn failed_removal_is_not_recorded() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.txt");
    let (subsystem, gfs) = setup(dir.path());
    track(&subsystem, &missing, false);

    let err = gfs.remove_file(&missing).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(next_event(&subsystem).is_none());
}

#[test]
fn create_and_rename_are_not_blocked() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("c.txt");
    let moved = dir.path().join("d.txt");
    let (subsystem, gfs) = setup(dir.path());
    track(&subsystem, &file, true);

    gfs.create(&file).unwrap();
    assert!(file.exists());
    gfs.rename(&file, &moved).unwrap();
    assert!(moved.exists());
    assert!(next_event(&subsystem).is_none());
}

#[test]
fn delete_disposition_on_tracked_file_is_recorded() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("e.txt");
    fs::write(&file, b"x").unwrap();
    let (subsystem, gfs) = setup(dir.path());
    track(&subsystem, &file, false);

    gfs.set_delete_disposition(&file).unwrap();
    assert!(!file.exists());
    assert_eq!(next_event(&subsystem).unwrap().sequence_id, 1);
}
