//! Still camera tests against a shell script standing in for `rpicam-still`.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use motion_notify::{CaptureAction, CaptureSettings, StillCamera};

fn fake_camera(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn camera(dir: &Path, script: PathBuf, timeout: Option<Duration>) -> StillCamera {
    StillCamera::new(CaptureSettings {
        command: script.display().to_string(),
        output_dir: dir.join("captures"),
        file_prefix: "intruder_".to_string(),
        timeout,
        ..CaptureSettings::default()
    })
    .expect("camera")
}

#[test]
fn writes_image_to_requested_path() {
    let dir = tempfile::tempdir().unwrap();
    // $2 is the output path after -o.
    let script = fake_camera(dir.path(), "ok.sh", r#"printf 'jpeg' > "$2""#);
    let mut camera = camera(dir.path(), script, None);

    let image = camera.capture().expect("capture");
    assert!(image.path.exists());
    assert!(image.path.starts_with(dir.path().join("captures")));
    let name = image.path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("intruder_"));
    assert!(name.ends_with(".jpg"));
    assert_eq!(image.timestamp.len(), "2025-12-30 22:45:01".len());
}

#[test]
fn non_zero_exit_is_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_camera(dir.path(), "fail.sh", "exit 3");
    let mut camera = camera(dir.path(), script, None);

    let err = camera.capture().unwrap_err();
    assert!(err.to_string().contains("exited with"));
}

#[test]
fn clean_exit_without_file_is_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_camera(dir.path(), "noop.sh", "exit 0");
    let mut camera = camera(dir.path(), script, None);

    let err = camera.capture().unwrap_err();
    assert!(err.to_string().contains("was not written"));
}

#[test]
fn hung_camera_is_killed_after_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_camera(dir.path(), "hang.sh", "exec sleep 30");
    let mut camera = camera(dir.path(), script, Some(Duration::from_millis(300)));

    let started = Instant::now();
    let err = camera.capture().unwrap_err();
    assert!(err.to_string().contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(10));
}
