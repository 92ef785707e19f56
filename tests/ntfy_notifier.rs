use std::path::PathBuf;
use std::time::Duration;

use httpmock::prelude::*;

use motion_notify::analysis::AnalysisResult;
use motion_notify::{CapturedImage, Notification, Notifier, NotifySettings, NtfyNotifier};

fn write_image(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("intruder_20251230_224501.jpg");
    std::fs::write(&path, b"\xff\xd8fake-jpeg\xff\xd9").expect("write image");
    path
}

fn settings(url: String) -> NotifySettings {
    NotifySettings {
        topic_url: url,
        timeout: Duration::from_secs(5),
        ..NotifySettings::default()
    }
}

#[test]
fn uploads_image_with_headers() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(PUT)
            .path("/porch")
            .header("Title", "ALERT: HUMAN DETECTED")
            .header("Priority", "high")
            .header("Tags", "warning,skull,human")
            .header("Filename", "intruder.jpg")
            .header(
                "Message",
                "Motion detected at 2025-12-30 22:45:01 - HUMAN DETECTED - 1 person detected",
            )
            .header("Authorization", "Bearer tk_secret");
        then.status(200).body(r#"{"id":"abc"}"#);
    });

    let dir = tempfile::tempdir().unwrap();
    let image = CapturedImage {
        path: write_image(&dir),
        timestamp: "2025-12-30 22:45:01".to_string(),
    };
    let settings = NotifySettings {
        access_token: Some("tk_secret".to_string()),
        ..settings(server.url("/porch"))
    };
    let analysis = AnalysisResult {
        summary: "HUMAN DETECTED - 1 person detected".to_string(),
        human_count: 1,
    };
    let notification = Notification::for_capture(&image, Some(&analysis), &settings);

    let mut notifier = NtfyNotifier::new(&settings);
    notifier.send(&notification).expect("send");
    mock.assert();
}

#[test]
fn server_errors_are_reported() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(PUT).path("/porch");
        then.status(429).body("rate limited");
    });

    let dir = tempfile::tempdir().unwrap();
    let image = CapturedImage {
        path: write_image(&dir),
        timestamp: "2025-12-30 22:45:01".to_string(),
    };
    let settings = settings(server.url("/porch"));
    let notification = Notification::for_capture(&image, None, &settings);

    let mut notifier = NtfyNotifier::new(&settings);
    let err = notifier.send(&notification).unwrap_err();
    assert!(err.to_string().contains("429"));
    assert!(err.to_string().contains("rate limited"));
    mock.assert();
}
