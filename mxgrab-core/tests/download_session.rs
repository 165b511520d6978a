#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mxgrab_core::config::DownloadSection;
use mxgrab_core::download::{DownloadError, DownloadOutcome, Downloader};
use mxgrab_core::{ProgressEvent, ProgressObserver, SessionControl};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

const MANIFEST: &str = "https://cdn.example/a.m3u8";

/// Writes a stand-in for the download helper. `body` runs after `$out` has
/// been set to the value following `-o`.
fn fake_helper(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("yt-dlp");
    let script = format!(
        "#!/bin/sh\nout=\"\"\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"-o\" ]; then out=\"$2\"; shift; fi\n  shift\ndone\n{body}\n"
    );
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn write_bytes(count: usize) -> String {
    format!("dd if=/dev/zero of=\"$out\" bs={count} count=1 2>/dev/null")
}

fn downloader(helper: PathBuf) -> Downloader {
    Downloader::new(helper, PathBuf::from("/usr/bin/ffmpeg"), DownloadSection::default())
}

fn recording_observer() -> (Arc<Mutex<Vec<ProgressEvent>>>, Arc<dyn ProgressObserver>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let observer = move |fraction: f64, message: &str| {
        sink.lock().unwrap().push(ProgressEvent {
            fraction,
            message: message.to_string(),
        });
    };
    (events, Arc::new(observer))
}

#[tokio::test]
async fn completed_download_reports_remapped_progress() {
    let dir = TempDir::new().unwrap();
    let body = format!(
        "echo '[download] Destination: video.mp4'\necho '[download]  10.0% of 1.00MiB'\necho '[download]  35.5% of 1.00MiB'\n{}\necho '[download] 100% of 1.00MiB'\nexit 0",
        write_bytes(20_000)
    );
    let helper = fake_helper(dir.path(), &body);
    let output = dir.path().join("out.mp4");
    let (events, observer) = recording_observer();

    let handle = downloader(helper)
        .start(MANIFEST, &output, SessionControl::new(), observer)
        .unwrap();
    assert!(handle.pid().is_some());
    let outcome = timeout(Duration::from_secs(10), handle.wait())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        outcome,
        DownloadOutcome::Completed {
            path: output.clone(),
            bytes: 20_000
        }
    );
    let events = events.lock().unwrap().clone();
    let fractions: Vec<f64> = events.iter().map(|e| e.fraction).collect();
    assert_eq!(fractions.len(), 3);
    assert!(fractions.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!((fractions[0] - 0.54).abs() < 1e-9);
    assert!((fractions[2] - 0.9).abs() < 1e-9);
    assert_eq!(events[1].message, "Downloading: 35.5%");
}

#[tokio::test]
async fn non_zero_exit_is_a_failure_with_detail() {
    let dir = TempDir::new().unwrap();
    let helper = fake_helper(
        dir.path(),
        "echo 'ERROR: unable to download video data: HTTP Error 403: Forbidden' >&2\nexit 1",
    );
    let (_, observer) = recording_observer();
    let handle = downloader(helper)
        .start(MANIFEST, &dir.path().join("out.mp4"), SessionControl::new(), observer)
        .unwrap();
    let err = timeout(Duration::from_secs(10), handle.wait())
        .await
        .unwrap()
        .unwrap_err();
    match err {
        DownloadError::Failed { code, detail } => {
            assert_eq!(code, Some(1));
            assert!(detail.contains("403"), "detail was {detail}");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn undersized_artifact_is_rejected() {
    let dir = TempDir::new().unwrap();
    let helper = fake_helper(dir.path(), &format!("{}\nexit 0", write_bytes(5_000)));
    let (_, observer) = recording_observer();
    let handle = downloader(helper)
        .start(MANIFEST, &dir.path().join("out.mp4"), SessionControl::new(), observer)
        .unwrap();
    let err = timeout(Duration::from_secs(10), handle.wait())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        DownloadError::ArtifactInvalid {
            size: 5_000,
            minimum: 10_000,
            ..
        }
    ));
}

#[tokio::test]
async fn missing_helper_fails_to_spawn() {
    let dir = TempDir::new().unwrap();
    let (_, observer) = recording_observer();
    let result = downloader(dir.path().join("absent"))
        .start(MANIFEST, &dir.path().join("out.mp4"), SessionControl::new(), observer);
    assert!(matches!(result, Err(DownloadError::Spawn { .. })));
}

#[tokio::test]
async fn cancel_kills_and_reaps_the_helper() {
    let dir = TempDir::new().unwrap();
    let helper = fake_helper(
        dir.path(),
        "echo '[download]   5.0% of 1.00MiB'\nexec sleep 30",
    );
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let control = SessionControl::new();
    let handle = downloader(helper)
        .start(MANIFEST, &dir.path().join("out.mp4"), control.clone(), Arc::new(tx))
        .unwrap();
    let pid = handle.pid().unwrap();

    let first = timeout(Duration::from_secs(10), rx.recv()).await.unwrap().unwrap();
    assert!((first.fraction - 0.52).abs() < 1e-9);

    assert!(handle.cancel());
    let outcome = timeout(Duration::from_secs(10), handle.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, DownloadOutcome::Cancelled);

    let alive = std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .unwrap()
        .success();
    assert!(!alive, "helper process {pid} still running");
}

#[tokio::test]
async fn pause_freezes_progress_until_resume() {
    let dir = TempDir::new().unwrap();
    let body = format!(
        "echo '[download]  10.0% of 1.00MiB'\nsleep 0.3\necho '[download]  50.0% of 1.00MiB'\necho '[download] 100.0% of 1.00MiB'\n{}\nexit 0",
        write_bytes(20_000)
    );
    let helper = fake_helper(dir.path(), &body);
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let control = SessionControl::new();
    let handle = downloader(helper)
        .start(MANIFEST, &dir.path().join("out.mp4"), control.clone(), Arc::new(tx))
        .unwrap();

    let first = timeout(Duration::from_secs(10), rx.recv()).await.unwrap().unwrap();
    let frozen = first.fraction;
    assert!(handle.pause());

    // the helper finishes writing while paused; nothing may be consumed
    tokio::time::sleep(Duration::from_millis(800)).await;
    let mut during_pause = Vec::new();
    while let Ok(event) = rx.try_recv() {
        during_pause.push(event);
    }
    assert_eq!(during_pause.len(), 1);
    assert!(during_pause[0].message.starts_with("Paused at"));
    assert!((during_pause[0].fraction - frozen).abs() < 1e-9);

    assert!(handle.resume());
    let outcome = timeout(Duration::from_secs(10), handle.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, DownloadOutcome::Completed { bytes: 20_000, .. }));

    let mut after = Vec::new();
    while let Ok(event) = rx.try_recv() {
        after.push(event);
    }
    assert_eq!(after[0].message, "Download resumed...");
    assert!((after[0].fraction - frozen).abs() < 1e-9);
    assert!(after.iter().all(|event| event.fraction >= frozen));
    assert!((after.last().unwrap().fraction - 0.9).abs() < 1e-9);
}

fn process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .unwrap()
        .success()
}

#[tokio::test]
async fn dropping_the_handle_stops_the_helper() {
    let dir = TempDir::new().unwrap();
    let helper = fake_helper(
        dir.path(),
        "echo '[download]   5.0% of 1.00MiB'\nexec sleep 30",
    );
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let handle = downloader(helper)
        .start(MANIFEST, &dir.path().join("out.mp4"), SessionControl::new(), Arc::new(tx))
        .unwrap();
    let pid = handle.pid().unwrap();
    timeout(Duration::from_secs(10), rx.recv()).await.unwrap().unwrap();

    // the handle owns the only control sender
    drop(handle);

    let mut stopped = false;
    for _ in 0..50 {
        if !process_alive(pid) {
            stopped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(stopped, "helper process {pid} outlived its handle");
    // supervisor finished and released the observer
    assert!(timeout(Duration::from_secs(5), rx.recv()).await.unwrap().is_none());
}
