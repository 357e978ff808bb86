//! Upload queue end-to-end tests against a mock intake.
//!
//! Stands up a loopback HTTP intake that records every multipart POST
//! and can be scripted to fail, then drives real drain passes over a
//! real SQLite queue.

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{routing::post, Json, Router};
use camcap::settings::SettingsStore;
use camcap::store::{ImageRepository, ImageStore, NewImage};
use camcap::uploader::{ConnectivityMonitor, UploadWorker};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct Received {
    field: String,
    filename: String,
    content_type: String,
    size: usize,
}

#[derive(Clone, Default)]
struct Intake {
    received: Arc<Mutex<Vec<Received>>>,
    /// Scripted status codes, consumed per request; empty means 200
    statuses: Arc<Mutex<VecDeque<u16>>>,
}

impl Intake {
    fn push_statuses(&self, codes: &[u16]) {
        self.statuses.lock().unwrap().extend(codes.iter().copied());
    }

    fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }
}

async fn intake_upload(
    State(intake): State<Intake>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    while let Some(field) = multipart.next_field().await.unwrap() {
        let received = Received {
            field: field.name().unwrap_or("").to_string(),
            filename: field.file_name().unwrap_or("").to_string(),
            content_type: field.content_type().unwrap_or("").to_string(),
            size: field.bytes().await.unwrap().len(),
        };
        intake.received.lock().unwrap().push(received);
    }

    let status = intake
        .statuses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(200);
    (
        StatusCode::from_u16(status).unwrap(),
        Json(serde_json::json!({"Location": "x"})),
    )
}

async fn start_intake() -> (Intake, String) {
    let intake = Intake::default();
    let app = Router::new()
        .route("/upload", post(intake_upload))
        .with_state(intake.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (intake, format!("http://{}", addr))
}

struct Fixture {
    _dir: tempfile::TempDir,
    settings: Arc<SettingsStore>,
    repo: ImageRepository,
    worker: UploadWorker,
}

/// Queue fixture wired to `base_url` with instant retries.
async fn fixture(base_url: &str, probe_url: &str, extra: &[(&str, &str)]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = ImageStore::open(dir.path().join("camcap.db")).await.unwrap();
    let settings = Arc::new(SettingsStore::load(dir.path().join(".env")).unwrap());

    let mut patch: HashMap<String, String> = [
        ("UPLOAD_ENDPOINT", format!("{}/upload", base_url)),
        ("UPLOAD_FIELD_NAME", "singleFile".to_string()),
        ("RETRY_DELAY", "0".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    for (k, v) in extra {
        patch.insert(k.to_string(), v.to_string());
    }
    settings.update(patch).await.unwrap();

    let repo = store.repository();
    let worker = UploadWorker::new(settings.clone(), repo.clone())
        .with_connectivity(ConnectivityMonitor::with_probe_url(probe_url));

    Fixture {
        _dir: dir,
        settings,
        repo,
        worker,
    }
}

/// Insert a capture row with a real JPEG file on disk.
async fn insert_capture(fixture: &Fixture, source: &str, epoch: i64) -> i64 {
    let filename = format!("{}_{}.jpg", source, epoch);
    let path = fixture._dir.path().join(&filename);
    tokio::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3])
        .await
        .unwrap();

    fixture
        .repo
        .insert(NewImage {
            source: source.to_string(),
            filename,
            path: path.display().to_string(),
            captured_at: epoch,
            size_bytes: 7,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn queued_rows_drain_in_id_order_with_configured_part() {
    let (intake, base_url) = start_intake().await;
    let fx = fixture(&base_url, &base_url, &[]).await;

    let ids = [
        insert_capture(&fx, "r1", 1700000000).await,
        insert_capture(&fx, "r2", 1700000002).await,
        insert_capture(&fx, "r1", 1700000004).await,
    ];

    fx.worker.drain_pass().await;

    for id in ids {
        let row = fx.repo.get(id).await.unwrap().unwrap();
        assert!(row.uploaded, "row {} not uploaded", id);
        assert_eq!(row.attempts, 1);
        assert!(row.last_error.is_none());
    }

    let received = intake.received();
    assert_eq!(received.len(), 3);
    // Ascending id order
    assert_eq!(received[0].filename, "r1_1700000000.jpg");
    assert_eq!(received[1].filename, "r2_1700000002.jpg");
    assert_eq!(received[2].filename, "r1_1700000004.jpg");
    for upload in &received {
        assert_eq!(upload.field, "singleFile");
        assert_eq!(upload.content_type, "image/jpeg");
        assert_eq!(upload.size, 7);
    }
}

#[tokio::test]
async fn offline_interval_buffers_until_reconnect() {
    let (intake, base_url) = start_intake().await;
    // Probe target refuses connections: the drain loop must hold
    let fx = fixture(&base_url, "http://127.0.0.1:9/", &[]).await;

    let ids = [
        insert_capture(&fx, "r1", 1700000000).await,
        insert_capture(&fx, "r1", 1700000002).await,
        insert_capture(&fx, "r1", 1700000004).await,
    ];

    fx.worker.drain_pass().await;
    assert!(!fx.worker.online().await);
    assert!(intake.received().is_empty());
    for id in ids {
        let row = fx.repo.get(id).await.unwrap().unwrap();
        assert!(!row.uploaded);
        assert_eq!(row.attempts, 0);
    }

    // Reconnect: the same queue drained by a worker whose probe can
    // see the network delivers everything, oldest id first
    let reconnected = UploadWorker::new(fx.settings.clone(), fx.repo.clone())
        .with_connectivity(ConnectivityMonitor::with_probe_url(base_url.clone()));
    reconnected.drain_pass().await;

    for id in ids {
        assert!(fx.repo.get(id).await.unwrap().unwrap().uploaded);
    }
    let received = intake.received();
    assert_eq!(received.len(), 3);
    assert_eq!(received[0].filename, "r1_1700000000.jpg");
    assert_eq!(received[2].filename, "r1_1700000004.jpg");
}

#[tokio::test]
async fn transient_500s_then_success_counts_attempts() {
    let (intake, base_url) = start_intake().await;
    let fx = fixture(&base_url, &base_url, &[("MAX_RETRIES", "3")]).await;

    intake.push_statuses(&[500, 500]);
    let id = insert_capture(&fx, "r1", 1700000000).await;

    fx.worker.drain_pass().await;

    let row = fx.repo.get(id).await.unwrap().unwrap();
    assert!(row.uploaded);
    assert_eq!(row.attempts, 3);
    assert!(row.last_error.is_none());
    assert_eq!(intake.received().len(), 3);
}

#[tokio::test]
async fn exhausted_retries_keep_the_row_for_the_next_pass() {
    let (intake, base_url) = start_intake().await;
    let fx = fixture(&base_url, &base_url, &[("MAX_RETRIES", "2")]).await;

    intake.push_statuses(&[500, 502]);
    let id = insert_capture(&fx, "r1", 1700000000).await;

    fx.worker.drain_pass().await;

    let row = fx.repo.get(id).await.unwrap().unwrap();
    assert!(!row.uploaded);
    assert_eq!(row.attempts, 2);
    assert!(row.last_error.unwrap().contains("502"));

    // Intake recovered: the next pass delivers
    fx.worker.drain_pass().await;
    let row = fx.repo.get(id).await.unwrap().unwrap();
    assert!(row.uploaded);
    assert_eq!(row.attempts, 3);
    assert!(row.last_error.is_none());
}

#[tokio::test]
async fn attempts_stay_monotone_across_passes() {
    let (intake, base_url) = start_intake().await;
    let fx = fixture(&base_url, &base_url, &[("MAX_RETRIES", "1")]).await;

    intake.push_statuses(&[503]);
    let id = insert_capture(&fx, "r2", 1700000000).await;

    fx.worker.drain_pass().await;
    let first = fx.repo.get(id).await.unwrap().unwrap().attempts;
    fx.worker.drain_pass().await;
    let second = fx.repo.get(id).await.unwrap().unwrap().attempts;
    assert!(second >= first);
}
