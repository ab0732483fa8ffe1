//! Submission through the API, download, file storage and callback in one process

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    routing::{get, post},
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use downloader::api::models::JobAcceptedResponse;
use downloader::api::{AppState, router};
use downloader::config::{Config, NotifierConfig, ProcessorConfig};
use downloader::notifier::Notifier;
use downloader::observability::Metrics;
use downloader::processor::Processor;
use downloader::storage::StorageClient;
use downloader::store::{FjallJobStore, JobStore, StoreError};

const DOWNLOAD_BASE: &str = "http://downloader.test/files";

type Received = Arc<Mutex<Vec<Value>>>;

async fn receive(State(received): State<Received>, Json(body): Json<Value>) -> StatusCode {
    received.lock().unwrap().push(body);
    StatusCode::NO_CONTENT
}

/// Source of downloadable files plus a callback receiver
async fn spawn_remote(received: Received) -> SocketAddr {
    let app = Router::new()
        .route("/files/report.csv", get(|| async { "id,value\n1,42\n" }))
        .route("/files/missing.csv", get(|| async { StatusCode::NOT_FOUND }))
        .route("/hook", post(receive))
        .with_state(received);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct Pipeline {
    _temp_dir: TempDir,
    app: Router,
    store: Arc<FjallJobStore>,
    storage: StorageClient,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

fn start_pipeline() -> Pipeline {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FjallJobStore::open(temp_dir.path().join("jobs")).unwrap());
    let storage = StorageClient::in_memory();
    let metrics = Arc::new(Metrics::new());

    let processor = Arc::new(
        Processor::new(
            store.clone(),
            storage.clone(),
            &ProcessorConfig {
                max_retries: 1,
                poll_interval_ms: 20,
                ..ProcessorConfig::default()
            },
            metrics.clone(),
        )
        .unwrap(),
    );
    let notifier = Arc::new(
        Notifier::new(
            store.clone(),
            &NotifierConfig {
                download_url: DOWNLOAD_BASE.to_string(),
                poll_interval_ms: 20,
                ..NotifierConfig::default()
            },
            metrics.clone(),
        )
        .unwrap(),
    );

    let shutdown = CancellationToken::new();
    let tasks = vec![
        tokio::spawn(processor.run(shutdown.child_token())),
        tokio::spawn(notifier.run(shutdown.child_token())),
    ];

    let state = AppState::new(
        Arc::new(Config::default()),
        store.clone(),
        storage.clone(),
        metrics.clone(),
    );

    Pipeline {
        _temp_dir: temp_dir,
        app: router(state),
        store,
        storage,
        metrics,
        shutdown,
        tasks,
    }
}

impl Pipeline {
    async fn submit(&self, url: String, callback_url: String) -> String {
        let request = Request::builder()
            .uri("/jobs")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "aggr_id": "batch-7",
                    "url": url,
                    "callback_url": callback_url,
                    "extra": "row=3",
                })
                .to_string(),
            ))
            .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let accepted: JobAcceptedResponse = serde_json::from_slice(&body).unwrap();
        accepted.id
    }

    async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .expect("pipeline did not stop")
                .unwrap();
        }
    }
}

async fn wait_for_callbacks(received: &Received, count: usize) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while received.lock().unwrap().len() < count {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("callbacks were not delivered in time");
}

#[tokio::test]
async fn test_successful_download_is_reported() {
    let received = Received::default();
    let remote = spawn_remote(received.clone()).await;
    let pipeline = start_pipeline();

    let id = pipeline
        .submit(
            format!("http://{remote}/files/report.csv"),
            format!("http://{remote}/hook"),
        )
        .await;

    wait_for_callbacks(&received, 1).await;

    let callback = received.lock().unwrap()[0].clone();
    assert_eq!(
        callback,
        json!({
            "success": true,
            "error": "",
            "extra": "row=3",
            "download_url": format!("{DOWNLOAD_BASE}/{id}"),
        })
    );

    let stored = pipeline.storage.download(&id).await.unwrap();
    assert_eq!(&stored[..], b"id,value\n1,42\n");

    // Delivered callbacks remove the record
    tokio::time::timeout(Duration::from_secs(5), async {
        while pipeline.store.get_job(&id).await.is_ok() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("job record was not removed");
    assert!(matches!(
        pipeline.store.get_job(&id).await,
        Err(StoreError::JobNotFound(_))
    ));

    let snapshot = pipeline.metrics.snapshot();
    assert_eq!(snapshot.jobs_accepted, 1);
    assert_eq!(snapshot.downloads_succeeded, 1);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_failed_download_is_reported() {
    let received = Received::default();
    let remote = spawn_remote(received.clone()).await;
    let pipeline = start_pipeline();

    let id = pipeline
        .submit(
            format!("http://{remote}/files/missing.csv"),
            format!("http://{remote}/hook"),
        )
        .await;

    wait_for_callbacks(&received, 1).await;

    let callback = received.lock().unwrap()[0].clone();
    assert_eq!(callback["success"], false);
    assert_eq!(callback["download_url"], "");
    assert_eq!(callback["extra"], "row=3");
    assert!(
        callback["error"].as_str().is_some_and(|e| e.contains("404")),
        "{callback}"
    );
    assert!(!pipeline.storage.exists(&id).await.unwrap());
    assert_eq!(pipeline.metrics.snapshot().downloads_failed, 1);

    pipeline.stop().await;
}
