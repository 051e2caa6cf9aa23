#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use lumen_api::config::ServerConfig;
use lumen_api::router::build_app_router;
use lumen_api::state::AppState;
use lumen_events::{BrokerConfig, EventBroker, StreamOptions};
use lumen_worker::storage::FsImageStore;
use lumen_worker::transform::DefaultTransformer;
use lumen_worker::workers::{self, BuiltinConcurrency, BuiltinDeps};
use lumen_worker::{
    Enqueuer, JobRegistry, JobRunStore, MemoryJobRunStore, MessageChannel, RegistryBuilder, WorkerHarness,
};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
    }
}

/// A fully wired application backed by the in-memory run store and a
/// temporary media root.
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub images: Arc<FsImageStore>,
    pub media: TempDir,
    /// Present when the worker harness was started.
    pub harness: Option<JoinHandle<()>>,
    harness_cancel: CancellationToken,
    broker_handle: JoinHandle<()>,
}

impl TestApp {
    /// Built-in workers, harness running.
    pub async fn start() -> Self {
        Self::build(None, true).await
    }

    /// Built-in workers, harness not running: enqueued jobs stay queued.
    pub async fn start_idle() -> Self {
        Self::build(None, false).await
    }

    /// Custom registry, harness running.
    pub async fn with_registry(builder: RegistryBuilder) -> Self {
        Self::build(Some(builder), true).await
    }

    async fn build(builder: Option<RegistryBuilder>, run_harness: bool) -> Self {
        let media = tempfile::tempdir().unwrap();
        let images = Arc::new(FsImageStore::new(media.path()));
        let builder = builder.unwrap_or_else(|| {
            let deps = BuiltinDeps {
                store: images.clone(),
                catalog: images.clone(),
                transformer: Arc::new(DefaultTransformer),
            };
            workers::register_builtin(JobRegistry::builder(), &deps, BuiltinConcurrency::default())
        });
        let registry = Arc::new(builder.build().unwrap());

        let shutdown = CancellationToken::new();
        let (broker, broker_handle) = EventBroker::spawn(BrokerConfig::default(), shutdown.child_token());
        let channel = MessageChannel::default();
        let store: Arc<dyn JobRunStore> = Arc::new(MemoryJobRunStore::new());
        let enqueuer = Enqueuer::new(channel.clone(), store.clone(), registry.clone());

        let harness_cancel = CancellationToken::new();
        let harness = run_harness.then(|| {
            WorkerHarness::new(registry.clone(), channel.clone(), store.clone(), broker.clone())
                .spawn(harness_cancel.clone())
        });

        let config = test_config();
        let state = AppState {
            pool: None,
            config: Arc::new(config.clone()),
            broker,
            registry,
            channel,
            store,
            enqueuer,
            stream_options: StreamOptions::default(),
            shutdown,
        };

        Self {
            app: build_app_router(state.clone(), &config),
            state,
            images,
            media,
            harness,
            harness_cancel,
            broker_handle,
        }
    }

    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.request(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        self.request(Request::delete(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.send_json(Method::POST, uri, body).await
    }

    pub async fn put_json(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.send_json(Method::PUT, uri, body).await
    }

    async fn send_json(&self, method: Method, uri: &str, body: serde_json::Value) -> Response<Body> {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.request(request).await
    }

    /// Poll `GET /api/v1/jobs/{id}` until the run is terminal.
    pub async fn wait_for_run(&self, id: &str) -> serde_json::Value {
        let uri = format!("/api/v1/jobs/{id}");
        for _ in 0..500 {
            let json = body_json(self.get(&uri).await).await;
            let status = json["data"]["status"].as_str().unwrap_or_default().to_string();
            if status == "success" || status == "failed" {
                return json["data"].clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    /// Poll until the broker history holds `count` entries.
    pub async fn wait_for_history(&self, count: usize) {
        for _ in 0..500 {
            if self.state.broker.event_history().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("history never reached {count} entries");
    }

    /// Same order as the server: drain the channel, then stop the broker.
    pub async fn shutdown(self) {
        self.state.channel.close();
        if let Some(mut harness) = self.harness {
            if tokio::time::timeout(Duration::from_secs(5), &mut harness).await.is_err() {
                self.harness_cancel.cancel();
                let _ = harness.await;
            }
        }
        self.state.shutdown.cancel();
        let _ = self.broker_handle.await;
    }
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// A solid-colour JPEG.
pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 80, 40]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}
