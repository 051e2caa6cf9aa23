//! End-to-end job lifecycle through channel, harness, store and broker.

mod common;

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::Fixture;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lumen_db::models::status::JobRunStatus;
use lumen_worker::storage::{FsImageStore, ImageStore};
use lumen_worker::transform::{DefaultTransformer, ImageTransformer};
use lumen_worker::workers::{self, BuiltinConcurrency, BuiltinDeps};
use lumen_worker::{handler_fn, JobError, JobMessage, JobRegistry, JobRunStore, RunOutcome, WorkerSpec};
use serde_json::json;

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([10, 120, 200]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

async fn builtin_fixture(media: &std::path::Path) -> (Fixture, Arc<FsImageStore>) {
    let store = Arc::new(FsImageStore::new(media));
    let deps = BuiltinDeps {
        store: store.clone(),
        catalog: store.clone(),
        transformer: Arc::new(DefaultTransformer),
    };
    let builder = workers::register_builtin(JobRegistry::builder(), &deps, BuiltinConcurrency::default());
    (Fixture::start(builder).await, store)
}

// ---- Test: image_process happy path ----

#[tokio::test]
async fn image_process_job_runs_to_success() {
    let media = tempfile::tempdir().unwrap();
    let (mut fx, images) = builtin_fixture(media.path()).await;
    images.write("abc123", "photo.jpg", &jpeg(800, 600)).await.unwrap();

    let job_id = fx
        .enqueuer
        .enqueue_json("image_process", &json!({"image_uid": "abc123", "filename": "photo.jpg"}))
        .await
        .unwrap();

    let events = fx.events_for(&job_id).await;
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec!["job-started", "job-progress", "job-progress", "job-progress", "job-completed"]
    );

    let started = &events[0].1;
    assert_eq!(started["type"], "image_process");
    assert_eq!(started["imageRef"], "abc123");
    assert_eq!(started["filename"], "photo.jpg");

    let percents: Vec<u64> = events
        .iter()
        .filter(|(name, _)| name == "job-progress")
        .map(|(_, data)| data["progress"].as_u64().unwrap())
        .collect();
    assert!(percents.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(percents.last(), Some(&90));

    let run = fx.finished_run(&job_id).await;
    assert_eq!(run.status(), Some(JobRunStatus::Success));
    let started_at = run.started_at.unwrap();
    let completed_at = run.completed_at.unwrap();
    assert!(started_at < completed_at);
    assert!(run.error_message.is_none());

    let thumb = images.read("abc123", "photo-thumb.jpg").await.unwrap();
    let fields = DefaultTransformer.probe(&thumb).unwrap();
    assert_eq!((fields.width, fields.height), (200, 150));

    fx.shutdown().await;
}

// ---- Test: exif_process writes metadata ----

#[tokio::test]
async fn exif_process_writes_probed_fields() {
    let media = tempfile::tempdir().unwrap();
    let (mut fx, images) = builtin_fixture(media.path()).await;
    images.write("abc123", "photo.jpg", &jpeg(64, 32)).await.unwrap();

    let job_id = fx
        .enqueuer
        .enqueue_json("exif_process", &json!({"image_uid": "abc123", "filename": "photo.jpg"}))
        .await
        .unwrap();

    let events = fx.events_for(&job_id).await;
    let steps: Vec<(String, u64)> = events
        .iter()
        .filter(|(name, _)| name == "job-progress")
        .map(|(_, d)| (d["step"].as_str().unwrap().to_string(), d["progress"].as_u64().unwrap()))
        .collect();
    assert_eq!(
        steps,
        vec![
            ("Processing EXIF data".to_string(), 30),
            ("Updating database".to_string(), 90),
        ]
    );

    let doc: serde_json::Value =
        serde_json::from_slice(&images.read("abc123", "photo-exif.json").await.unwrap()).unwrap();
    assert_eq!(doc["fields"], json!({"width": 64, "height": 32, "format": "jpg"}));
    assert_eq!(
        fx.registry.scratch("exif_process").get("last_image_uid"),
        Some(json!("abc123"))
    );

    fx.shutdown().await;
}

// ---- Test: handler error ----

#[tokio::test]
async fn handler_error_is_announced_and_recorded() {
    let builder = JobRegistry::builder().worker(WorkerSpec::new(
        "image_process",
        handler_fn(|_ctx| async { Err(JobError::failed("decode failed")) }),
    ));
    let mut fx = Fixture::start(builder).await;

    let job_id = fx
        .enqueuer
        .enqueue_json("image_process", &json!({"image_uid": "abc123", "filename": "photo.jpg"}))
        .await
        .unwrap();

    let events = fx.events_for(&job_id).await;
    let (name, data) = events.last().unwrap();
    assert_eq!(name, "job-failed");
    assert_eq!(data["error"], "decode failed");

    let run = fx.finished_run(&job_id).await;
    assert_eq!(run.status(), Some(JobRunStatus::Failed));
    assert_eq!(run.error_message.as_deref(), Some("decode failed"));
    assert_eq!(run.error_kind.as_deref(), Some("handler"));
    // Every terminal transition stamps completed_at.
    assert!(run.completed_at.is_some());

    fx.shutdown().await;
}

// ---- Test: long errors are truncated ----

#[tokio::test]
async fn long_error_messages_are_truncated() {
    let builder = JobRegistry::builder().worker(WorkerSpec::new(
        "noisy",
        handler_fn(|_ctx| async { Err(JobError::failed("é".repeat(5000))) }),
    ));
    let mut fx = Fixture::start(builder).await;

    let job_id = fx.enqueuer.enqueue("noisy", b"{}".to_vec()).await.unwrap();
    let events = fx.events_for(&job_id).await;
    assert_eq!(events.last().unwrap().1["error"].as_str().unwrap().chars().count(), 1024);

    let run = fx.finished_run(&job_id).await;
    assert_eq!(run.error_message.unwrap().chars().count(), 1024);

    fx.shutdown().await;
}

// ---- Test: bad payloads and panics do not stop the worker ----

#[tokio::test]
async fn worker_survives_bad_payload_and_panic() {
    let builder = JobRegistry::builder().worker(WorkerSpec::new(
        "fragile",
        handler_fn(|ctx| async move {
            let payload: serde_json::Value = ctx.payload()?;
            if payload["explode"] == true {
                panic!("kaboom");
            }
            Ok(())
        }),
    ));
    let mut fx = Fixture::start(builder).await;

    let bad = fx.enqueuer.enqueue("fragile", b"not json".to_vec()).await.unwrap();
    let boom = fx.enqueuer.enqueue_json("fragile", &json!({"explode": true})).await.unwrap();
    let good = fx.enqueuer.enqueue_json("fragile", &json!({"explode": false})).await.unwrap();

    let bad_run = fx.finished_run(&bad).await;
    assert_eq!(bad_run.error_kind.as_deref(), Some("payload"));

    let boom_run = fx.finished_run(&boom).await;
    assert_eq!(boom_run.error_kind.as_deref(), Some("panic"));
    assert_eq!(boom_run.error_message.as_deref(), Some("handler panicked: kaboom"));

    let good_run = fx.finished_run(&good).await;
    assert_eq!(good_run.status(), Some(JobRunStatus::Success));

    fx.wait_idle("fragile").await;
    let worker = fx.registry.get("fragile").unwrap();
    assert!(worker.last_run().is_some());

    fx.shutdown().await;
}

// ---- Test: duplicate delivery ----

#[tokio::test]
async fn duplicate_delivery_runs_handler_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let builder = JobRegistry::builder().worker(WorkerSpec::new(
        "once",
        handler_fn(move |_ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
    ));
    let fx = Fixture::start(builder).await;
    let worker = Arc::clone(fx.registry.get("once").unwrap());

    // Record a pending run without publishing, then deliver it twice.
    let message = JobMessage::new("once", b"{}".to_vec());
    fx.store
        .insert(lumen_db::models::job_run::NewJobRun {
            uid: message.id.clone(),
            job_type: "once".into(),
            topic: "once".into(),
            image_ref: None,
            payload: None,
            enqueued_at: message.enqueued_at,
        })
        .await
        .unwrap();

    assert_eq!(fx.harness.process(&worker, message.clone()).await, RunOutcome::Completed);
    assert_eq!(fx.harness.process(&worker, message).await, RunOutcome::Duplicate);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Untracked messages still run.
    let untracked = JobMessage::new("once", b"{}".to_vec());
    assert_eq!(fx.harness.process(&worker, untracked).await, RunOutcome::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    fx.shutdown().await;
}

// ---- Test: cooperative cancellation ----

#[tokio::test]
async fn cancel_signals_running_handler() {
    let builder = JobRegistry::builder().worker(WorkerSpec::new(
        "slow",
        handler_fn(|ctx| async move {
            ctx.cancel.cancelled().await;
            Err(JobError::Canceled)
        }),
    ));
    let mut fx = Fixture::start(builder).await;
    let job_id = fx.enqueuer.enqueue("slow", b"{}".to_vec()).await.unwrap();

    let (name, _) = fx.next_event().await;
    assert_eq!(name, "job-started");

    let worker = Arc::clone(fx.registry.get("slow").unwrap());
    assert_eq!(worker.cancel(), 1);
    assert!(worker.is_canceled());

    let run = fx.finished_run(&job_id).await;
    assert_eq!(run.error_kind.as_deref(), Some("canceled"));
    fx.wait_idle("slow").await;
    assert!(!worker.is_canceled());

    fx.shutdown().await;
}
