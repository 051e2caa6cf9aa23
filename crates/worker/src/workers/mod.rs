//! Built-in image workers and their bulk-enqueue hooks.

pub mod exif_process;
pub mod image_process;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use lumen_core::types::JobId;
use serde::{Deserialize, Serialize};

use crate::enqueue::Enqueuer;
use crate::registry::{RegistryBuilder, WorkerSpec};
use crate::source::{JobCommand, JobSource, SourceError};
use crate::storage::{ImageCatalog, ImageRef, ImageStore};
use crate::transform::ImageTransformer;

pub use exif_process::ExifProcessHandler;
pub use image_process::ImageProcessHandler;

pub const IMAGE_PROCESS: &str = "image_process";
pub const EXIF_PROCESS: &str = "exif_process";

/// Payload shared by the image workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageJobPayload {
    pub image_uid: String,
    pub filename: String,
}

impl From<ImageRef> for ImageJobPayload {
    fn from(image: ImageRef) -> Self {
        Self {
            image_uid: image.uid,
            filename: image.filename,
        }
    }
}

/// `photo.jpg` → `photo-thumb.jpg`.
pub fn thumbnail_name(filename: &str) -> String {
    let path = Path::new(filename);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(filename);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}-thumb.{ext}"),
        None => format!("{stem}-thumb"),
    }
}

/// `photo.jpg` → `photo-exif.json`.
pub fn exif_name(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    format!("{stem}-exif.json")
}

/// Collaborators for the built-in workers.
#[derive(Clone)]
pub struct BuiltinDeps {
    pub store: Arc<dyn ImageStore>,
    pub catalog: Arc<dyn ImageCatalog>,
    pub transformer: Arc<dyn ImageTransformer>,
}

/// Concurrency per built-in worker.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinConcurrency {
    pub image_process: usize,
    pub exif_process: usize,
}

impl Default for BuiltinConcurrency {
    fn default() -> Self {
        Self {
            image_process: 2,
            exif_process: 4,
        }
    }
}

/// Add `image_process` and `exif_process` to `builder`.
pub fn register_builtin(builder: RegistryBuilder, deps: &BuiltinDeps, concurrency: BuiltinConcurrency) -> RegistryBuilder {
    builder
        .worker(
            WorkerSpec::new(
                IMAGE_PROCESS,
                ImageProcessHandler::new(Arc::clone(&deps.store), Arc::clone(&deps.transformer)),
            )
            .display_name("Image Processing")
            .concurrency(concurrency.image_process)
            .source(Arc::new(ImageSource::new(IMAGE_PROCESS, deps, thumbnail_name))),
        )
        .worker(
            WorkerSpec::new(
                EXIF_PROCESS,
                ExifProcessHandler::new(Arc::clone(&deps.store), Arc::clone(&deps.transformer)),
            )
            .display_name("EXIF Processing")
            .concurrency(concurrency.exif_process)
            .source(Arc::new(ImageSource::new(EXIF_PROCESS, deps, exif_name))),
        )
}

/// Selects images from the catalogue for a [`JobCommand`].
pub struct ImageSource {
    topic: &'static str,
    catalog: Arc<dyn ImageCatalog>,
    store: Arc<dyn ImageStore>,
    /// Name of the file this worker produces for an original.
    output_name: fn(&str) -> String,
}

impl ImageSource {
    pub fn new(topic: &'static str, deps: &BuiltinDeps, output_name: fn(&str) -> String) -> Self {
        Self {
            topic,
            catalog: Arc::clone(&deps.catalog),
            store: Arc::clone(&deps.store),
            output_name,
        }
    }

    async fn select(&self, command: JobCommand, payload: &serde_json::Value) -> Result<Vec<ImageRef>, SourceError> {
        match command {
            JobCommand::All => Ok(self.catalog.list().await?),
            JobCommand::Missing => {
                let mut missing = Vec::new();
                for image in self.catalog.list().await? {
                    let output = (self.output_name)(&image.filename);
                    if !self.store.exists(&image.uid, &output).await? {
                        missing.push(image);
                    }
                }
                Ok(missing)
            }
            JobCommand::Single => {
                let uid = payload
                    .get("image_uid")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| SourceError::Payload("image_uid is required".to_string()))?;
                let image = self
                    .catalog
                    .find(uid)
                    .await?
                    .ok_or_else(|| SourceError::NotFound(format!("image {uid}")))?;
                Ok(vec![image])
            }
        }
    }
}

#[async_trait]
impl JobSource for ImageSource {
    async fn count(&self, command: JobCommand, payload: &serde_json::Value) -> Result<u64, SourceError> {
        Ok(self.select(command, payload).await?.len() as u64)
    }

    async fn enqueue(
        &self,
        command: JobCommand,
        payload: &serde_json::Value,
        enqueuer: &Enqueuer,
    ) -> Result<Vec<JobId>, SourceError> {
        let images = self.select(command, payload).await?;
        let mut ids = Vec::with_capacity(images.len());
        for image in images {
            let id = enqueuer.enqueue_json(self.topic, &ImageJobPayload::from(image)).await?;
            ids.push(id);
        }
        tracing::info!(topic = self.topic, command = %command, count = ids.len(), "Bulk enqueue finished");
        Ok(ids)
    }
}
