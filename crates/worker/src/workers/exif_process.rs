//! Metadata extraction. Writes the probed fields as `{stem}-exif.json`
//! next to the original.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::{exif_name, ImageJobPayload};
use crate::error::JobError;
use crate::storage::ImageStore;
use crate::transform::ImageTransformer;
use crate::worker::{JobContext, JobHandler};

pub struct ExifProcessHandler {
    store: Arc<dyn ImageStore>,
    transformer: Arc<dyn ImageTransformer>,
}

impl ExifProcessHandler {
    pub fn new(store: Arc<dyn ImageStore>, transformer: Arc<dyn ImageTransformer>) -> Self {
        Self { store, transformer }
    }
}

#[async_trait]
impl JobHandler for ExifProcessHandler {
    async fn handle(&self, ctx: JobContext) -> Result<(), JobError> {
        let job: ImageJobPayload = ctx.payload()?;

        let original = self.store.read(&job.image_uid, &job.filename).await?;
        ctx.progress.report("Processing EXIF data", 30);
        ctx.ensure_active()?;

        let transformer = Arc::clone(&self.transformer);
        let fields = tokio::task::spawn_blocking(move || transformer.probe(&original)).await??;

        ctx.progress.report("Updating database", 90);
        let document = json!({
            "image_uid": job.image_uid,
            "filename": job.filename,
            "fields": fields,
            "extracted_at": Utc::now(),
        });
        let bytes = serde_json::to_vec_pretty(&document).map_err(|e| JobError::failed(e.to_string()))?;
        self.store.write(&job.image_uid, &exif_name(&job.filename), &bytes).await?;

        ctx.scratch.set("last_image_uid", json!(job.image_uid));
        Ok(())
    }
}
