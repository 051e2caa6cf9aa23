//! Thumbnail generation.

use std::sync::Arc;

use async_trait::async_trait;

use super::{thumbnail_name, ImageJobPayload};
use crate::error::JobError;
use crate::storage::ImageStore;
use crate::transform::ImageTransformer;
use crate::worker::{JobContext, JobHandler};

/// Display thumbnail width in pixels.
pub const THUMBNAIL_WIDTH: u32 = 200;

pub struct ImageProcessHandler {
    store: Arc<dyn ImageStore>,
    transformer: Arc<dyn ImageTransformer>,
}

impl ImageProcessHandler {
    pub fn new(store: Arc<dyn ImageStore>, transformer: Arc<dyn ImageTransformer>) -> Self {
        Self { store, transformer }
    }
}

#[async_trait]
impl JobHandler for ImageProcessHandler {
    async fn handle(&self, ctx: JobContext) -> Result<(), JobError> {
        let job: ImageJobPayload = ctx.payload()?;

        let original = self.store.read(&job.image_uid, &job.filename).await?;
        ctx.progress.report("Loading original", 10);
        ctx.ensure_active()?;

        let transformer = Arc::clone(&self.transformer);
        let filename = job.filename.clone();
        let thumbnail = tokio::task::spawn_blocking(move || {
            transformer.thumbnail(&original, &filename, THUMBNAIL_WIDTH)
        })
        .await??;
        ctx.progress.report("Generating thumbnail", 50);
        ctx.ensure_active()?;

        let output = thumbnail_name(&job.filename);
        self.store.write(&job.image_uid, &output, &thumbnail).await?;
        ctx.progress.report("Saving thumbnail", 90);

        tracing::debug!(
            image_uid = %job.image_uid,
            output = %output,
            bytes = thumbnail.len(),
            "Thumbnail saved",
        );
        Ok(())
    }
}
