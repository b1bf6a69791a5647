use crate::api::{
    ApiError, FinalizeResponse, MetadataPatch, PhotoBackend, ProgressCallback, UploadRequest,
    UploadResult,
};
use crate::models::{ImageId, ImageMetadata};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Token-gated access to the photo backend.
///
/// Every mutating call fails with `ApiError::MissingToken` before any
/// request is dispatched when no upload token is configured.
/// Cloning is cheap (clones Arc).
#[derive(Clone)]
pub struct PhotoApiClient {
    backend: Arc<dyn PhotoBackend>,
    token: Option<String>,
}

impl std::fmt::Debug for PhotoApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotoApiClient")
            .field("backend", &"<dyn PhotoBackend>")
            .field("has_token", &self.has_token())
            .finish()
    }
}

impl PhotoApiClient {
    pub fn new(backend: Arc<dyn PhotoBackend>, token: Option<String>) -> Self {
        let token = token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Self { backend, token }
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn require_token(&self) -> Result<&str, ApiError> {
        self.token.as_deref().ok_or(ApiError::MissingToken)
    }

    pub async fn upload_image(
        &self,
        request: UploadRequest,
        on_progress: ProgressCallback,
    ) -> Result<UploadResult, ApiError> {
        let token = self.require_token()?;
        let expected_id = request.metadata.image_id.clone();

        let result = self
            .backend
            .upload_image(token, request, on_progress)
            .await?;

        if result.image_id != expected_id {
            return Err(ApiError::InvalidResponse(format!(
                "Backend stored {} but {} was uploaded",
                result.image_id, expected_id
            )));
        }

        Ok(result)
    }

    pub async fn finalize_image_batch(
        &self,
        items: &[ImageMetadata],
    ) -> Result<FinalizeResponse, ApiError> {
        let token = self.require_token()?;
        info!("Finalizing {} image(s)", items.len());
        self.backend.finalize_image_batch(token, items).await
    }

    pub async fn update_image_metadata(
        &self,
        image_id: &ImageId,
        patch: &MetadataPatch,
    ) -> Result<(), ApiError> {
        let token = self.require_token()?;
        if patch.is_empty() {
            debug!("Skipping empty metadata patch for {}", image_id);
            return Ok(());
        }
        self.backend
            .update_image_metadata(token, image_id, patch)
            .await
    }

    pub async fn delete_image(&self, image_id: &ImageId) -> Result<(), ApiError> {
        let token = self.require_token()?;
        info!("Deleting image {}", image_id);
        self.backend.delete_image(token, image_id).await
    }

    /// Delete several images, continuing past individual failures.
    /// Returns the ids that could not be deleted with their errors.
    pub async fn delete_images(
        &self,
        image_ids: &[ImageId],
    ) -> Result<Vec<(ImageId, ApiError)>, ApiError> {
        self.require_token()?;

        let mut failures = Vec::new();
        for image_id in image_ids {
            if let Err(e) = self.delete_image(image_id).await {
                warn!("Failed to delete {}: {}", image_id, e);
                failures.push((image_id.clone(), e));
            }
        }
        Ok(failures)
    }

    /// Fetch the whole catalog by following page cursors.
    ///
    /// Returns `Ok(None)` when cancelled, including mid-request.
    pub async fn list_all_images(
        &self,
        page_size: usize,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<ImageMetadata>>, ApiError> {
        let page_size = page_size.max(1);
        let mut images = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors = HashSet::new();

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let request = self
                .backend
                .list_images(self.token.as_deref(), page_size, cursor.as_deref());
            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Listing cancelled after {} image(s)", images.len());
                    return Ok(None);
                }
                page = request => page?,
            };

            debug!("Fetched page with {} image(s)", page.items.len());
            images.extend(page.items);

            match page.next_cursor {
                Some(next) if !next.is_empty() => {
                    if !seen_cursors.insert(next.clone()) {
                        return Err(ApiError::InvalidResponse(format!(
                            "Listing cursor {} repeated",
                            next
                        )));
                    }
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        Ok(Some(images))
    }
}
