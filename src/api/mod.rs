// # Photo API
//
// Client side of the token-gated photo backend:
// - `PhotoBackend`: transport trait (HTTP in production, in-memory mock in tests)
// - `PhotoApiClient`: checks the upload token before anything reaches the backend
// - `HttpPhotoBackend`: reqwest implementation of the REST contract

mod client;
mod http;

pub use client::PhotoApiClient;
pub use http::HttpPhotoBackend;

use crate::extract::Thumbnail;
use crate::models::{GeoInfo, ImageId, ImageMetadata, StoredFiles};
use crate::upload::{SourceFile, UploadMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Upload token is not configured")]
    MissingToken,
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Upload token was rejected")]
    Unauthorized,
    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Upload progress in percent (0-100)
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Everything the backend needs to store one image's assets
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub original: SourceFile,
    pub thumbnail: Thumbnail,
    pub metadata: ImageMetadata,
    pub mode: UploadMode,
    /// Store the assets without committing the catalog entry
    pub defer_finalize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResult {
    pub image_id: ImageId,
    pub files: StoredFiles,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    pub image_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalizeResponse {
    #[serde(default)]
    pub failed_items: Vec<FailedItem>,
}

/// Partial update of a stored image; absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoInfo>,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.category.is_none() && self.geo.is_none()
    }
}

/// One page of the image listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImagePage {
    #[serde(default)]
    pub items: Vec<ImageMetadata>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Transport for the photo backend (allows mocking for tests).
///
/// Implementations receive an already validated token; the token check
/// lives in `PhotoApiClient`.
#[async_trait::async_trait]
pub trait PhotoBackend: Send + Sync {
    async fn upload_image(
        &self,
        token: &str,
        request: UploadRequest,
        on_progress: ProgressCallback,
    ) -> Result<UploadResult, ApiError>;

    async fn finalize_image_batch(
        &self,
        token: &str,
        items: &[ImageMetadata],
    ) -> Result<FinalizeResponse, ApiError>;

    async fn update_image_metadata(
        &self,
        token: &str,
        image_id: &ImageId,
        patch: &MetadataPatch,
    ) -> Result<(), ApiError>;

    async fn delete_image(&self, token: &str, image_id: &ImageId) -> Result<(), ApiError>;

    async fn list_images(
        &self,
        token: Option<&str>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<ImagePage, ApiError>;
}
