use crate::api::{
    ApiError, FinalizeResponse, ImagePage, MetadataPatch, PhotoBackend, ProgressCallback,
    UploadRequest, UploadResult,
};
use crate::models::{ImageId, ImageMetadata};
use crate::upload::UploadMode;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Size of the pieces an asset is streamed in; progress is reported per piece
const UPLOAD_CHUNK_SIZE: usize = 256 * 1024;

/// Production backend speaking the REST contract over HTTP
#[derive(Clone)]
pub struct HttpPhotoBackend {
    client: Client,
    base_url: String,
}

impl HttpPhotoBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn images_url(&self) -> String {
        format!("{}/api/images", self.base_url)
    }

    fn image_url(&self, image_id: &ImageId) -> String {
        format!("{}/api/images/{}", self.base_url, image_id)
    }

    async fn check_status(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!("Backend rejected the upload token ({})", status);
            return Err(ApiError::Unauthorized);
        }

        let message = response.text().await.unwrap_or_default();
        warn!("Backend returned {}: {}", status, message);
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let response = Self::check_status(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Shared byte counter across all parts of one multipart upload
struct ProgressTracker {
    total: u64,
    sent: AtomicU64,
    last_percent: AtomicU8,
    callback: ProgressCallback,
}

impl ProgressTracker {
    fn new(total: u64, callback: ProgressCallback) -> Self {
        Self {
            total,
            sent: AtomicU64::new(0),
            last_percent: AtomicU8::new(0),
            callback,
        }
    }

    fn advance(&self, bytes: usize) {
        let sent = self.sent.fetch_add(bytes as u64, Ordering::SeqCst) + bytes as u64;
        let percent = if self.total == 0 {
            100
        } else {
            ((sent as f64 / self.total as f64) * 100.0).min(100.0) as u8
        };

        if self.last_percent.swap(percent, Ordering::SeqCst) != percent {
            (self.callback)(percent);
        }
    }
}

/// Build a multipart file part that streams its bytes and reports progress
fn streaming_part(
    data: Arc<Vec<u8>>,
    file_name: String,
    mime_type: &str,
    tracker: Arc<ProgressTracker>,
) -> Result<Part, ApiError> {
    let len = data.len();
    let chunk_count = len.div_ceil(UPLOAD_CHUNK_SIZE);

    let chunks = (0..chunk_count).map(move |index| {
        let start = index * UPLOAD_CHUNK_SIZE;
        let end = (start + UPLOAD_CHUNK_SIZE).min(len);
        let chunk = data[start..end].to_vec();
        tracker.advance(chunk.len());
        Ok::<Vec<u8>, std::io::Error>(chunk)
    });

    let body = Body::wrap_stream(futures::stream::iter(chunks));
    Ok(Part::stream_with_length(body, len as u64)
        .file_name(file_name)
        .mime_str(mime_type)?)
}

fn json_part<T: Serialize>(value: &T) -> Result<Part, ApiError> {
    let json = serde_json::to_string(value)?;
    Ok(Part::text(json).mime_str("application/json")?)
}

#[derive(Serialize)]
struct FinalizeRequest<'a> {
    items: &'a [ImageMetadata],
}

#[async_trait::async_trait]
impl PhotoBackend for HttpPhotoBackend {
    async fn upload_image(
        &self,
        token: &str,
        request: UploadRequest,
        on_progress: ProgressCallback,
    ) -> Result<UploadResult, ApiError> {
        let UploadRequest {
            original,
            thumbnail,
            metadata,
            mode,
            defer_finalize,
        } = request;

        let video = match &mode {
            UploadMode::Static => None,
            UploadMode::LivePhoto { video } => Some(video.clone()),
        };

        let total = original.size_bytes()
            + thumbnail.data.len() as u64
            + video.as_ref().map(|v| v.size_bytes()).unwrap_or(0);
        let tracker = Arc::new(ProgressTracker::new(total, on_progress));

        info!(
            "Uploading {} ({} bytes, live video: {})",
            metadata.image_id,
            total,
            video.is_some()
        );

        let thumbnail_name = format!("{}.jpg", metadata.image_id.hex());
        let mut form = Form::new()
            .part("metadata", json_part(&metadata)?)
            .part(
                "original",
                streaming_part(
                    original.data.clone(),
                    original.name.clone(),
                    &original.mime_type,
                    tracker.clone(),
                )?,
            )
            .part(
                "thumbnail",
                streaming_part(
                    thumbnail.data.clone(),
                    thumbnail_name,
                    thumbnail.mime_type,
                    tracker.clone(),
                )?,
            );

        if let Some(video) = video {
            form = form.part(
                "live_video",
                streaming_part(
                    video.data.clone(),
                    video.name.clone(),
                    &video.mime_type,
                    tracker.clone(),
                )?,
            );
        }

        let response = self
            .client
            .post(self.images_url())
            .query(&[("defer_finalize", defer_finalize.to_string())])
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;

        let result: UploadResult = Self::read_json(response).await?;
        debug!("Stored {} under {}", result.image_id, result.files.original_path);
        Ok(result)
    }

    async fn finalize_image_batch(
        &self,
        token: &str,
        items: &[ImageMetadata],
    ) -> Result<FinalizeResponse, ApiError> {
        let response = self
            .client
            .post(format!("{}/finalize", self.images_url()))
            .bearer_auth(token)
            .json(&FinalizeRequest { items })
            .send()
            .await?;

        Self::read_json(response).await
    }

    async fn update_image_metadata(
        &self,
        token: &str,
        image_id: &ImageId,
        patch: &MetadataPatch,
    ) -> Result<(), ApiError> {
        let response = self
            .client
            .patch(self.image_url(image_id))
            .bearer_auth(token)
            .json(patch)
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }

    async fn delete_image(&self, token: &str, image_id: &ImageId) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.image_url(image_id))
            .bearer_auth(token)
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }

    async fn list_images(
        &self,
        token: Option<&str>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<ImagePage, ApiError> {
        let mut params = vec![("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }

        let mut request = self.client.get(self.images_url()).query(&params);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        Self::read_json(request.send().await?).await
    }
}
