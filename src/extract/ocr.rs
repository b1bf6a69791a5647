use crate::extract::ExtractError;
use image::DynamicImage;

/// Text recognition engine (external; allows mocking for tests)
#[async_trait::async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognized text, or `None` when the engine found nothing
    async fn recognize(&self, image: &DynamicImage) -> Result<Option<String>, ExtractError>;
}

/// Engine used when no OCR backend is configured; never finds text
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopOcr;

#[async_trait::async_trait]
impl OcrEngine for NoopOcr {
    async fn recognize(&self, _image: &DynamicImage) -> Result<Option<String>, ExtractError> {
        Ok(None)
    }
}
