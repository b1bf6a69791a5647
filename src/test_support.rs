// Test support utilities for both unit and integration tests

use crate::api::{
    ApiError, FailedItem, FinalizeResponse, ImagePage, MetadataPatch, PhotoBackend,
    ProgressCallback, UploadRequest, UploadResult,
};
use crate::extract::{ExifReader, ExtractError, OcrEngine};
use crate::geo::{GeoError, GeoPoint, Geocoder, PointKey, RegionInfo};
use crate::models::{ExifInfo, ImageId, ImageMetadata, PrivacyFlags, StoredFiles};
use crate::upload::{NewUpload, SourceFile};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Install a test-writer subscriber once per process
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("snapvault=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// PNG with a seed-dependent gradient so different seeds hash differently
pub fn png_bytes(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x as u8).wrapping_mul(3).wrapping_add(seed),
            (y as u8).wrapping_mul(5),
            seed,
        ])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .expect("encode test png");
    out
}

pub fn png_upload(name: &str, seed: u8) -> NewUpload {
    NewUpload::still(SourceFile::new(name, "image/png", png_bytes(48, 32, seed)))
}

/// Minimal parsed metadata whose id is derived from `seed`
pub fn sample_metadata(seed: &[u8]) -> ImageMetadata {
    let image_id = ImageId::for_bytes(seed);
    ImageMetadata {
        filename: format!("{}.jpg", &image_id.hex()[..8]),
        image_id,
        description: String::new(),
        category: String::new(),
        mime_type: "image/jpeg".to_string(),
        size_bytes: seed.len() as u64,
        width: 4,
        height: 3,
        taken_at: None,
        uploaded_at: None,
        exif: None,
        geo: None,
        privacy: PrivacyFlags::default(),
        ocr: None,
        dominant_color: None,
        blur: None,
        phash: None,
        live_photo: None,
        files: None,
    }
}

#[derive(Default)]
struct BackendState {
    catalog: Vec<ImageMetadata>,
    finalized: Vec<ImageMetadata>,
    patches: HashMap<ImageId, MetadataPatch>,
    rejected_on_finalize: HashMap<String, String>,
    failing_uploads: HashSet<ImageId>,
    upload_delay: Option<Duration>,
    list_delay: Option<Duration>,
}

/// In-memory photo backend
///
/// Records calls and concurrency, with switches for each failure mode the
/// schedulers handle.
#[derive(Default)]
pub struct MockPhotoBackend {
    state: Mutex<BackendState>,
    upload_calls: AtomicUsize,
    finalize_calls: AtomicUsize,
    patch_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    active_uploads: AtomicUsize,
    max_active_uploads: AtomicUsize,
    fail_finalize: AtomicBool,
    fail_patches: AtomicBool,
}

impl MockPhotoBackend {
    #[allow(unused)] // Used in tests
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose catalog already holds `images`
    pub fn with_catalog(images: Vec<ImageMetadata>) -> Self {
        let backend = Self::default();
        backend.state.lock().unwrap().catalog = images;
        backend
    }

    pub fn set_upload_delay(&self, delay: Duration) {
        self.state.lock().unwrap().upload_delay = Some(delay);
    }

    pub fn set_list_delay(&self, delay: Duration) {
        self.state.lock().unwrap().list_delay = Some(delay);
    }

    pub fn fail_upload_of(&self, image_id: &ImageId) {
        self.state
            .lock()
            .unwrap()
            .failing_uploads
            .insert(image_id.clone());
    }

    pub fn clear_upload_failures(&self) {
        self.state.lock().unwrap().failing_uploads.clear();
    }

    pub fn reject_on_finalize(&self, image_id: &ImageId, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .rejected_on_finalize
            .insert(image_id.to_string(), reason.to_string());
    }

    pub fn fail_finalize(&self, fail: bool) {
        self.fail_finalize.store(fail, Ordering::SeqCst);
    }

    pub fn fail_patches(&self, fail: bool) {
        self.fail_patches.store(fail, Ordering::SeqCst);
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn finalize_calls(&self) -> usize {
        self.finalize_calls.load(Ordering::SeqCst)
    }

    pub fn patch_calls(&self) -> usize {
        self.patch_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_uploads(&self) -> usize {
        self.max_active_uploads.load(Ordering::SeqCst)
    }

    /// Metadata accepted by finalize calls, in order
    pub fn finalized(&self) -> Vec<ImageMetadata> {
        self.state.lock().unwrap().finalized.clone()
    }

    pub fn catalog(&self) -> Vec<ImageMetadata> {
        self.state.lock().unwrap().catalog.clone()
    }

    pub fn last_patch(&self, image_id: &ImageId) -> Option<MetadataPatch> {
        self.state.lock().unwrap().patches.get(image_id).cloned()
    }
}

#[async_trait::async_trait]
impl PhotoBackend for MockPhotoBackend {
    async fn upload_image(
        &self,
        _token: &str,
        request: UploadRequest,
        on_progress: ProgressCallback,
    ) -> Result<UploadResult, ApiError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active_uploads.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_uploads.fetch_max(active, Ordering::SeqCst);

        let (delay, fail) = {
            let state = self.state.lock().unwrap();
            (
                state.upload_delay,
                state.failing_uploads.contains(&request.metadata.image_id),
            )
        };

        on_progress(50);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.active_uploads.fetch_sub(1, Ordering::SeqCst);

        if fail {
            return Err(ApiError::Status {
                status: 500,
                message: "object store unavailable".to_string(),
            });
        }
        on_progress(100);

        let image_id = request.metadata.image_id.clone();
        let prefix = image_id.object_prefix();
        Ok(UploadResult {
            image_id,
            files: StoredFiles {
                original_path: format!("{}original", prefix),
                thumbnail_path: format!("{}thumbnail.jpg", prefix),
                live_video_path: request
                    .mode
                    .video()
                    .map(|_| format!("{}live_video", prefix)),
                original_url: format!("https://cdn.test/{}original", prefix),
                thumbnail_url: format!("https://cdn.test/{}thumbnail.jpg", prefix),
                live_video_url: None,
            },
            etag: Some("\"mock\"".to_string()),
        })
    }

    async fn finalize_image_batch(
        &self,
        _token: &str,
        items: &[ImageMetadata],
    ) -> Result<FinalizeResponse, ApiError> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_finalize.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 503,
                message: "catalog offline".to_string(),
            });
        }

        let mut state = self.state.lock().unwrap();
        let mut failed_items = Vec::new();
        for item in items {
            match state.rejected_on_finalize.get(item.image_id.as_str()) {
                Some(reason) => failed_items.push(FailedItem {
                    image_id: item.image_id.to_string(),
                    reason: reason.clone(),
                }),
                None => {
                    state.finalized.push(item.clone());
                    state.catalog.push(item.clone());
                }
            }
        }
        Ok(FinalizeResponse { failed_items })
    }

    async fn update_image_metadata(
        &self,
        _token: &str,
        image_id: &ImageId,
        patch: &MetadataPatch,
    ) -> Result<(), ApiError> {
        self.patch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_patches.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 500,
                message: "patch failed".to_string(),
            });
        }

        let mut state = self.state.lock().unwrap();
        state.patches.insert(image_id.clone(), patch.clone());
        if let Some(entry) = state.catalog.iter_mut().find(|m| &m.image_id == image_id) {
            if let Some(description) = &patch.description {
                entry.description = description.clone();
            }
            if let Some(category) = &patch.category {
                entry.category = category.clone();
            }
            if let Some(geo) = &patch.geo {
                entry.geo = Some(geo.clone());
            }
        }
        Ok(())
    }

    async fn delete_image(&self, _token: &str, image_id: &ImageId) -> Result<(), ApiError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let before = state.catalog.len();
        state.catalog.retain(|m| &m.image_id != image_id);
        if state.catalog.len() == before {
            return Err(ApiError::Status {
                status: 404,
                message: format!("{} not found", image_id),
            });
        }
        Ok(())
    }

    async fn list_images(
        &self,
        _token: Option<&str>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<ImagePage, ApiError> {
        let delay = self.state.lock().unwrap().list_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock().unwrap();
        let start = match cursor {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| ApiError::InvalidResponse(format!("bad cursor {}", cursor)))?,
            None => 0,
        };
        let end = (start + limit).min(state.catalog.len());
        let items = state.catalog[start.min(end)..end].to_vec();
        let next_cursor = (end < state.catalog.len()).then(|| end.to_string());
        Ok(ImagePage { items, next_cursor })
    }
}

#[derive(Default)]
struct GeocoderState {
    regions: HashMap<PointKey, RegionInfo>,
    boundaries: HashMap<String, serde_json::Value>,
    boundary_delays: HashMap<String, Duration>,
}

/// Geocoder double: answers every point with a fixed region unless told otherwise
#[derive(Default)]
pub struct MockGeocoder {
    state: Mutex<GeocoderState>,
    reverse_calls: AtomicUsize,
    boundary_calls: AtomicUsize,
    fail_reverse: AtomicBool,
}

impl MockGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Region returned for points without an explicit mapping
    pub fn default_region() -> RegionInfo {
        RegionInfo::new("China", "Shanghai", "Shanghai", "Huangpu")
    }

    pub fn set_region(&self, point: GeoPoint, region: RegionInfo) {
        self.state.lock().unwrap().regions.insert(point.key(), region);
    }

    pub fn set_boundary(&self, cache_key: &str, geometry: serde_json::Value) {
        self.state
            .lock()
            .unwrap()
            .boundaries
            .insert(cache_key.to_string(), geometry);
    }

    /// Make the boundary lookup for `cache_key` take `delay`
    pub fn set_boundary_delay(&self, cache_key: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .boundary_delays
            .insert(cache_key.to_string(), delay);
    }

    pub fn fail_reverse(&self, fail: bool) {
        self.fail_reverse.store(fail, Ordering::SeqCst);
    }

    pub fn reverse_calls(&self) -> usize {
        self.reverse_calls.load(Ordering::SeqCst)
    }

    pub fn boundary_calls(&self) -> usize {
        self.boundary_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Geocoder for MockGeocoder {
    async fn reverse_geocode(&self, point: GeoPoint) -> Result<RegionInfo, GeoError> {
        self.reverse_calls.fetch_add(1, Ordering::SeqCst);
        // Let concurrent callers pile up on the same key
        tokio::task::yield_now().await;

        if self.fail_reverse.load(Ordering::SeqCst) {
            return Err(GeoError::RateLimit);
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .regions
            .get(&point.key())
            .cloned()
            .unwrap_or_else(Self::default_region))
    }

    async fn region_boundary(
        &self,
        region: &RegionInfo,
    ) -> Result<Option<serde_json::Value>, GeoError> {
        self.boundary_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self
            .state
            .lock()
            .unwrap()
            .boundary_delays
            .get(&region.cache_key)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .boundaries
            .get(&region.cache_key)
            .cloned())
    }
}

/// EXIF reader that returns the same block for every file
pub struct StaticExifReader {
    exif: Option<ExifInfo>,
}

impl StaticExifReader {
    pub fn new(exif: Option<ExifInfo>) -> Self {
        Self { exif }
    }
}

impl ExifReader for StaticExifReader {
    fn read(&self, _data: &[u8]) -> Result<Option<ExifInfo>, ExtractError> {
        Ok(self.exif.clone())
    }
}

/// OCR engine that sleeps and records how many calls overlap
pub struct SlowOcr {
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl SlowOcr {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl OcrEngine for SlowOcr {
    async fn recognize(&self, _image: &DynamicImage) -> Result<Option<String>, ExtractError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Some("EXIT 12".to_string()))
    }
}
