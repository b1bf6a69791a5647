use crate::extract::{self, DecodedImage, ExtractError, Extractors, Thumbnail};
use crate::geo::{GeoPoint, RegionInfo, RegionResolver};
use crate::models::{
    sha256_hex, ExifInfo, GeoInfo, ImageId, ImageMetadata, LivePhotoInfo, OcrInfo, PrivacyFlags,
};
use crate::upload::{ItemId, ItemPatch, QueueStore, StageId, StagePatch, UploadQueueItem};
use image::DynamicImage;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{stage} stage failed: {message}")]
pub struct StageError {
    pub stage: StageId,
    pub message: String,
}

/// Output of a successful parse
#[derive(Debug, Clone)]
pub struct ParsedImage {
    pub metadata: ImageMetadata,
    pub thumbnail: Thumbnail,
}

struct ContentHash {
    image_id: ImageId,
    live_photo: Option<LivePhotoInfo>,
}

/// Run CPU-bound extractor work on the blocking pool
async fn blocking<T, F>(work: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ExtractError> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("worker task failed: {}", e)),
    }
}

/// Marks stages on the queue item as they run and keeps item progress
/// at completed/total.
struct StageRunner<'a> {
    queue: &'a QueueStore,
    item_id: &'a ItemId,
    completed: usize,
}

impl<'a> StageRunner<'a> {
    async fn run<T, Fut>(&mut self, stage: StageId, work: Fut) -> Result<T, StageError>
    where
        Fut: Future<Output = Result<T, String>>,
    {
        self.queue
            .update_stage(self.item_id, stage, StagePatch::started());
        debug!("Item {}: {} started", self.item_id, stage);

        match work.await {
            Ok(value) => {
                self.queue
                    .update_stage(self.item_id, stage, StagePatch::completed());
                self.completed += 1;
                let progress = (self.completed * 100 / StageId::ALL.len()) as u8;
                self.queue
                    .update_item(self.item_id, ItemPatch::default().progress(progress));
                Ok(value)
            }
            Err(message) => {
                warn!("Item {}: {} failed: {}", self.item_id, stage, message);
                self.queue
                    .update_stage(self.item_id, stage, StagePatch::failed(message.clone()));
                Err(StageError { stage, message })
            }
        }
    }
}

/// The per-item extractor chain.
///
/// Stages run strictly in order; the first failure aborts the rest.
/// Cloning is cheap (clones Arc).
#[derive(Clone)]
pub struct ParsePipeline {
    extractors: Extractors,
    resolver: RegionResolver,
}

impl ParsePipeline {
    pub fn new(extractors: Extractors, resolver: RegionResolver) -> Self {
        Self {
            extractors,
            resolver,
        }
    }

    pub fn resolver(&self) -> &RegionResolver {
        &self.resolver
    }

    pub async fn process(
        &self,
        queue: &QueueStore,
        item: &UploadQueueItem,
    ) -> Result<ParsedImage, StageError> {
        let mut runner = StageRunner {
            queue,
            item_id: &item.id,
            completed: 0,
        };

        // hash
        let still = item.file.data.clone();
        let video = item.mode.video().map(|v| (v.name.clone(), v.data.clone()));
        let hash = runner
            .run(StageId::Hash, blocking(move || Ok(content_hash(&still, video))))
            .await?;

        // thumbnail
        let data = item.file.data.clone();
        let name = item.file.name.clone();
        let edge = self.extractors.thumbnail_edge;
        let DecodedImage {
            source_width,
            source_height,
            thumbnail,
            preview,
        } = runner
            .run(
                StageId::Thumbnail,
                blocking(move || extract::decode_and_thumbnail(&data, &name, edge)),
            )
            .await?;
        let preview = Arc::new(preview);

        // exif
        let data = item.file.data.clone();
        let reader = self.extractors.exif.clone();
        let mut exif: Option<ExifInfo> = runner
            .run(StageId::Exif, blocking(move || reader.read(&data)))
            .await?;

        // region
        let point: Option<GeoPoint> = exif.as_ref().and_then(|e| e.gps).and_then(|g| g.point());
        let region: Option<RegionInfo> = runner
            .run(StageId::Region, async {
                match point {
                    Some(point) => Ok::<_, String>(self.resolver.resolve(point).await),
                    None => Ok(None),
                }
            })
            .await?;

        // privacy
        let (geo, privacy) = runner
            .run(StageId::Privacy, async {
                Ok::<_, String>(scrub_location(&mut exif, point, region))
            })
            .await?;

        // ocr
        let ocr_engine = self.extractors.ocr.clone();
        let ocr_input = preview.clone();
        let ocr = runner
            .run(StageId::Ocr, async move {
                match ocr_engine.recognize(&ocr_input).await {
                    Ok(text) => Ok(text.map(|text| {
                        let text = text.trim().to_string();
                        OcrInfo {
                            has_text: !text.is_empty(),
                            text,
                        }
                    })),
                    Err(e) => Err(e.to_string()),
                }
            })
            .await?;

        // color, blur, phash
        let dominant_color = runner
            .run(StageId::Color, analyze(&preview, extract::dominant_color))
            .await?;
        let blur = runner
            .run(StageId::Blur, analyze(&preview, extract::blur_info))
            .await?;
        let phash = runner
            .run(StageId::Phash, analyze(&preview, extract::perceptual_hash))
            .await?;

        // metadata
        let metadata = runner
            .run(StageId::Metadata, async {
                let taken_at = exif.as_ref().and_then(|e| e.taken_at);
                Ok::<_, String>(ImageMetadata {
                    image_id: hash.image_id,
                    filename: item.file.name.clone(),
                    description: String::new(),
                    category: String::new(),
                    mime_type: item.file.mime_type.clone(),
                    size_bytes: item.file.size_bytes(),
                    width: source_width,
                    height: source_height,
                    taken_at,
                    uploaded_at: None,
                    exif,
                    geo,
                    privacy,
                    ocr,
                    dominant_color,
                    blur: Some(blur),
                    phash: Some(phash),
                    live_photo: hash.live_photo,
                    files: None,
                })
            })
            .await?;

        Ok(ParsedImage {
            metadata,
            thumbnail,
        })
    }
}

fn analyze<T, F>(
    preview: &Arc<DynamicImage>,
    f: F,
) -> impl Future<Output = Result<T, String>>
where
    T: Send + 'static,
    F: FnOnce(&DynamicImage) -> T + Send + 'static,
{
    let preview = preview.clone();
    blocking(move || Ok(f(&preview)))
}

fn content_hash(still: &[u8], video: Option<(String, Arc<Vec<u8>>)>) -> ContentHash {
    let still_hex = sha256_hex(still);
    match video {
        None => ContentHash {
            image_id: ImageId::for_bytes(still),
            live_photo: None,
        },
        Some((video_name, video_data)) => {
            let video_hex = sha256_hex(&video_data);
            ContentHash {
                image_id: ImageId::for_live_photo(&still_hex, &video_hex),
                live_photo: Some(LivePhotoInfo {
                    still_hash: still_hex,
                    video_hash: video_hex,
                    video_filename: video_name,
                    video_size_bytes: video_data.len() as u64,
                }),
            }
        }
    }
}

/// Drop raw GPS once a region names the place; keep only a coarse point.
/// Without a region, or with the Unknown sentinel, the raw coordinate stays
/// so a later pass can resolve it.
fn scrub_location(
    exif: &mut Option<ExifInfo>,
    point: Option<GeoPoint>,
    region: Option<RegionInfo>,
) -> (Option<GeoInfo>, PrivacyFlags) {
    match (point, region) {
        (Some(point), Some(region)) if !region.is_unknown() => {
            if let Some(exif) = exif.as_mut() {
                exif.gps = None;
            }
            (
                Some(GeoInfo {
                    point: Some(point.coarsened()),
                    region: Some(region),
                }),
                PrivacyFlags {
                    exif_gps_removed: true,
                },
            )
        }
        (Some(point), _) => (
            Some(GeoInfo {
                point: Some(point),
                region: None,
            }),
            PrivacyFlags::default(),
        ),
        (None, _) => (None, PrivacyFlags::default()),
    }
}
