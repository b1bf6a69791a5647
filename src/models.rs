use crate::geo::{GeoPoint, RegionInfo};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const IMAGE_ID_PREFIX: &str = "sha256:";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid image id: {0}")]
pub struct InvalidImageId(pub String);

/// Content-derived identifier of an image: `sha256:<64 lowercase hex>`.
///
/// Stable across retries of the same binary content, which is what makes
/// the batched finalize call idempotent on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageId(String);

impl ImageId {
    /// Build an id from an already computed sha256 digest in hex form
    pub fn from_hex(hex_digest: &str) -> Result<Self, InvalidImageId> {
        Self::parse(&format!("{}{}", IMAGE_ID_PREFIX, hex_digest))
    }

    /// Hash raw bytes into an id
    pub fn for_bytes(data: &[u8]) -> Self {
        ImageId(format!("{}{}", IMAGE_ID_PREFIX, sha256_hex(data)))
    }

    /// Id of a live photo: hash of `"<still_hex>:<video_hex>"`
    pub fn for_live_photo(still_hex: &str, video_hex: &str) -> Self {
        let combined = format!("{}:{}", still_hex, video_hex);
        ImageId::for_bytes(combined.as_bytes())
    }

    pub fn parse(value: &str) -> Result<Self, InvalidImageId> {
        let hex_part = value
            .strip_prefix(IMAGE_ID_PREFIX)
            .ok_or_else(|| InvalidImageId(value.to_string()))?;

        let valid = hex_part.len() == 64
            && hex_part
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));

        if !valid {
            return Err(InvalidImageId(value.to_string()));
        }

        Ok(ImageId(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 64 hex characters without the scheme prefix
    pub fn hex(&self) -> &str {
        &self.0[IMAGE_ID_PREFIX.len()..]
    }

    /// Object storage prefix derived from the digest.
    /// Example: sha256:abcd12... -> objects/ab/cd/sha256_abcd12.../
    pub fn object_prefix(&self) -> String {
        let hex = self.hex();
        format!("objects/{}/{}/sha256_{}/", &hex[..2], &hex[2..4], hex)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ImageId {
    type Err = InvalidImageId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageId::parse(s)
    }
}

impl TryFrom<String> for ImageId {
    type Error = InvalidImageId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ImageId::parse(&value)
    }
}

impl From<ImageId> for String {
    fn from(id: ImageId) -> Self {
        id.0
    }
}

/// Lowercase hex sha256 of a byte slice
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Camera and capture details read from EXIF
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExifInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lens_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub f_number: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focal_length: Option<f64>,
    /// Raw GPS block. Removed by the privacy scrub once a region is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsInfo {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

impl GpsInfo {
    pub fn point(&self) -> Option<GeoPoint> {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Location attached to a photo.
///
/// After the privacy scrub `point` holds a coarsened coordinate
/// (two decimals), never the raw EXIF position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<RegionInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrivacyFlags {
    #[serde(default)]
    pub exif_gps_removed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrInfo {
    pub text: String,
    pub has_text: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlurInfo {
    /// Variance of the Laplacian; lower means blurrier
    pub score: f64,
    pub is_blurry: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivePhotoInfo {
    pub still_hash: String,
    pub video_hash: String,
    pub video_filename: String,
    pub video_size_bytes: u64,
}

/// Where the backend stored the assets of an image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredFiles {
    pub original_path: String,
    pub thumbnail_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_video_path: Option<String>,
    #[serde(default)]
    pub original_url: String,
    #[serde(default)]
    pub thumbnail_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_video_url: Option<String>,
}

/// Catalog entry for one image, shared with the backend as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub image_id: ImageId,
    pub filename: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exif: Option<ExifInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoInfo>,
    #[serde(default)]
    pub privacy: PrivacyFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr: Option<OcrInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dominant_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blur: Option<BlurInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_photo: Option<LivePhotoInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<StoredFiles>,
}

impl ImageMetadata {
    /// Region embedded in the stored metadata, if any
    pub fn embedded_region(&self) -> Option<&RegionInfo> {
        self.geo.as_ref().and_then(|geo| geo.region.as_ref())
    }

    /// Best known coordinate: geo point first, raw EXIF GPS second
    pub fn point(&self) -> Option<GeoPoint> {
        self.geo
            .as_ref()
            .and_then(|geo| geo.point)
            .or_else(|| self.exif.as_ref()?.gps?.point())
    }
}
