use crate::models::ImageMetadata;
use crate::upload::{SourceFile, UploadMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Session-local item id (UUID v4), not the content hash
pub type ItemId = String;

/// Lifecycle of a queue item. The status alone decides which scheduler owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    QueuedParse,
    Parsing,
    Parsed,
    ParseFailed,
    Uploading,
    UploadCompleted,
    UploadFailed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown item status: {0}")]
pub struct UnknownStatus(pub String);

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::QueuedParse => "queued_parse",
            ItemStatus::Parsing => "parsing",
            ItemStatus::Parsed => "parsed",
            ItemStatus::ParseFailed => "parse_failed",
            ItemStatus::Uploading => "uploading",
            ItemStatus::UploadCompleted => "upload_completed",
            ItemStatus::UploadFailed => "upload_failed",
        }
    }

    /// Terminal for the phase it belongs to (retry aside)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::ParseFailed | ItemStatus::UploadCompleted | ItemStatus::UploadFailed
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = UnknownStatus;

    /// Accepts current names and the older single-phase names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "queued_parse" | "queued" => ItemStatus::QueuedParse,
            "parsing" | "processing" => ItemStatus::Parsing,
            "parsed" | "ready_to_upload" => ItemStatus::Parsed,
            "parse_failed" | "failed" => ItemStatus::ParseFailed,
            "uploading" => ItemStatus::Uploading,
            "upload_completed" | "completed" => ItemStatus::UploadCompleted,
            "upload_failed" => ItemStatus::UploadFailed,
            other => return Err(UnknownStatus(other.to_string())),
        };
        Ok(status)
    }
}

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Hash,
    Thumbnail,
    Exif,
    Region,
    Privacy,
    Ocr,
    Color,
    Blur,
    Phash,
    Metadata,
}

impl StageId {
    pub const ALL: [StageId; 10] = [
        StageId::Hash,
        StageId::Thumbnail,
        StageId::Exif,
        StageId::Region,
        StageId::Privacy,
        StageId::Ocr,
        StageId::Color,
        StageId::Blur,
        StageId::Phash,
        StageId::Metadata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Hash => "hash",
            StageId::Thumbnail => "thumbnail",
            StageId::Exif => "exif",
            StageId::Region => "region",
            StageId::Privacy => "privacy",
            StageId::Ocr => "ocr",
            StageId::Color => "color",
            StageId::Blur => "blur",
            StageId::Phash => "phash",
            StageId::Metadata => "metadata",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageRecord {
    pub id: StageId,
    pub status: StageStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageRecord {
    pub fn pending(id: StageId) -> Self {
        Self {
            id,
            status: StageStatus::Pending,
            progress: 0,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Fresh copy of the canonical stage list
    pub fn template() -> Vec<StageRecord> {
        StageId::ALL.iter().copied().map(StageRecord::pending).collect()
    }
}

/// User overrides applied when the item is submitted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditDraft {
    /// `Some("")` clears the description
    pub description: Option<String>,
    pub category: Option<String>,
    /// Ignored when blank
    pub filename: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadQueueItem {
    pub id: ItemId,
    pub file: SourceFile,
    pub mode: UploadMode,
    pub status: ItemStatus,
    pub stages: Vec<StageRecord>,
    pub metadata: Option<ImageMetadata>,
    /// 0-100 for whichever scheduler owns the item
    pub progress: u8,
    pub error: Option<String>,
    pub edit_draft: Option<EditDraft>,
    pub retry_count: u32,
    pub worker_slot: Option<usize>,
    pub enqueued_at: DateTime<Utc>,
}

impl UploadQueueItem {
    pub fn new(id: ItemId, file: SourceFile, mode: UploadMode) -> Self {
        Self {
            id,
            file,
            mode,
            status: ItemStatus::QueuedParse,
            stages: StageRecord::template(),
            metadata: None,
            progress: 0,
            error: None,
            edit_draft: None,
            retry_count: 0,
            worker_slot: None,
            enqueued_at: Utc::now(),
        }
    }

    pub fn stage(&self, id: StageId) -> Option<&StageRecord> {
        self.stages.iter().find(|stage| stage.id == id)
    }
}

/// Merge patch for an item: `None` leaves a field untouched.
///
/// Clearable fields use a nested `Option`: `Some(None)` clears.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub status: Option<ItemStatus>,
    pub progress: Option<u8>,
    pub error: Option<Option<String>>,
    pub metadata: Option<Option<ImageMetadata>>,
    pub edit_draft: Option<Option<EditDraft>>,
    pub worker_slot: Option<Option<usize>>,
}

impl ItemPatch {
    pub fn status(mut self, status: ItemStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Some(error.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    pub fn metadata(mut self, metadata: ImageMetadata) -> Self {
        self.metadata = Some(Some(metadata));
        self
    }

    pub fn edit_draft(mut self, draft: Option<EditDraft>) -> Self {
        self.edit_draft = Some(draft);
        self
    }

    pub fn worker_slot(mut self, slot: Option<usize>) -> Self {
        self.worker_slot = Some(slot);
        self
    }

    pub(crate) fn apply(self, item: &mut UploadQueueItem) {
        if let Some(status) = self.status {
            item.status = status;
        }
        if let Some(progress) = self.progress {
            item.progress = progress;
        }
        if let Some(error) = self.error {
            item.error = error;
        }
        if let Some(metadata) = self.metadata {
            item.metadata = metadata;
        }
        if let Some(draft) = self.edit_draft {
            item.edit_draft = draft;
        }
        if let Some(slot) = self.worker_slot {
            item.worker_slot = slot;
        }
    }
}

/// Merge patch for one stage record
#[derive(Debug, Clone, Default)]
pub struct StagePatch {
    pub status: Option<StageStatus>,
    pub progress: Option<u8>,
    pub error: Option<Option<String>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StagePatch {
    pub fn started() -> Self {
        Self {
            status: Some(StageStatus::Processing),
            progress: Some(0),
            error: Some(None),
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            status: Some(StageStatus::Completed),
            progress: Some(100),
            finished_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(StageStatus::Failed),
            error: Some(Some(error.into())),
            finished_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub(crate) fn apply(self, stage: &mut StageRecord) {
        if let Some(status) = self.status {
            stage.status = status;
        }
        if let Some(progress) = self.progress {
            stage.progress = progress.min(100);
        }
        if let Some(error) = self.error {
            stage.error = error;
        }
        if let Some(started_at) = self.started_at {
            stage.started_at = Some(started_at);
        }
        if let Some(finished_at) = self.finished_at {
            stage.finished_at = Some(finished_at);
        }
    }
}
