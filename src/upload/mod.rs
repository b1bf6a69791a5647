// # Upload Pipeline
//
// Files go through two phases, each owned by its own scheduler:
//
// 1. **Parse** (`ParseScheduler`): bounded pool claims `queued_parse` items in
//    FIFO order and runs the stage chain (hash, thumbnail, EXIF, region,
//    privacy, OCR, color, blur, phash, metadata). Ends in `parsed` or
//    `parse_failed`.
// 2. **Submit** (`SubmitScheduler`): three workers upload assets with
//    `defer_finalize`, then one batched finalize commits every uploaded
//    item. Ends in `upload_completed` or `upload_failed`.
//
// `QueueStore` is the single source of truth; an item's status alone
// decides which scheduler may touch it. Failures become item state and
// never escape the scheduler loops.

mod item;
mod parse;
mod pipeline;
mod queue;
mod session;
mod source;
mod submit;

pub use item::{
    EditDraft, ItemId, ItemPatch, ItemStatus, StageId, StagePatch, StageRecord, StageStatus,
    UnknownStatus, UploadQueueItem,
};
pub use parse::{default_parse_budget, parse_budget, ParseScheduler};
pub use pipeline::{ParsePipeline, ParsedImage, StageError};
pub use queue::{QueueError, QueueEvent, QueueStore};
pub use session::UploadSession;
pub use source::{load_uploads, pair_live_photos, IntakeError, NewUpload, SourceFile, UploadMode};
pub use submit::{
    apply_edit_draft, SubmitError, SubmitReport, SubmitScheduler, SuccessCallback, SUBMIT_WORKERS,
};
