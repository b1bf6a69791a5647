use crate::api::{PhotoApiClient, ProgressCallback, UploadRequest};
use crate::models::ImageMetadata;
use crate::upload::{EditDraft, ItemId, ItemPatch, ItemStatus, QueueStore, UploadQueueItem};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

/// Concurrent asset uploads per submission
pub const SUBMIT_WORKERS: usize = 3;
/// Upload progress stops here until the batch is finalized
const UPLOAD_PROGRESS_CAP: u8 = 95;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Upload token is not configured")]
    MissingToken,
    #[error("A submission is already running")]
    AlreadySubmitting,
    #[error("Nothing is ready to upload")]
    NothingToSubmit,
}

/// Called once per submission with the number of completed items
pub type SuccessCallback = Arc<dyn Fn(usize) + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitReport {
    pub completed: Vec<ItemId>,
    pub failed: Vec<(ItemId, String)>,
}

/// Clears the submitting flag however the submission ends
struct SubmittingGuard(Arc<AtomicBool>);

impl Drop for SubmittingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Uploads parsed items with a fixed worker pool, then commits them in one
/// batched finalize call.
///
/// Cloning is cheap (clones Arc).
#[derive(Clone)]
pub struct SubmitScheduler {
    queue: QueueStore,
    api: PhotoApiClient,
    workers: usize,
    is_submitting: Arc<AtomicBool>,
    on_success: Option<SuccessCallback>,
}

impl SubmitScheduler {
    pub fn new(queue: QueueStore, api: PhotoApiClient) -> Self {
        Self {
            queue,
            api,
            workers: SUBMIT_WORKERS,
            is_submitting: Arc::new(AtomicBool::new(false)),
            on_success: None,
        }
    }

    pub fn with_success_callback(mut self, callback: SuccessCallback) -> Self {
        self.on_success = Some(callback);
        self
    }

    pub fn is_submitting(&self) -> bool {
        self.is_submitting.load(Ordering::SeqCst)
    }

    pub fn can_submit(&self) -> bool {
        self.queue.can_submit(self.is_submitting())
    }

    fn candidates(&self) -> Vec<ItemId> {
        self.queue
            .snapshot()
            .into_iter()
            .filter(|item| match item.status {
                ItemStatus::Parsed => true,
                ItemStatus::UploadFailed => item.metadata.is_some(),
                _ => false,
            })
            .map(|item| item.id)
            .collect()
    }

    /// Upload every candidate, then finalize the ones that made it.
    ///
    /// Preconditions are checked before any item changes state.
    pub async fn submit(&self) -> Result<SubmitReport, SubmitError> {
        if !self.api.has_token() {
            return Err(SubmitError::MissingToken);
        }
        if self
            .is_submitting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SubmitError::AlreadySubmitting);
        }
        let _guard = SubmittingGuard(self.is_submitting.clone());

        let candidates = self.candidates();
        if candidates.is_empty() {
            return Err(SubmitError::NothingToSubmit);
        }

        info!(
            "Submitting {} item(s) with {} workers",
            candidates.len(),
            self.workers
        );

        let uploaded = self.upload_all(&candidates).await;
        let mut report = self.finalize(uploaded).await;

        // Anything a crashed worker left behind is failed, never stuck
        for id in &candidates {
            if let Some(item) = self.queue.get(id) {
                if item.status == ItemStatus::Uploading {
                    let reason = "Upload worker stopped unexpectedly".to_string();
                    self.mark_failed(id, &reason);
                    report.failed.push((id.clone(), reason));
                } else if item.status == ItemStatus::UploadFailed
                    && !report.failed.iter().any(|(failed, _)| failed == id)
                {
                    let reason = item.error.unwrap_or_default();
                    report.failed.push((id.clone(), reason));
                }
            }
        }

        if !report.completed.is_empty() {
            if let Some(callback) = &self.on_success {
                callback(report.completed.len());
            }
        }

        info!(
            "Submission finished: {} completed, {} failed",
            report.completed.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Phase one: push assets through the worker pool.
    /// Returns uploaded items with their final metadata, in completion order.
    async fn upload_all(&self, candidates: &[ItemId]) -> Vec<(ItemId, ImageMetadata)> {
        let (tx, rx) = mpsc::channel(candidates.len().max(1));
        for id in candidates {
            // Capacity covers every candidate
            let _ = tx.try_send(id.clone());
        }
        drop(tx);

        let rx = Arc::new(AsyncMutex::new(rx));
        let mut handles = Vec::with_capacity(self.workers);

        for slot in 0..self.workers {
            let this = self.clone();
            let rx = rx.clone();
            handles.push(tokio::spawn(async move {
                let mut uploaded = Vec::new();
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(id) = next else { break };
                    if let Some(done) = this.upload_one(&id, slot).await {
                        uploaded.push(done);
                    }
                }
                uploaded
            }));
        }

        let mut uploaded = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(items) => uploaded.extend(items),
                Err(e) => error!("Upload worker panicked: {}", e),
            }
        }
        uploaded
    }

    async fn upload_one(&self, id: &ItemId, slot: usize) -> Option<(ItemId, ImageMetadata)> {
        let item = self.queue.get(id)?;
        let UploadQueueItem {
            file,
            mode,
            metadata,
            edit_draft,
            status,
            ..
        } = item;

        if !matches!(status, ItemStatus::Parsed | ItemStatus::UploadFailed) {
            debug!("Item {} left the submit set ({})", id, status);
            return None;
        }
        let Some(metadata) = metadata else {
            self.mark_failed(id, "Item has no parsed metadata");
            return None;
        };
        let Some(thumbnail) = self.queue.thumbnail(id) else {
            self.mark_failed(id, "Thumbnail is missing; parse the item again");
            return None;
        };

        let mut metadata = apply_edit_draft(metadata, edit_draft.as_ref());

        self.queue.update_item(
            id,
            ItemPatch::default()
                .status(ItemStatus::Uploading)
                .progress(0)
                .clear_error()
                .metadata(metadata.clone())
                .worker_slot(Some(slot)),
        );

        let on_progress: ProgressCallback = {
            let queue = self.queue.clone();
            let id = id.clone();
            Arc::new(move |percent| {
                queue.update_item(
                    &id,
                    ItemPatch::default().progress(percent.min(UPLOAD_PROGRESS_CAP)),
                );
            })
        };

        let request = UploadRequest {
            original: file,
            thumbnail,
            metadata: metadata.clone(),
            mode,
            defer_finalize: true,
        };

        match self.api.upload_image(request, on_progress).await {
            Ok(result) => {
                debug!("Uploaded {} on worker {}", result.image_id, slot);
                metadata.files = Some(result.files);
                self.queue.update_item(
                    id,
                    ItemPatch::default()
                        .progress(UPLOAD_PROGRESS_CAP)
                        .metadata(metadata.clone()),
                );
                Some((id.clone(), metadata))
            }
            Err(e) => {
                warn!("Upload of {} failed: {}", id, e);
                self.mark_failed(id, &e.to_string());
                None
            }
        }
    }

    /// Phase two: one batched finalize for every uploaded item
    async fn finalize(&self, uploaded: Vec<(ItemId, ImageMetadata)>) -> SubmitReport {
        let mut report = SubmitReport::default();
        if uploaded.is_empty() {
            return report;
        }

        let items: Vec<ImageMetadata> = uploaded.iter().map(|(_, m)| m.clone()).collect();

        match self.api.finalize_image_batch(&items).await {
            Ok(response) => {
                let failed: HashMap<String, String> = response
                    .failed_items
                    .into_iter()
                    .map(|f| (f.image_id, f.reason))
                    .collect();

                for (id, metadata) in uploaded {
                    match failed.get(metadata.image_id.as_str()) {
                        Some(reason) => {
                            warn!("Finalize rejected {}: {}", metadata.image_id, reason);
                            self.mark_failed(&id, reason);
                            report.failed.push((id, reason.clone()));
                        }
                        None => {
                            self.queue.update_item(
                                &id,
                                ItemPatch::default()
                                    .status(ItemStatus::UploadCompleted)
                                    .progress(100)
                                    .clear_error()
                                    .worker_slot(None),
                            );
                            report.completed.push(id);
                        }
                    }
                }
            }
            Err(e) => {
                error!("Finalize call failed: {}", e);
                let reason = format!("Finalize failed: {}", e);
                for (id, _) in uploaded {
                    self.mark_failed(&id, &reason);
                    report.failed.push((id, reason.clone()));
                }
            }
        }

        report
    }

    fn mark_failed(&self, id: &str, reason: &str) {
        self.queue.update_item(
            id,
            ItemPatch::default()
                .status(ItemStatus::UploadFailed)
                .error(reason)
                .worker_slot(None),
        );
    }
}

/// Merge user overrides into parsed metadata.
///
/// Description and category override when present (blank clears them);
/// filename overrides only when non-blank.
pub fn apply_edit_draft(mut metadata: ImageMetadata, draft: Option<&EditDraft>) -> ImageMetadata {
    let Some(draft) = draft else {
        return metadata;
    };

    if let Some(description) = &draft.description {
        metadata.description = description.trim().to_string();
    }
    if let Some(category) = &draft.category {
        metadata.category = category.trim().to_string();
    }
    if let Some(filename) = &draft.filename {
        let filename = filename.trim();
        if !filename.is_empty() {
            metadata.filename = filename.to_string();
        }
    }
    metadata
}
