use crate::api::PhotoApiClient;
use crate::upload::{
    load_uploads, EditDraft, IntakeError, ItemId, ItemPatch, ItemStatus, NewUpload,
    ParsePipeline, ParseScheduler, QueueStore, SubmitError, SubmitReport, SubmitScheduler,
    SuccessCallback,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

/// One upload session: a queue plus the two schedulers that work on it
pub struct UploadSession {
    queue: QueueStore,
    parser: ParseScheduler,
    submitter: SubmitScheduler,
}

impl UploadSession {
    pub fn new(pipeline: ParsePipeline, api: PhotoApiClient, parse_budget: Option<usize>) -> Self {
        let queue = QueueStore::new();
        let parser = match parse_budget {
            Some(budget) => ParseScheduler::with_budget(queue.clone(), pipeline, budget),
            None => ParseScheduler::new(queue.clone(), pipeline),
        };
        let submitter = SubmitScheduler::new(queue.clone(), api);
        Self {
            queue,
            parser,
            submitter,
        }
    }

    pub fn with_success_callback(mut self, callback: SuccessCallback) -> Self {
        self.submitter = self.submitter.with_success_callback(callback);
        self
    }

    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    pub fn parser(&self) -> &ParseScheduler {
        &self.parser
    }

    pub fn submitter(&self) -> &SubmitScheduler {
        &self.submitter
    }

    pub fn enqueue(&self, uploads: Vec<NewUpload>) -> Vec<ItemId> {
        self.queue.enqueue(uploads)
    }

    /// Load files from disk (pairing live photos) and queue them
    pub async fn enqueue_paths(&self, paths: &[PathBuf]) -> Result<Vec<ItemId>, IntakeError> {
        let uploads = load_uploads(paths).await?;
        Ok(self.queue.enqueue(uploads))
    }

    pub fn set_edit_draft(&self, id: &str, draft: EditDraft) -> bool {
        self.queue
            .update_item(id, ItemPatch::default().edit_draft(Some(draft)))
    }

    /// Apply the same draft to every item that has not been uploaded yet
    pub fn set_edit_draft_all(&self, draft: &EditDraft) -> usize {
        self.queue
            .snapshot()
            .into_iter()
            .filter(|item| {
                !matches!(
                    item.status,
                    ItemStatus::Uploading | ItemStatus::UploadCompleted
                )
            })
            .filter(|item| self.set_edit_draft(&item.id, draft.clone()))
            .count()
    }

    /// Parse everything queued and wait until the parse phase is idle
    pub async fn parse_all(&self) {
        self.parser.run_until_idle().await;
    }

    pub fn can_submit(&self) -> bool {
        self.submitter.can_submit()
    }

    pub async fn submit(&self) -> Result<SubmitReport, SubmitError> {
        self.submitter.submit().await
    }

    /// Retry every failed item. Returns the ids sent back.
    pub fn retry_failed(&self) -> Vec<ItemId> {
        let retried: Vec<ItemId> = self
            .queue
            .snapshot()
            .into_iter()
            .filter(|item| {
                matches!(
                    item.status,
                    ItemStatus::ParseFailed | ItemStatus::UploadFailed
                )
            })
            .filter_map(|item| self.queue.retry_item(&item.id).ok().map(|_| item.id))
            .collect();

        if !retried.is_empty() {
            info!("Retrying {} failed item(s)", retried.len());
        }
        retried
    }

    /// Item count per status, for summaries
    pub fn status_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for item in self.queue.snapshot() {
            *counts.entry(item.status.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Extractors;
    use crate::geo::{GeoPoint, RegionResolver};
    use crate::models::{ExifInfo, GpsInfo};
    use crate::test_support::{png_upload, MockGeocoder, MockPhotoBackend, StaticExifReader};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_gps_photo_end_to_end() {
        crate::test_support::tracing_init();

        let exif = ExifInfo {
            make: Some("Apple".into()),
            gps: Some(GpsInfo {
                latitude: 31.2304,
                longitude: 121.4737,
                altitude: Some(4.0),
            }),
            ..Default::default()
        };
        let extractors = Extractors {
            exif: Arc::new(StaticExifReader::new(Some(exif))),
            ..Extractors::default()
        };
        let geocoder = Arc::new(MockGeocoder::new());
        let pipeline = ParsePipeline::new(extractors, RegionResolver::new(geocoder.clone()));
        let backend = Arc::new(MockPhotoBackend::new());
        let api = PhotoApiClient::new(backend.clone(), Some("token".into()));

        let successes = Arc::new(AtomicUsize::new(0));
        let session = UploadSession::new(pipeline, api, Some(2)).with_success_callback({
            let successes = successes.clone();
            Arc::new(move |n| {
                successes.fetch_add(n, Ordering::SeqCst);
            })
        });

        let id = session.enqueue(vec![png_upload("bund.png", 9)]).remove(0);
        session.parse_all().await;

        let parsed = session.queue().get(&id).unwrap();
        assert_eq!(parsed.status, ItemStatus::Parsed);
        let metadata = parsed.metadata.unwrap();
        let geo = metadata.geo.clone().unwrap();
        assert_eq!(geo.region.unwrap(), MockGeocoder::default_region());
        assert_eq!(geo.point, GeoPoint::new(31.23, 121.47));
        assert!(metadata.privacy.exif_gps_removed);
        assert!(metadata.exif.unwrap().gps.is_none());
        assert_eq!(geocoder.reverse_calls(), 1);

        assert!(session.can_submit());
        let report = session.submit().await.unwrap();
        assert_eq!(report.completed, vec![id.clone()]);

        let done = session.queue().get(&id).unwrap();
        assert_eq!(done.status, ItemStatus::UploadCompleted);
        assert_eq!(done.progress, 100);
        assert_eq!(successes.load(Ordering::SeqCst), 1);

        let stored = backend.finalized();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].privacy.exif_gps_removed);
    }

    #[tokio::test]
    async fn test_retry_failed_requeues_both_phases() {
        let pipeline = ParsePipeline::new(
            Extractors::default(),
            RegionResolver::new(Arc::new(MockGeocoder::new())),
        );
        let api = PhotoApiClient::new(Arc::new(MockPhotoBackend::new()), Some("t".into()));
        let session = UploadSession::new(pipeline, api, Some(2));

        let ids = session.enqueue(vec![png_upload("a.png", 1), png_upload("b.png", 2)]);
        session.queue().update_item(
            &ids[0],
            ItemPatch::default().status(ItemStatus::ParseFailed),
        );
        session.queue().update_item(
            &ids[1],
            ItemPatch::default().status(ItemStatus::UploadFailed),
        );

        assert_eq!(session.retry_failed(), ids);
        assert_eq!(session.status_counts().get("queued_parse"), Some(&1));
        assert_eq!(session.status_counts().get("parsed"), Some(&1));
    }
}
