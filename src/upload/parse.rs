use crate::upload::{ItemId, ItemPatch, ItemStatus, ParsePipeline, QueueStore, UploadQueueItem};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Parse workers for a machine with `parallelism` logical cores: half the
/// cores, at least 2, at most 4.
pub fn parse_budget(parallelism: usize) -> usize {
    (parallelism / 2).clamp(2, 4)
}

pub fn default_parse_budget() -> usize {
    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    parse_budget(parallelism)
}

/// Bounded worker pool that drives `queued_parse` items through the pipeline.
///
/// The in-flight set belongs to this instance. An id stays in it from claim
/// until just before its final status write, so `tick` never double-claims.
pub struct ParseScheduler {
    queue: QueueStore,
    pipeline: ParsePipeline,
    budget: usize,
    /// item id -> worker slot
    in_flight: Arc<Mutex<HashMap<ItemId, usize>>>,
}

impl ParseScheduler {
    pub fn new(queue: QueueStore, pipeline: ParsePipeline) -> Self {
        Self::with_budget(queue, pipeline, default_parse_budget())
    }

    pub fn with_budget(queue: QueueStore, pipeline: ParsePipeline, budget: usize) -> Self {
        Self {
            queue,
            pipeline,
            budget: budget.max(1),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<ItemId, usize>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight().len()
    }

    /// Claim as many queued items as capacity allows and start them.
    /// Returns the number claimed.
    pub fn tick(&self) -> usize {
        // Held for the whole tick so concurrent ticks cannot overshoot the budget
        let mut in_flight = self.in_flight();

        let busy = self.queue.count(ItemStatus::Parsing).max(in_flight.len());
        let available = self.budget.saturating_sub(busy);
        if available == 0 {
            return 0;
        }

        let exclude: HashSet<ItemId> = in_flight.keys().cloned().collect();
        let claimed = self
            .queue
            .claim(ItemStatus::QueuedParse, ItemStatus::Parsing, available, &exclude);

        for item in &claimed {
            let slot = (0..self.budget)
                .find(|slot| !in_flight.values().any(|used| used == slot))
                .unwrap_or(0);
            in_flight.insert(item.id.clone(), slot);
            self.queue
                .update_item(&item.id, ItemPatch::default().worker_slot(Some(slot)));
            debug!("Parse slot {} claimed {}", slot, item.file.name);
        }
        drop(in_flight);

        let count = claimed.len();
        for item in claimed {
            self.spawn_item(item);
        }
        count
    }

    fn spawn_item(&self, item: UploadQueueItem) {
        let queue = self.queue.clone();
        let pipeline = self.pipeline.clone();
        let in_flight = self.in_flight.clone();

        tokio::spawn(async move {
            let id = item.id.clone();
            let name = item.file.name.clone();

            // Inner task so a panicking extractor becomes a JoinError here
            let work = {
                let queue = queue.clone();
                tokio::spawn(async move { pipeline.process(&queue, &item).await })
            };
            let outcome = work.await;

            in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);

            match outcome {
                Ok(Ok(parsed)) => {
                    info!("Parsed {} as {}", name, parsed.metadata.image_id);
                    queue.bind_thumbnail(&id, parsed.thumbnail);
                    queue.update_item(
                        &id,
                        ItemPatch::default()
                            .status(ItemStatus::Parsed)
                            .progress(100)
                            .metadata(parsed.metadata)
                            .clear_error()
                            .worker_slot(None),
                    );
                }
                Ok(Err(e)) => {
                    warn!("Parsing {} failed: {}", name, e);
                    queue.update_item(
                        &id,
                        ItemPatch::default()
                            .status(ItemStatus::ParseFailed)
                            .error(e.to_string())
                            .worker_slot(None),
                    );
                }
                Err(e) => {
                    error!("Parse task for {} panicked: {}", name, e);
                    queue.update_item(
                        &id,
                        ItemPatch::default()
                            .status(ItemStatus::ParseFailed)
                            .error(format!("Parse task panicked: {}", e))
                            .worker_slot(None),
                    );
                }
            }
        });
    }

    /// An id leaves the in-flight set before its final status lands, so the
    /// queue must also show nothing parsing
    fn is_idle(&self) -> bool {
        self.in_flight_count() == 0
            && self.queue.count(ItemStatus::QueuedParse) == 0
            && self.queue.count(ItemStatus::Parsing) == 0
    }

    /// Tick on every queue change until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut changes = self.queue.changes();
        info!("Parse scheduler running with budget {}", self.budget);

        loop {
            changes.borrow_and_update();
            self.tick();

            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Parse scheduler stopped");
    }

    /// Tick until nothing is queued or in flight
    pub async fn run_until_idle(&self) {
        let mut changes = self.queue.changes();

        loop {
            changes.borrow_and_update();
            self.tick();
            if self.is_idle() {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Extractors;
    use crate::geo::RegionResolver;
    use crate::test_support::{png_upload, MockGeocoder, SlowOcr};
    use crate::upload::{NewUpload, SourceFile, StageId, StageStatus};
    use std::time::Duration;

    fn pipeline_with(extractors: Extractors) -> ParsePipeline {
        ParsePipeline::new(
            extractors,
            RegionResolver::new(Arc::new(MockGeocoder::new())),
        )
    }

    #[test]
    fn test_budget_bounds() {
        assert_eq!(parse_budget(1), 2);
        assert_eq!(parse_budget(4), 2);
        assert_eq!(parse_budget(6), 3);
        assert_eq!(parse_budget(8), 4);
        assert_eq!(parse_budget(64), 4);
    }

    #[tokio::test]
    async fn test_parsing_never_exceeds_budget() {
        let ocr = Arc::new(SlowOcr::new(Duration::from_millis(30)));
        let extractors = Extractors {
            ocr: ocr.clone(),
            ..Extractors::default()
        };
        let queue = QueueStore::new();
        let scheduler = ParseScheduler::with_budget(queue.clone(), pipeline_with(extractors), 2);

        let uploads: Vec<NewUpload> = (0..6)
            .map(|i| png_upload(&format!("{}.png", i), i))
            .collect();
        queue.enqueue(uploads);

        // Watch every mutation and record the highest parsing count
        let max_parsing = Arc::new(Mutex::new(0usize));
        let mut events = queue.subscribe();
        let watcher = {
            let queue = queue.clone();
            let max_parsing = max_parsing.clone();
            tokio::spawn(async move {
                while events.recv().await.is_ok() {
                    let parsing = queue.count(ItemStatus::Parsing);
                    let mut max = max_parsing.lock().unwrap();
                    *max = (*max).max(parsing);
                }
            })
        };

        scheduler.run_until_idle().await;
        watcher.abort();

        assert!(*max_parsing.lock().unwrap() <= 2);
        assert!(ocr.max_concurrent() <= 2);
        assert_eq!(queue.count(ItemStatus::Parsed), 6);
        assert_eq!(scheduler.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_affect_siblings() {
        let queue = QueueStore::new();
        let scheduler =
            ParseScheduler::with_budget(queue.clone(), pipeline_with(Extractors::default()), 2);

        let broken = NewUpload::still(SourceFile::new("broken.jpg", "image/jpeg", b"nope".to_vec()));
        let ids = queue.enqueue(vec![png_upload("ok.png", 1), broken, png_upload("ok2.png", 2)]);

        scheduler.run_until_idle().await;

        let failed = queue.get(&ids[1]).unwrap();
        assert_eq!(failed.status, ItemStatus::ParseFailed);
        assert!(failed.error.as_deref().unwrap().contains("thumbnail"));
        assert_eq!(failed.stage(StageId::Hash).unwrap().status, StageStatus::Completed);
        assert_eq!(failed.stage(StageId::Thumbnail).unwrap().status, StageStatus::Failed);
        assert_eq!(failed.stage(StageId::Exif).unwrap().status, StageStatus::Pending);
        assert!(queue.thumbnail(&ids[1]).is_none());

        for id in [&ids[0], &ids[2]] {
            let item = queue.get(id).unwrap();
            assert_eq!(item.status, ItemStatus::Parsed);
            assert_eq!(item.progress, 100);
            assert!(item.metadata.is_some());
            assert!(item.worker_slot.is_none());
            assert!(queue.thumbnail(id).is_some());
        }
    }

    #[tokio::test]
    async fn test_retry_reparses_with_stable_id() {
        let queue = QueueStore::new();
        let scheduler =
            ParseScheduler::with_budget(queue.clone(), pipeline_with(Extractors::default()), 2);

        let id = queue.enqueue(vec![png_upload("a.png", 7)]).remove(0);
        scheduler.run_until_idle().await;
        let first = queue.get(&id).unwrap().metadata.unwrap().image_id;

        // Force a failed state, then retry
        queue.update_item(
            &id,
            ItemPatch::default().status(ItemStatus::ParseFailed).error("boom"),
        );
        queue.retry_item(&id).unwrap();
        assert_eq!(queue.get(&id).unwrap().status, ItemStatus::QueuedParse);
        assert!(queue.get(&id).unwrap().error.is_none());

        scheduler.run_until_idle().await;
        let item = queue.get(&id).unwrap();
        assert_eq!(item.status, ItemStatus::Parsed);
        assert_eq!(item.metadata.unwrap().image_id, first);
    }

    #[tokio::test]
    async fn test_idle_waits_for_final_status() {
        let queue = QueueStore::new();
        let scheduler = Arc::new(ParseScheduler::with_budget(
            queue.clone(),
            pipeline_with(Extractors::default()),
            2,
        ));

        // Out of the in-flight map, final status not yet written
        let id = queue.enqueue(vec![png_upload("a.png", 5)]).remove(0);
        queue.update_item(&id, ItemPatch::default().status(ItemStatus::Parsing));

        let handle = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run_until_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        queue.update_item(&id, ItemPatch::default().status(ItemStatus::Parsed));
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queue.count(ItemStatus::Parsing), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let queue = QueueStore::new();
        let scheduler = Arc::new(ParseScheduler::with_budget(
            queue.clone(),
            pipeline_with(Extractors::default()),
            2,
        ));
        let cancel = CancellationToken::new();

        let handle = {
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };

        let id = queue.enqueue(vec![png_upload("late.png", 3)]).remove(0);
        let mut changes = queue.changes();
        while queue.get(&id).unwrap().status != ItemStatus::Parsed {
            changes.changed().await.unwrap();
        }

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
