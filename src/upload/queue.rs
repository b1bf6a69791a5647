use crate::extract::Thumbnail;
use crate::upload::{
    ItemId, ItemPatch, ItemStatus, NewUpload, StageId, StagePatch, StageRecord, StageStatus,
    UploadQueueItem,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue item not found: {0}")]
    NotFound(ItemId),
    #[error("Item {id} cannot be retried from status {status}")]
    NotRetryable { id: ItemId, status: ItemStatus },
}

/// Change notifications for progress displays
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Enqueued {
        ids: Vec<ItemId>,
    },
    ItemUpdated {
        id: ItemId,
        status: ItemStatus,
        progress: u8,
    },
    StageUpdated {
        id: ItemId,
        stage: StageId,
        status: StageStatus,
    },
    Removed {
        id: ItemId,
    },
    Retried {
        id: ItemId,
        status: ItemStatus,
    },
}

#[derive(Default)]
struct QueueState {
    items: Vec<UploadQueueItem>,
    thumbnails: HashMap<ItemId, Thumbnail>,
}

impl QueueState {
    fn item_mut(&mut self, id: &str) -> Option<&mut UploadQueueItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }
}

/// Ordered collection of upload items; the single source of truth both
/// schedulers mutate.
///
/// Every call takes the lock, mutates, and releases it before returning,
/// so it is never held across an await. Each mutation bumps a version
/// counter (for scheduler wakeups) and publishes a `QueueEvent`.
/// Cloning is cheap (clones Arc).
#[derive(Clone)]
pub struct QueueStore {
    state: Arc<Mutex<QueueState>>,
    version: Arc<watch::Sender<u64>>,
    events: broadcast::Sender<QueueEvent>,
}

impl Default for QueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            version: Arc::new(version),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: QueueEvent) {
        self.version.send_modify(|v| *v += 1);
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Receiver that changes on every mutation
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Append new items in `queued_parse`. Existing items keep their order.
    pub fn enqueue(&self, uploads: Vec<NewUpload>) -> Vec<ItemId> {
        if uploads.is_empty() {
            return Vec::new();
        }

        let ids: Vec<ItemId> = {
            let mut state = self.lock();
            uploads
                .into_iter()
                .map(|upload| {
                    let id = Uuid::new_v4().to_string();
                    state
                        .items
                        .push(UploadQueueItem::new(id.clone(), upload.file, upload.mode));
                    id
                })
                .collect()
        };

        info!("Enqueued {} file(s)", ids.len());
        self.publish(QueueEvent::Enqueued { ids: ids.clone() });
        ids
    }

    /// Merge `patch` into an item. Returns false when the id is unknown.
    pub fn update_item(&self, id: &str, patch: ItemPatch) -> bool {
        let event = {
            let mut state = self.lock();
            let Some(item) = state.item_mut(id) else {
                return false;
            };
            patch.apply(item);
            QueueEvent::ItemUpdated {
                id: item.id.clone(),
                status: item.status,
                progress: item.progress,
            }
        };

        trace!("Item updated: {:?}", event);
        self.publish(event);
        true
    }

    /// Merge `patch` into one stage of an item; other stages are untouched
    pub fn update_stage(&self, id: &str, stage: StageId, patch: StagePatch) -> bool {
        let event = {
            let mut state = self.lock();
            let Some(item) = state.item_mut(id) else {
                return false;
            };
            let Some(record) = item.stages.iter_mut().find(|record| record.id == stage) else {
                return false;
            };
            patch.apply(record);
            QueueEvent::StageUpdated {
                id: item.id.clone(),
                stage,
                status: record.status,
            }
        };

        self.publish(event);
        true
    }

    /// Remove an item together with its thumbnail binding
    pub fn remove_item(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.lock();
            let before = state.items.len();
            state.items.retain(|item| item.id != id);
            state.thumbnails.remove(id);
            state.items.len() != before
        };

        if removed {
            debug!("Removed queue item {}", id);
            self.publish(QueueEvent::Removed { id: id.to_string() });
        }
        removed
    }

    /// Send a failed item back to the phase it failed in.
    ///
    /// `parse_failed -> queued_parse` (stages reset) and
    /// `upload_failed -> parsed`. Anything else is rejected untouched.
    pub fn retry_item(&self, id: &str) -> Result<ItemStatus, QueueError> {
        let status = {
            let mut state = self.lock();
            let item = state
                .item_mut(id)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

            let next = match item.status {
                ItemStatus::ParseFailed => ItemStatus::QueuedParse,
                ItemStatus::UploadFailed => ItemStatus::Parsed,
                status => {
                    return Err(QueueError::NotRetryable {
                        id: id.to_string(),
                        status,
                    })
                }
            };

            if next == ItemStatus::QueuedParse {
                item.stages = StageRecord::template();
                item.metadata = None;
            }
            item.status = next;
            item.error = None;
            item.progress = 0;
            item.worker_slot = None;
            item.retry_count += 1;

            if next == ItemStatus::QueuedParse {
                state.thumbnails.remove(id);
            }
            next
        };

        info!("Retrying item {} as {}", id, status);
        self.publish(QueueEvent::Retried {
            id: id.to_string(),
            status,
        });
        Ok(status)
    }

    /// Atomically move up to `limit` items from `from` to `to` in FIFO order,
    /// skipping `exclude`. Returns the claimed items as they are after the move.
    pub fn claim(
        &self,
        from: ItemStatus,
        to: ItemStatus,
        limit: usize,
        exclude: &HashSet<ItemId>,
    ) -> Vec<UploadQueueItem> {
        if limit == 0 {
            return Vec::new();
        }

        let claimed: Vec<UploadQueueItem> = {
            let mut state = self.lock();
            state
                .items
                .iter_mut()
                .filter(|item| item.status == from && !exclude.contains(&item.id))
                .take(limit)
                .map(|item| {
                    item.status = to;
                    item.error = None;
                    item.progress = 0;
                    item.clone()
                })
                .collect()
        };

        for item in &claimed {
            self.publish(QueueEvent::ItemUpdated {
                id: item.id.clone(),
                status: item.status,
                progress: item.progress,
            });
        }
        claimed
    }

    pub fn snapshot(&self) -> Vec<UploadQueueItem> {
        self.lock().items.clone()
    }

    pub fn get(&self, id: &str) -> Option<UploadQueueItem> {
        self.lock().items.iter().find(|item| item.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, status: ItemStatus) -> usize {
        self.lock()
            .items
            .iter()
            .filter(|item| item.status == status)
            .count()
    }

    /// Ids in `status`, in queue order
    pub fn ids_with_status(&self, status: ItemStatus) -> Vec<ItemId> {
        self.lock()
            .items
            .iter()
            .filter(|item| item.status == status)
            .map(|item| item.id.clone())
            .collect()
    }

    /// Attach a thumbnail to a live item. Never binds to a removed id.
    pub fn bind_thumbnail(&self, id: &str, thumbnail: Thumbnail) -> bool {
        let mut state = self.lock();
        if !state.items.iter().any(|item| item.id == id) {
            debug!("Not binding thumbnail for removed item {}", id);
            return false;
        }
        state.thumbnails.insert(id.to_string(), thumbnail);
        true
    }

    pub fn thumbnail(&self, id: &str) -> Option<Thumbnail> {
        self.lock().thumbnails.get(id).cloned()
    }

    /// Queue non-empty, nothing left to parse, something parsed, no submission running
    pub fn can_submit(&self, is_submitting: bool) -> bool {
        if is_submitting {
            return false;
        }
        let state = self.lock();
        !state.items.is_empty()
            && !state.items.iter().any(|item| {
                matches!(item.status, ItemStatus::QueuedParse | ItemStatus::Parsing)
            })
            && state
                .items
                .iter()
                .any(|item| item.status == ItemStatus::Parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::{EditDraft, SourceFile};

    fn upload(name: &str) -> NewUpload {
        NewUpload::still(SourceFile::new(name, "image/jpeg", name.as_bytes().to_vec()))
    }

    fn thumb() -> Thumbnail {
        Thumbnail {
            data: Arc::new(vec![0xFF, 0xD8]),
            width: 1,
            height: 1,
            mime_type: "image/jpeg",
        }
    }

    #[test]
    fn test_enqueue_appends_in_order() {
        let store = QueueStore::new();
        let first = store.enqueue(vec![upload("a.jpg"), upload("b.jpg")]);
        let second = store.enqueue(vec![upload("c.jpg")]);

        let names: Vec<_> = store.snapshot().iter().map(|i| i.file.name.clone()).collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg", "c.jpg"]);
        assert_eq!(first.len(), 2);
        assert_ne!(first[0], second[0]);

        let item = store.get(&first[0]).unwrap();
        assert_eq!(item.status, ItemStatus::QueuedParse);
        assert_eq!(item.stages.len(), StageId::ALL.len());
    }

    #[test]
    fn test_update_missing_item_is_noop() {
        let store = QueueStore::new();
        assert!(!store.update_item("missing", ItemPatch::default().progress(10)));
        assert!(!store.update_stage("missing", StageId::Hash, StagePatch::started()));
    }

    #[test]
    fn test_stage_update_leaves_other_stages() {
        let store = QueueStore::new();
        let id = store.enqueue(vec![upload("a.jpg")]).remove(0);

        assert!(store.update_stage(&id, StageId::Exif, StagePatch::failed("bad tag")));
        let item = store.get(&id).unwrap();
        assert_eq!(item.stage(StageId::Exif).unwrap().status, StageStatus::Failed);
        assert_eq!(
            item.stage(StageId::Exif).unwrap().error.as_deref(),
            Some("bad tag")
        );
        assert!(item
            .stages
            .iter()
            .filter(|s| s.id != StageId::Exif)
            .all(|s| s.status == StageStatus::Pending));
    }

    #[test]
    fn test_retry_transitions() {
        let store = QueueStore::new();
        let ids = store.enqueue(vec![upload("a.jpg"), upload("b.jpg"), upload("c.jpg")]);

        store.update_item(
            &ids[0],
            ItemPatch::default().status(ItemStatus::ParseFailed).error("decode"),
        );
        store.update_stage(&ids[0], StageId::Thumbnail, StagePatch::failed("decode"));
        store.update_item(
            &ids[1],
            ItemPatch::default()
                .status(ItemStatus::UploadFailed)
                .error("500")
                .progress(60),
        );

        assert_eq!(store.retry_item(&ids[0]), Ok(ItemStatus::QueuedParse));
        let retried = store.get(&ids[0]).unwrap();
        assert!(retried.error.is_none());
        assert_eq!(retried.retry_count, 1);
        assert!(retried.stages.iter().all(|s| s.status == StageStatus::Pending));

        assert_eq!(store.retry_item(&ids[1]), Ok(ItemStatus::Parsed));
        let retried = store.get(&ids[1]).unwrap();
        assert_eq!(retried.progress, 0);
        assert!(retried.error.is_none());

        assert!(matches!(
            store.retry_item(&ids[2]),
            Err(QueueError::NotRetryable { .. })
        ));
        assert_eq!(store.get(&ids[2]).unwrap().retry_count, 0);
        assert_eq!(
            store.retry_item("missing"),
            Err(QueueError::NotFound("missing".into()))
        );
    }

    #[test]
    fn test_thumbnail_binding_follows_item() {
        let store = QueueStore::new();
        let id = store.enqueue(vec![upload("a.jpg")]).remove(0);

        assert!(store.bind_thumbnail(&id, thumb()));
        assert!(store.thumbnail(&id).is_some());

        assert!(store.remove_item(&id));
        assert!(store.thumbnail(&id).is_none());
        assert!(!store.bind_thumbnail(&id, thumb()));
        assert!(store.thumbnail(&id).is_none());
    }

    #[test]
    fn test_claim_is_fifo_and_skips_excluded() {
        let store = QueueStore::new();
        let ids = store.enqueue(vec![upload("a.jpg"), upload("b.jpg"), upload("c.jpg")]);
        let exclude: HashSet<ItemId> = [ids[0].clone()].into_iter().collect();

        let claimed = store.claim(ItemStatus::QueuedParse, ItemStatus::Parsing, 1, &exclude);
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, ids[1]);
        assert_eq!(store.count(ItemStatus::Parsing), 1);
    }

    #[test]
    fn test_can_submit_truth_table() {
        let store = QueueStore::new();
        assert!(!store.can_submit(false));

        let ids = store.enqueue(vec![upload("a.jpg"), upload("b.jpg")]);
        assert!(!store.can_submit(false));

        store.update_item(&ids[0], ItemPatch::default().status(ItemStatus::Parsed));
        store.update_item(&ids[1], ItemPatch::default().status(ItemStatus::Parsing));
        assert!(!store.can_submit(false));

        store.update_item(&ids[1], ItemPatch::default().status(ItemStatus::ParseFailed));
        assert!(store.can_submit(false));
        assert!(!store.can_submit(true));

        store.update_item(&ids[0], ItemPatch::default().status(ItemStatus::UploadCompleted));
        assert!(!store.can_submit(false));
    }

    #[test]
    fn test_edit_draft_patch_round_trips() {
        let store = QueueStore::new();
        let id = store.enqueue(vec![upload("a.jpg")]).remove(0);
        let draft = EditDraft {
            description: Some("sunset".into()),
            ..Default::default()
        };
        store.update_item(&id, ItemPatch::default().edit_draft(Some(draft.clone())));
        assert_eq!(store.get(&id).unwrap().edit_draft, Some(draft));
    }

    #[tokio::test]
    async fn test_mutations_notify_watchers_and_subscribers() {
        let store = QueueStore::new();
        let mut changes = store.changes();
        let mut events = store.subscribe();

        let ids = store.enqueue(vec![upload("a.jpg")]);
        changes.changed().await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            QueueEvent::Enqueued { ids: ids.clone() }
        );

        store.remove_item(&ids[0]);
        assert_eq!(
            events.recv().await.unwrap(),
            QueueEvent::Removed { id: ids[0].clone() }
        );
    }
}
