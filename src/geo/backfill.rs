use crate::api::{MetadataPatch, PhotoApiClient};
use crate::geo::RegionInfo;
use crate::models::{GeoInfo, ImageId, ImageMetadata};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Write attempts per image id before the photo is given up on
pub const MAX_BACKFILL_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillOutcome {
    /// Region was patched onto the stored image
    Written,
    /// Nothing to do: already written or in flight, region unknown,
    /// region already embedded, or no token
    Skipped,
    /// This attempt failed; a later pass may retry
    Failed,
    /// Attempts exhausted for this process
    GaveUp,
}

#[derive(Debug, Default)]
struct GuardEntry {
    attempts: u32,
    in_flight: bool,
    written: bool,
}

/// Writes resolved regions back onto already-uploaded photos, once per image id.
///
/// Display code fires these and moves on; `wait_idle` exists for shutdown and tests.
#[derive(Clone)]
pub struct RegionBackfill {
    api: PhotoApiClient,
    guard: Arc<Mutex<HashMap<ImageId, GuardEntry>>>,
    pending: Arc<Mutex<Vec<JoinHandle<BackfillOutcome>>>>,
}

impl RegionBackfill {
    pub fn new(api: PhotoApiClient) -> Self {
        Self {
            api,
            guard: Arc::new(Mutex::new(HashMap::new())),
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Claim the guard for `image_id`, or say why not
    fn claim(&self, image_id: &ImageId) -> Result<(), BackfillOutcome> {
        let mut guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = guard.entry(image_id.clone()).or_default();

        if entry.written || entry.in_flight {
            return Err(BackfillOutcome::Skipped);
        }
        if entry.attempts >= MAX_BACKFILL_ATTEMPTS {
            return Err(BackfillOutcome::GaveUp);
        }

        entry.attempts += 1;
        entry.in_flight = true;
        Ok(())
    }

    fn release(&self, image_id: &ImageId, written: bool) {
        let mut guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = guard.get_mut(image_id) {
            entry.in_flight = false;
            entry.written = written;
        }
    }

    /// Attempts made so far for an image
    pub fn attempts(&self, image_id: &ImageId) -> u32 {
        let guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        guard.get(image_id).map(|entry| entry.attempts).unwrap_or(0)
    }

    /// Patch `region` onto the stored image unless it already carries one
    pub async fn backfill(&self, metadata: &ImageMetadata, region: &RegionInfo) -> BackfillOutcome {
        if region.is_unknown() || metadata.embedded_region().is_some() || !self.api.has_token() {
            return BackfillOutcome::Skipped;
        }

        let image_id = &metadata.image_id;
        if let Err(outcome) = self.claim(image_id) {
            return outcome;
        }

        let patch = MetadataPatch {
            geo: Some(GeoInfo {
                point: metadata.point().map(|point| point.coarsened()),
                region: Some(region.clone()),
            }),
            ..Default::default()
        };

        match self.api.update_image_metadata(image_id, &patch).await {
            Ok(()) => {
                info!("Backfilled region '{}' onto {}", region.display_name, image_id);
                self.release(image_id, true);
                BackfillOutcome::Written
            }
            Err(e) => {
                warn!("Region backfill for {} failed: {}", image_id, e);
                self.release(image_id, false);
                BackfillOutcome::Failed
            }
        }
    }

    /// Run a backfill in the background
    pub fn spawn(&self, metadata: ImageMetadata, region: RegionInfo) {
        let this = self.clone();
        let handle = tokio::spawn(async move { this.backfill(&metadata, &region).await });
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Wait for every spawned backfill and return their outcomes
    pub async fn wait_idle(&self) -> Vec<BackfillOutcome> {
        let handles: Vec<_> = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.drain(..).collect()
        };

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => debug!("Backfill task did not finish: {}", e),
            }
        }
        outcomes
    }
}
