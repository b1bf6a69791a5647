use crate::geo::{Geocoder, RegionInfo};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retries after the first attempt (3 lookups total)
pub const DEFAULT_BOUNDARY_RETRIES: u32 = 2;

#[derive(Debug, Default)]
struct BoundaryEntry {
    geometry: Option<Value>,
    attempts: u32,
}

#[derive(Debug, Default)]
struct BoundaryState {
    keys: BTreeSet<String>,
    entries: HashMap<String, BoundaryEntry>,
}

/// Region polygons for the map view.
///
/// A region whose lookup keeps coming back empty is given up on after
/// `max_retries` retries. The give-up lasts until the set of requested
/// region keys changes; resolved geometries are kept across changes.
#[derive(Clone)]
pub struct BoundaryCache {
    geocoder: Arc<dyn Geocoder>,
    max_retries: u32,
    state: Arc<Mutex<BoundaryState>>,
}

impl BoundaryCache {
    pub fn new(geocoder: Arc<dyn Geocoder>) -> Self {
        Self::with_max_retries(geocoder, DEFAULT_BOUNDARY_RETRIES)
    }

    pub fn with_max_retries(geocoder: Arc<dyn Geocoder>, max_retries: u32) -> Self {
        Self {
            geocoder,
            max_retries,
            state: Arc::new(Mutex::new(BoundaryState::default())),
        }
    }

    /// Decide which regions need a lookup this pass.
    /// Returns (regions to fetch, geometries already known).
    fn plan(&self, regions: &[RegionInfo]) -> (Vec<RegionInfo>, HashMap<String, Option<Value>>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let keys: BTreeSet<String> = regions
            .iter()
            .filter(|region| !region.is_unknown())
            .map(|region| region.cache_key.clone())
            .collect();

        if keys != state.keys {
            debug!("Region key set changed, resetting boundary retries");
            for entry in state.entries.values_mut() {
                if entry.geometry.is_none() {
                    entry.attempts = 0;
                }
            }
            state.keys = keys;
        }

        let max_attempts = self.max_retries + 1;
        let mut to_fetch = Vec::new();
        let mut known = HashMap::new();

        for region in regions.iter().filter(|region| !region.is_unknown()) {
            if known.contains_key(&region.cache_key)
                || to_fetch
                    .iter()
                    .any(|r: &RegionInfo| r.cache_key == region.cache_key)
            {
                continue;
            }

            let entry = state.entries.entry(region.cache_key.clone()).or_default();
            if entry.geometry.is_some() || entry.attempts >= max_attempts {
                known.insert(region.cache_key.clone(), entry.geometry.clone());
            } else {
                to_fetch.push(region.clone());
            }
        }

        (to_fetch, known)
    }

    /// Counted when the lookup starts, so regions a cancelled pass never
    /// reached keep their attempts
    fn begin_attempt(&self, key: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = state.entries.get_mut(key) {
            entry.attempts += 1;
        }
    }

    fn store(&self, key: &str, geometry: Option<Value>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = state.entries.get_mut(key) {
            entry.geometry = geometry;
        }
    }

    /// Boundary per region key (`None` = no polygon known).
    ///
    /// Returns `None` when cancelled before all lookups finished.
    pub async fn fetch_all(
        &self,
        regions: &[RegionInfo],
        cancel: &CancellationToken,
    ) -> Option<HashMap<String, Option<Value>>> {
        if cancel.is_cancelled() {
            return None;
        }
        let (to_fetch, mut boundaries) = self.plan(regions);

        for region in to_fetch {
            if cancel.is_cancelled() {
                return None;
            }
            self.begin_attempt(&region.cache_key);
            let lookup = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                result = self.geocoder.region_boundary(&region) => result,
            };

            let geometry = match lookup {
                Ok(geometry) => geometry,
                Err(e) => {
                    warn!("Boundary lookup for '{}' failed: {}", region.display_name, e);
                    None
                }
            };

            self.store(&region.cache_key, geometry.clone());
            boundaries.insert(region.cache_key, geometry);
        }

        Some(boundaries)
    }

    pub fn attempts(&self, cache_key: &str) -> u32 {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .entries
            .get(cache_key)
            .map(|entry| entry.attempts)
            .unwrap_or(0)
    }
}
