use crate::geo::{GeoPoint, Geocoder, PointKey, RegionInfo};
use crate::models::ImageMetadata;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Cached reverse geocoding keyed by the point rounded to 4 decimals.
///
/// Lives for the process; nothing is persisted. Failed lookups are not
/// cached, so a later call for the same point asks the service again.
/// Cloning is cheap (clones Arc).
#[derive(Clone)]
pub struct RegionResolver {
    geocoder: Arc<dyn Geocoder>,
    cache: Arc<Mutex<HashMap<PointKey, Arc<OnceCell<RegionInfo>>>>>,
}

impl std::fmt::Debug for RegionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionResolver")
            .field("geocoder", &"<dyn Geocoder>")
            .field("cached_points", &self.cached_len())
            .finish()
    }
}

impl RegionResolver {
    pub fn new(geocoder: Arc<dyn Geocoder>) -> Self {
        Self {
            geocoder,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn geocoder(&self) -> Arc<dyn Geocoder> {
        self.geocoder.clone()
    }

    fn cell_for(&self, key: PointKey) -> Arc<OnceCell<RegionInfo>> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.entry(key).or_default().clone()
    }

    /// Region containing `point`, `None` when the service cannot name one.
    ///
    /// Callers racing on the same key wait for the first lookup instead of
    /// issuing their own.
    pub async fn resolve(&self, point: GeoPoint) -> Option<RegionInfo> {
        let cell = self.cell_for(point.key());

        let result = cell
            .get_or_try_init(|| async {
                debug!("Region cache miss for {:?}", point.key());
                self.geocoder.reverse_geocode(point).await
            })
            .await;

        match result {
            Ok(region) => Some(region.clone()),
            Err(e) => {
                warn!(
                    "Reverse geocoding {},{} failed: {}",
                    point.latitude, point.longitude, e
                );
                None
            }
        }
    }

    /// Region to display for a photo: the embedded one if present,
    /// otherwise resolved from its coordinate, otherwise Unknown.
    pub async fn region_for(&self, metadata: &ImageMetadata) -> RegionInfo {
        if let Some(region) = metadata.embedded_region() {
            return region.clone();
        }

        match metadata.point() {
            Some(point) => self
                .resolve(point)
                .await
                .unwrap_or_else(RegionInfo::unknown),
            None => RegionInfo::unknown(),
        }
    }

    /// Number of points with a resolved region
    pub fn cached_len(&self) -> usize {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.values().filter(|cell| cell.initialized()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockGeocoder;

    fn shanghai() -> GeoPoint {
        GeoPoint::new(31.2304, 121.4737).unwrap()
    }

    #[tokio::test]
    async fn test_identical_points_hit_the_service_once() {
        let geocoder = Arc::new(MockGeocoder::new());
        let resolver = RegionResolver::new(geocoder.clone());

        let (a, b, c) = tokio::join!(
            resolver.resolve(shanghai()),
            resolver.resolve(shanghai()),
            resolver.resolve(GeoPoint::new(31.230_41, 121.473_71).unwrap()),
        );

        assert_eq!(a, b);
        assert_eq!(b, c);
        assert!(a.is_some());
        assert_eq!(geocoder.reverse_calls(), 1);
        assert_eq!(resolver.cached_len(), 1);
    }

    #[tokio::test]
    async fn test_failed_lookup_is_retried_later() {
        let geocoder = Arc::new(MockGeocoder::new());
        geocoder.fail_reverse(true);
        let resolver = RegionResolver::new(geocoder.clone());

        assert!(resolver.resolve(shanghai()).await.is_none());

        geocoder.fail_reverse(false);
        assert!(resolver.resolve(shanghai()).await.is_some());
        assert_eq!(geocoder.reverse_calls(), 2);
    }

    #[tokio::test]
    async fn test_region_for_prefers_embedded_region() {
        let geocoder = Arc::new(MockGeocoder::new());
        let resolver = RegionResolver::new(geocoder.clone());

        let mut metadata = crate::test_support::sample_metadata(b"photo");
        let embedded = RegionInfo::new("France", "Ile-de-France", "Paris", "");
        metadata.geo = Some(crate::models::GeoInfo {
            point: Some(shanghai()),
            region: Some(embedded.clone()),
        });

        assert_eq!(resolver.region_for(&metadata).await, embedded);
        assert_eq!(geocoder.reverse_calls(), 0);
    }

    #[tokio::test]
    async fn test_region_for_without_location_is_unknown() {
        let resolver = RegionResolver::new(Arc::new(MockGeocoder::new()));
        let metadata = crate::test_support::sample_metadata(b"no gps");
        assert!(resolver.region_for(&metadata).await.is_unknown());
    }
}
