// # Region Resolution
//
// Turns GPS coordinates into administrative regions and groups photos by them:
// - `Geocoder`: reverse geocoding + boundary service (HTTP or mock)
// - `RegionResolver`: per-point cache, concurrent lookups share one call
// - `RegionBackfill`: writes resolved regions back onto uploaded photos
// - `BoundaryCache`: polygon per region key with capped retries
// - `RegionAtlas`: per-region aggregation behind the map and poster views

mod aggregate;
mod backfill;
mod boundary;
mod geocoder;
mod region;
mod resolver;

pub use aggregate::{
    aggregate_regions, InvalidMonth, MonthFilter, RegionAggregate, RegionAtlas,
    REGION_PHOTO_SAMPLE,
};
pub use backfill::{BackfillOutcome, RegionBackfill, MAX_BACKFILL_ATTEMPTS};
pub use boundary::{BoundaryCache, DEFAULT_BOUNDARY_RETRIES};
pub use geocoder::{GeoError, Geocoder, HttpGeocoder};
pub use region::{GeoPoint, PointKey, RegionInfo, UNKNOWN_REGION_KEY, UNKNOWN_REGION_NAME};
pub use resolver::RegionResolver;
