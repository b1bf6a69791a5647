#![cfg(feature = "test-utils")]

mod support;

use crate::support::tracing_init;
use chrono::NaiveDate;
use snapvault::api::PhotoApiClient;
use snapvault::geo::{
    BackfillOutcome, BoundaryCache, GeoPoint, MonthFilter, RegionAtlas, RegionBackfill,
    RegionInfo, RegionResolver, UNKNOWN_REGION_NAME,
};
use snapvault::models::{GeoInfo, ImageMetadata};
use snapvault::test_support::{sample_metadata, MockGeocoder, MockPhotoBackend};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn photo(seed: &str, point: Option<(f64, f64)>, taken: Option<(i32, u32, u32)>) -> ImageMetadata {
    let mut metadata = sample_metadata(seed.as_bytes());
    metadata.geo = point.map(|(lat, lon)| GeoInfo {
        point: GeoPoint::new(lat, lon),
        region: None,
    });
    metadata.taken_at = taken.and_then(|(y, m, d)| {
        NaiveDate::from_ymd_opt(y, m, d).and_then(|date| date.and_hms_opt(12, 0, 0))
    });
    metadata
}

fn kyoto() -> RegionInfo {
    RegionInfo::new("Japan", "Kyoto", "Kyoto", "Higashiyama")
}

struct Fixture {
    backend: Arc<MockPhotoBackend>,
    geocoder: Arc<MockGeocoder>,
    api: PhotoApiClient,
}

fn fixture(catalog: Vec<ImageMetadata>) -> Fixture {
    let backend = Arc::new(MockPhotoBackend::with_catalog(catalog));
    let geocoder = Arc::new(MockGeocoder::new());
    geocoder.set_region(GeoPoint::new(34.9949, 135.7856).unwrap(), kyoto());
    let api = PhotoApiClient::new(backend.clone(), Some("token".into()));
    Fixture {
        backend,
        geocoder,
        api,
    }
}

#[tokio::test]
async fn test_paged_catalog_groups_by_region_and_backfills() {
    tracing_init();
    let mut embedded = photo("embedded", Some((31.2304, 121.4737)), Some((2024, 5, 2)));
    if let Some(geo) = embedded.geo.as_mut() {
        geo.region = Some(MockGeocoder::default_region());
    }
    let catalog = vec![
        photo("bund-1", Some((31.2304, 121.4737)), Some((2024, 5, 1))),
        photo("temple", Some((34.9949, 135.7856)), Some((2024, 6, 9))),
        embedded,
        photo("bund-2", Some((31.2305, 121.4738)), Some((2024, 5, 3))),
        photo("no-gps", None, Some((2024, 5, 4))),
    ];
    let f = fixture(catalog);
    let cancel = CancellationToken::new();

    // Two images per page forces three requests
    let images = f.api.list_all_images(2, &cancel).await.unwrap().unwrap();
    assert_eq!(images.len(), 5);

    let atlas = RegionAtlas::new(
        RegionResolver::new(f.geocoder.clone()),
        Some(RegionBackfill::new(f.api.clone())),
    );
    let regions = atlas.build(&images, None, &cancel).await.unwrap();

    let names: Vec<(&str, usize)> = regions
        .iter()
        .map(|r| (r.region.display_name.as_str(), r.count))
        .collect();
    assert_eq!(names[0].1, 3, "three Shanghai photos first: {:?}", names);
    assert_eq!(names[0].0, MockGeocoder::default_region().display_name);
    assert!(names.contains(&(kyoto().display_name.as_str(), 1)));
    assert!(names.contains(&(UNKNOWN_REGION_NAME, 1)));

    let shanghai = &regions[0];
    assert_eq!(
        shanghai.first_taken_at.unwrap().date(),
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    );
    assert_eq!(
        shanghai.last_taken_at.unwrap().date(),
        NaiveDate::from_ymd_opt(2024, 5, 3).unwrap()
    );

    // Embedded region and missing GPS are never written back
    let outcomes = atlas.backfill().unwrap().wait_idle().await;
    let written = outcomes
        .iter()
        .filter(|o| **o == BackfillOutcome::Written)
        .count();
    assert_eq!(written, 3);
    assert_eq!(f.backend.patch_calls(), 3);

    let temple = sample_metadata(b"temple");
    let patch = f.backend.last_patch(&temple.image_id).unwrap();
    let geo = patch.geo.unwrap();
    assert_eq!(geo.region, Some(kyoto()));
    assert_eq!(geo.point, GeoPoint::new(34.99, 135.79));

    // The stored catalog now carries regions, so a second pass is a no-op
    let refreshed = f.api.list_all_images(10, &cancel).await.unwrap().unwrap();
    let atlas = RegionAtlas::new(
        RegionResolver::new(f.geocoder.clone()),
        Some(RegionBackfill::new(f.api.clone())),
    );
    atlas.build(&refreshed, None, &cancel).await.unwrap();
    atlas.backfill().unwrap().wait_idle().await;
    assert_eq!(f.backend.patch_calls(), 3);
}

#[tokio::test]
async fn test_month_filter_limits_the_atlas() {
    let f = fixture(vec![
        photo("may", Some((31.2304, 121.4737)), Some((2024, 5, 20))),
        photo("june", Some((34.9949, 135.7856)), Some((2024, 6, 1))),
        photo("undated", Some((34.9949, 135.7856)), None),
    ]);
    let cancel = CancellationToken::new();
    let images = f.api.list_all_images(50, &cancel).await.unwrap().unwrap();

    let atlas = RegionAtlas::new(RegionResolver::new(f.geocoder.clone()), None);
    let june: MonthFilter = "2024-06".parse().unwrap();
    let regions = atlas.build(&images, Some(june), &cancel).await.unwrap();

    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].region, kyoto());
    assert_eq!(regions[0].count, 1);
    assert_eq!(f.geocoder.reverse_calls(), 1);
}

#[tokio::test]
async fn test_geocoder_outage_lands_in_unknown_and_is_retried_later() {
    let f = fixture(vec![photo("bund", Some((31.2304, 121.4737)), None)]);
    let cancel = CancellationToken::new();
    let images = f.api.list_all_images(50, &cancel).await.unwrap().unwrap();
    let resolver = RegionResolver::new(f.geocoder.clone());

    f.geocoder.fail_reverse(true);
    let atlas = RegionAtlas::new(resolver.clone(), Some(RegionBackfill::new(f.api.clone())));
    let regions = atlas.build(&images, None, &cancel).await.unwrap();
    assert_eq!(regions[0].region.display_name, UNKNOWN_REGION_NAME);
    atlas.backfill().unwrap().wait_idle().await;
    assert_eq!(f.backend.patch_calls(), 0);

    f.geocoder.fail_reverse(false);
    let regions = atlas.build(&images, None, &cancel).await.unwrap();
    assert_eq!(regions[0].region, MockGeocoder::default_region());
    assert_eq!(f.geocoder.reverse_calls(), 2);
}

#[tokio::test]
async fn test_cancelled_build_and_listing_return_none() {
    let f = fixture(vec![photo("a", Some((1.0, 2.0)), None)]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(f.api.list_all_images(10, &cancel).await.unwrap().is_none());
    let atlas = RegionAtlas::new(RegionResolver::new(f.geocoder.clone()), None);
    let images = f.backend.catalog();
    assert!(atlas.build(&images, None, &cancel).await.is_none());
}

#[tokio::test]
async fn test_listing_stops_mid_request_on_cancel() {
    let f = fixture(vec![photo("a", Some((1.0, 2.0)), None)]);
    f.backend.set_list_delay(Duration::from_secs(30));
    let cancel = CancellationToken::new();

    let listing = {
        let api = f.api.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { api.list_all_images(10, &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let listed = tokio::time::timeout(Duration::from_secs(5), listing)
        .await
        .expect("listing returns promptly")
        .unwrap();
    assert!(listed.unwrap().is_none());
}

#[tokio::test]
async fn test_boundaries_for_atlas_regions() {
    let f = fixture(vec![
        photo("bund", Some((31.2304, 121.4737)), None),
        photo("temple", Some((34.9949, 135.7856)), None),
    ]);
    let polygon = serde_json::json!({"type": "Polygon", "coordinates": []});
    f.geocoder.set_boundary(&kyoto().cache_key, polygon.clone());

    let cancel = CancellationToken::new();
    let images = f.api.list_all_images(50, &cancel).await.unwrap().unwrap();
    let atlas = RegionAtlas::new(RegionResolver::new(f.geocoder.clone()), None);
    let regions: Vec<RegionInfo> = atlas
        .build(&images, None, &cancel)
        .await
        .unwrap()
        .into_iter()
        .map(|aggregate| aggregate.region)
        .collect();

    let boundaries = BoundaryCache::new(f.geocoder.clone());
    let found = boundaries.fetch_all(&regions, &cancel).await.unwrap();
    assert_eq!(found.get(&kyoto().cache_key), Some(&Some(polygon)));
    assert_eq!(
        found.get(&MockGeocoder::default_region().cache_key),
        Some(&None)
    );

    // Known polygon is served from cache; the missing one is retried
    boundaries.fetch_all(&regions, &cancel).await.unwrap();
    assert_eq!(f.geocoder.boundary_calls(), 3);
}
