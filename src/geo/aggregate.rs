use crate::geo::{GeoPoint, RegionBackfill, RegionInfo, RegionResolver};
use crate::models::{ImageId, ImageMetadata};
use chrono::{Datelike, NaiveDateTime};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Photo ids kept per region for previews
pub const REGION_PHOTO_SAMPLE: usize = 6;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid month '{0}', expected YYYY-MM")]
pub struct InvalidMonth(pub String);

/// Restricts aggregation to photos taken in one calendar month
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthFilter {
    pub year: i32,
    pub month: u32,
}

impl MonthFilter {
    pub fn matches(&self, metadata: &ImageMetadata) -> bool {
        match capture_time(metadata) {
            Some(taken) => taken.year() == self.year && taken.month() == self.month,
            None => false,
        }
    }
}

impl FromStr for MonthFilter {
    type Err = InvalidMonth;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidMonth(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(invalid());
        }
        Ok(MonthFilter { year, month })
    }
}

impl fmt::Display for MonthFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Capture time, falling back to EXIF and then to the upload time
fn capture_time(metadata: &ImageMetadata) -> Option<NaiveDateTime> {
    metadata
        .taken_at
        .or_else(|| metadata.exif.as_ref().and_then(|exif| exif.taken_at))
        .or_else(|| metadata.uploaded_at.map(|at| at.naive_utc()))
}

/// Photos grouped under one region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionAggregate {
    pub region: RegionInfo,
    pub count: usize,
    /// First known coordinate among the region's photos
    pub representative: Option<GeoPoint>,
    /// Up to `REGION_PHOTO_SAMPLE` ids, in input order
    pub photos: Vec<ImageId>,
    pub first_taken_at: Option<NaiveDateTime>,
    pub last_taken_at: Option<NaiveDateTime>,
}

impl RegionAggregate {
    fn new(region: RegionInfo) -> Self {
        RegionAggregate {
            region,
            count: 0,
            representative: None,
            photos: Vec::new(),
            first_taken_at: None,
            last_taken_at: None,
        }
    }

    fn add(&mut self, metadata: &ImageMetadata) {
        self.count += 1;
        if self.representative.is_none() {
            self.representative = metadata.point();
        }
        if self.photos.len() < REGION_PHOTO_SAMPLE {
            self.photos.push(metadata.image_id.clone());
        }
        if let Some(taken) = capture_time(metadata) {
            self.first_taken_at = Some(self.first_taken_at.map_or(taken, |t| t.min(taken)));
            self.last_taken_at = Some(self.last_taken_at.map_or(taken, |t| t.max(taken)));
        }
    }
}

/// Group already-resolved photos by region key.
/// Sorted by photo count (descending), then display name.
pub fn aggregate_regions<'a, I>(entries: I) -> Vec<RegionAggregate>
where
    I: IntoIterator<Item = (&'a ImageMetadata, RegionInfo)>,
{
    let mut by_key: HashMap<String, RegionAggregate> = HashMap::new();
    for (metadata, region) in entries {
        by_key
            .entry(region.cache_key.clone())
            .or_insert_with(|| RegionAggregate::new(region))
            .add(metadata);
    }

    let mut aggregates: Vec<RegionAggregate> = by_key.into_values().collect();
    aggregates.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.region.display_name.cmp(&b.region.display_name))
    });
    aggregates
}

/// Builds the per-region view of the library
#[derive(Clone)]
pub struct RegionAtlas {
    resolver: RegionResolver,
    backfill: Option<RegionBackfill>,
}

impl RegionAtlas {
    pub fn new(resolver: RegionResolver, backfill: Option<RegionBackfill>) -> Self {
        Self { resolver, backfill }
    }

    pub fn backfill(&self) -> Option<&RegionBackfill> {
        self.backfill.as_ref()
    }

    /// Resolve every photo's region and aggregate.
    ///
    /// Photos without an embedded region get their resolved region written
    /// back in the background. Returns `None` when cancelled.
    pub async fn build(
        &self,
        photos: &[ImageMetadata],
        month: Option<MonthFilter>,
        cancel: &CancellationToken,
    ) -> Option<Vec<RegionAggregate>> {
        let mut resolved = Vec::with_capacity(photos.len());

        for metadata in photos {
            if let Some(filter) = month {
                if !filter.matches(metadata) {
                    continue;
                }
            }

            let region = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                region = self.resolver.region_for(metadata) => region,
            };

            if let Some(backfill) = &self.backfill {
                if metadata.embedded_region().is_none() && !region.is_unknown() {
                    backfill.spawn(metadata.clone(), region.clone());
                }
            }

            resolved.push((metadata, region));
        }

        debug!("Aggregating {} photo(s) into regions", resolved.len());
        Some(aggregate_regions(resolved))
    }
}
