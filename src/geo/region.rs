use serde::{Deserialize, Serialize};

pub const UNKNOWN_REGION_NAME: &str = "Unknown Region";
pub const UNKNOWN_REGION_KEY: &str = "unknown";

/// Cache keys round coordinates to this many decimal places (~11 m)
const POINT_KEY_SCALE: f64 = 10_000.0;
/// Coordinates kept after the privacy scrub are rounded to ~1 km
const COARSE_SCALE: f64 = 100.0;

/// A validated WGS84 coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Returns `None` for NaN or out-of-range coordinates, and for the
    /// (0, 0) placeholder some cameras write when they have no fix.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return None;
        }
        if latitude == 0.0 && longitude == 0.0 {
            return None;
        }
        Some(GeoPoint {
            latitude,
            longitude,
        })
    }

    pub fn key(&self) -> PointKey {
        PointKey {
            lat: (self.latitude * POINT_KEY_SCALE).round() as i64,
            lng: (self.longitude * POINT_KEY_SCALE).round() as i64,
        }
    }

    pub fn coarsened(&self) -> GeoPoint {
        GeoPoint {
            latitude: (self.latitude * COARSE_SCALE).round() / COARSE_SCALE,
            longitude: (self.longitude * COARSE_SCALE).round() / COARSE_SCALE,
        }
    }
}

/// Identity of a point for region caching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointKey {
    lat: i64,
    lng: i64,
}

/// Administrative region a photo was taken in
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionInfo {
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub province: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub district: String,
    pub display_name: String,
    pub cache_key: String,
}

impl RegionInfo {
    pub fn new(
        country: impl Into<String>,
        province: impl Into<String>,
        city: impl Into<String>,
        district: impl Into<String>,
    ) -> Self {
        let country = country.into().trim().to_string();
        let province = province.into().trim().to_string();
        let city = city.into().trim().to_string();
        let district = district.into().trim().to_string();

        if [&country, &province, &city, &district]
            .iter()
            .all(|part| part.is_empty())
        {
            return RegionInfo::unknown();
        }

        let display_name = display_name_for(&country, &province, &city, &district);
        let cache_key = [&country, &province, &city, &district]
            .iter()
            .map(|part| part.to_lowercase())
            .collect::<Vec<_>>()
            .join("|");

        RegionInfo {
            country,
            province,
            city,
            district,
            display_name,
            cache_key,
        }
    }

    /// Sentinel for photos without any usable location
    pub fn unknown() -> Self {
        RegionInfo {
            country: String::new(),
            province: String::new(),
            city: String::new(),
            district: String::new(),
            display_name: UNKNOWN_REGION_NAME.to_string(),
            cache_key: UNKNOWN_REGION_KEY.to_string(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.cache_key == UNKNOWN_REGION_KEY
    }
}

/// "District, City, Province, Country" with empty and repeated parts dropped
/// (municipalities often report the same name as city and province).
/// Carries every part of the cache key, so distinct regions never share a name.
fn display_name_for(country: &str, province: &str, city: &str, district: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in [district, city, province, country] {
        if !part.is_empty() && !parts.contains(&part) {
            parts.push(part);
        }
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_display_name_skips_duplicates() {
        let region = RegionInfo::new("China", "Shanghai", "Shanghai", "Pudong");
        assert_eq!(region.display_name, "Pudong, Shanghai, China");
        assert_eq!(region.cache_key, "china|shanghai|shanghai|pudong");

        let city_only = RegionInfo::new("China", "Shanghai", "Shanghai", "");
        assert_eq!(city_only.display_name, "Shanghai, China");
    }

    #[test]
    fn test_districts_of_one_city_have_distinct_names() {
        let pudong = RegionInfo::new("China", "Shanghai", "Shanghai", "Pudong");
        let huangpu = RegionInfo::new("China", "Shanghai", "Shanghai", "Huangpu");
        assert_ne!(pudong.cache_key, huangpu.cache_key);
        assert_ne!(pudong.display_name, huangpu.display_name);
    }

    #[test]
    fn test_empty_region_is_unknown() {
        let region = RegionInfo::new(" ", "", "", "");
        assert!(region.is_unknown());
        assert_eq!(region.display_name, UNKNOWN_REGION_NAME);
    }

    #[test]
    fn test_point_validation() {
        assert!(GeoPoint::new(91.0, 0.5).is_none());
        assert!(GeoPoint::new(10.0, 181.0).is_none());
        assert!(GeoPoint::new(f64::NAN, 1.0).is_none());
        assert!(GeoPoint::new(0.0, 0.0).is_none());
        assert!(GeoPoint::new(48.8584, 2.2945).is_some());
    }

    #[test]
    fn test_nearby_points_share_a_key() {
        let a = GeoPoint::new(48.858_41, 2.294_52).unwrap();
        let b = GeoPoint::new(48.858_43, 2.294_49).unwrap();
        let far = GeoPoint::new(48.86, 2.29).unwrap();
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), far.key());
    }

    #[test]
    fn test_coarsened_point() {
        let point = GeoPoint::new(31.230_416, 121.473_701).unwrap().coarsened();
        assert_eq!(point.latitude, 31.23);
        assert_eq!(point.longitude, 121.47);
    }
}
