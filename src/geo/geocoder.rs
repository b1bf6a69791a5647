use crate::geo::{GeoPoint, RegionInfo};
use reqwest::{Client, Error as ReqwestError};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

const USER_AGENT: &str = "snapvault/0.1 (photo library client)";

#[derive(Error, Debug)]
pub enum GeoError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] ReqwestError),
    #[error("Geocoding service rate limit exceeded")]
    RateLimit,
    #[error("Geocoding service returned {status}")]
    Status { status: u16 },
    #[error("No region found for {latitude},{longitude}")]
    NotFound { latitude: f64, longitude: f64 },
}

/// Reverse geocoding and boundary lookup (allows mocking for tests)
#[async_trait::async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse_geocode(&self, point: GeoPoint) -> Result<RegionInfo, GeoError>;

    /// GeoJSON geometry of the region, `None` when the service has no polygon
    async fn region_boundary(
        &self,
        region: &RegionInfo,
    ) -> Result<Option<serde_json::Value>, GeoError>;
}

/// Reverse response of a Nominatim-compatible service
#[derive(Debug, Deserialize)]
struct ReverseResponse {
    address: Option<AddressResponse>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AddressResponse {
    country: Option<String>,
    state: Option<String>,
    province: Option<String>,
    region: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    county: Option<String>,
    city_district: Option<String>,
    district: Option<String>,
    suburb: Option<String>,
}

impl AddressResponse {
    fn into_region(self) -> RegionInfo {
        let province = self.state.or(self.province).or(self.region);
        let city = self
            .city
            .or(self.town)
            .or(self.village)
            .or(self.municipality)
            .or(self.county);
        let district = self.city_district.or(self.district).or(self.suburb);

        RegionInfo::new(
            self.country.unwrap_or_default(),
            province.unwrap_or_default(),
            city.unwrap_or_default(),
            district.unwrap_or_default(),
        )
    }
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Option<serde_json::Value>,
}

/// HTTP client for a Nominatim-compatible geocoding service
#[derive(Clone)]
pub struct HttpGeocoder {
    client: Client,
    base_url: String,
    language: String,
}

impl HttpGeocoder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            language: "en".to_string(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    fn check_status(response: &reqwest::Response) -> Result<(), GeoError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.as_u16() == 429 {
            warn!("Geocoder rate limit exceeded");
            Err(GeoError::RateLimit)
        } else {
            warn!("Geocoder returned {}", status);
            Err(GeoError::Status {
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait::async_trait]
impl Geocoder for HttpGeocoder {
    async fn reverse_geocode(&self, point: GeoPoint) -> Result<RegionInfo, GeoError> {
        let url = format!("{}/reverse", self.base_url);
        let lat = point.latitude.to_string();
        let lon = point.longitude.to_string();

        debug!("Reverse geocoding {},{}", lat, lon);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("format", "jsonv2"),
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("zoom", "14"),
                ("addressdetails", "1"),
                ("accept-language", self.language.as_str()),
            ])
            .header("User-Agent", USER_AGENT)
            .send()
            .await?;

        Self::check_status(&response)?;

        let body: ReverseResponse = response.json().await?;
        let not_found = GeoError::NotFound {
            latitude: point.latitude,
            longitude: point.longitude,
        };

        if body.error.is_some() {
            return Err(not_found);
        }

        let region = body.address.unwrap_or_default().into_region();
        if region.is_unknown() {
            return Err(not_found);
        }

        Ok(region)
    }

    async fn region_boundary(
        &self,
        region: &RegionInfo,
    ) -> Result<Option<serde_json::Value>, GeoError> {
        if region.is_unknown() {
            return Ok(None);
        }

        let url = format!("{}/search", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("format", "geojson"),
                ("polygon_geojson", "1"),
                ("limit", "1"),
                ("q", region.display_name.as_str()),
                ("accept-language", self.language.as_str()),
            ])
            .header("User-Agent", USER_AGENT)
            .send()
            .await?;

        Self::check_status(&response)?;

        let collection: FeatureCollection = response.json().await?;
        Ok(collection
            .features
            .into_iter()
            .next()
            .and_then(|feature| feature.geometry)
            .filter(|geometry| !geometry.is_null()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_prefers_city_then_town() {
        let address: AddressResponse = serde_json::from_str(
            r#"{"country":"France","state":"Île-de-France","town":"Versailles","suburb":"Notre-Dame"}"#,
        )
        .unwrap();
        let region = address.into_region();
        assert_eq!(region.country, "France");
        assert_eq!(region.province, "Île-de-France");
        assert_eq!(region.city, "Versailles");
        assert_eq!(region.district, "Notre-Dame");
    }

    #[test]
    fn test_county_fills_missing_city() {
        let address: AddressResponse =
            serde_json::from_str(r#"{"country":"Norway","county":"Lofoten"}"#).unwrap();
        assert_eq!(address.into_region().city, "Lofoten");
    }

    #[test]
    fn test_empty_address_is_unknown() {
        let region = AddressResponse::default().into_region();
        assert!(region.is_unknown());
    }
}
