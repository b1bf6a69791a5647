// EXIF extraction: converts kamadak-exif fields into `ExifInfo`.
// Only the fields the catalog stores are read; thumbnails and maker notes are ignored.

use crate::extract::ExtractError;
use crate::models::{ExifInfo, GpsInfo};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use exif::{In, Tag, Value};
use std::io::Cursor;
use tracing::debug;

/// Reads EXIF from an original's bytes (allows stubbing for tests)
pub trait ExifReader: Send + Sync {
    /// `Ok(None)` when the file carries no EXIF block
    fn read(&self, data: &[u8]) -> Result<Option<ExifInfo>, ExtractError>;
}

/// Production reader backed by kamadak-exif
#[derive(Debug, Clone, Copy, Default)]
pub struct KamadakExifReader;

impl ExifReader for KamadakExifReader {
    fn read(&self, data: &[u8]) -> Result<Option<ExifInfo>, ExtractError> {
        let exif = match exif::Reader::new().read_from_container(&mut Cursor::new(data)) {
            Ok(exif) => exif,
            Err(exif::Error::NotFound(container)) => {
                debug!("No EXIF block in {} container", container);
                return Ok(None);
            }
            Err(exif::Error::InvalidFormat(reason)) => {
                debug!("EXIF not readable from this format: {}", reason);
                return Ok(None);
            }
            Err(e) => return Err(ExtractError::Exif(e.to_string())),
        };

        Ok(Some(exif_info_from(&exif)))
    }
}

fn exif_info_from(exif: &exif::Exif) -> ExifInfo {
    ExifInfo {
        make: ascii_field(exif, Tag::Make),
        model: ascii_field(exif, Tag::Model),
        lens_model: ascii_field(exif, Tag::LensModel),
        taken_at: datetime_field(exif, Tag::DateTimeOriginal)
            .or_else(|| datetime_field(exif, Tag::DateTimeDigitized))
            .or_else(|| datetime_field(exif, Tag::DateTime)),
        orientation: exif
            .get_field(Tag::Orientation, In::PRIMARY)
            .and_then(|f| f.value.get_uint(0))
            .filter(|v| (1..=8).contains(v))
            .map(|v| v as u16),
        exposure_time: exif
            .get_field(Tag::ExposureTime, In::PRIMARY)
            .and_then(|f| first_rational(&f.value))
            .and_then(format_exposure),
        f_number: exif
            .get_field(Tag::FNumber, In::PRIMARY)
            .and_then(|f| first_rational(&f.value)),
        iso: exif
            .get_field(Tag::PhotographicSensitivity, In::PRIMARY)
            .and_then(|f| f.value.get_uint(0)),
        focal_length: exif
            .get_field(Tag::FocalLength, In::PRIMARY)
            .and_then(|f| first_rational(&f.value)),
        gps: extract_gps(exif),
    }
}

fn ascii_field(exif: &exif::Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match field.value {
        Value::Ascii(ref values) => values
            .first()
            .map(|raw| String::from_utf8_lossy(raw).trim_matches(char::from(0)).trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn datetime_field(exif: &exif::Exif, tag: Tag) -> Option<NaiveDateTime> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let raw = match field.value {
        Value::Ascii(ref values) => values.first()?,
        _ => return None,
    };
    let dt = exif::DateTime::from_ascii(raw).ok()?;
    let date = NaiveDate::from_ymd_opt(dt.year as i32, dt.month as u32, dt.day as u32)?;
    let time = NaiveTime::from_hms_opt(dt.hour as u32, dt.minute as u32, dt.second as u32)?;
    Some(NaiveDateTime::new(date, time))
}

fn first_rational(value: &Value) -> Option<f64> {
    match value {
        Value::Rational(rats) => rats
            .first()
            .filter(|r| r.denom != 0)
            .map(|r| r.to_f64()),
        _ => None,
    }
}

/// "1/250" for fast shutters, "2.5" (seconds) otherwise
fn format_exposure(seconds: f64) -> Option<String> {
    if seconds <= 0.0 || !seconds.is_finite() {
        return None;
    }
    if seconds < 1.0 {
        Some(format!("1/{}", (1.0 / seconds).round() as u32))
    } else {
        Some(format!("{}", (seconds * 10.0).round() / 10.0))
    }
}

/// Degrees/minutes/seconds rationals to a positive decimal degree
fn parse_gps_coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Rational(rats) if rats.len() >= 3 => {
            if rats[..3].iter().any(|r| r.denom == 0) {
                return None;
            }
            Some(rats[0].to_f64() + rats[1].to_f64() / 60.0 + rats[2].to_f64() / 3600.0)
        }
        _ => None,
    }
}

fn reference_is(exif: &exif::Exif, tag: Tag, negative: &str) -> bool {
    let Some(field) = exif.get_field(tag, In::PRIMARY) else {
        return false;
    };
    let reference = match field.value {
        Value::Ascii(ref values) => values
            .first()
            .map(|raw| String::from_utf8_lossy(raw).into_owned())
            .unwrap_or_default(),
        _ => field.value.display_as(tag).to_string(),
    };
    reference
        .trim_matches(char::from(0))
        .trim()
        .trim_matches('"')
        .eq_ignore_ascii_case(negative)
}

fn extract_gps(exif: &exif::Exif) -> Option<GpsInfo> {
    let lat = parse_gps_coordinate(&exif.get_field(Tag::GPSLatitude, In::PRIMARY)?.value)?;
    let lon = parse_gps_coordinate(&exif.get_field(Tag::GPSLongitude, In::PRIMARY)?.value)?;

    let latitude = if reference_is(exif, Tag::GPSLatitudeRef, "S") {
        -lat
    } else {
        lat
    };
    let longitude = if reference_is(exif, Tag::GPSLongitudeRef, "W") {
        -lon
    } else {
        lon
    };

    let altitude = exif
        .get_field(Tag::GPSAltitude, In::PRIMARY)
        .and_then(|f| first_rational(&f.value))
        .map(|alt| {
            let below_sea_level = matches!(
                exif.get_field(Tag::GPSAltitudeRef, In::PRIMARY).map(|f| &f.value),
                Some(Value::Byte(bytes)) if bytes.first() == Some(&1)
            );
            if below_sea_level {
                -alt
            } else {
                alt
            }
        });

    Some(GpsInfo {
        latitude,
        longitude,
        altitude,
    })
}
