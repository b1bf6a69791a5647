#![cfg(feature = "test-utils")]

mod support;

use crate::support::{jpeg_bytes, tracing_init};
use chrono::NaiveDate;
use exif::experimental::Writer;
use exif::{Field, In, Tag, Value};
use snapvault::api::PhotoApiClient;
use snapvault::extract::{ExifReader, Extractors, KamadakExifReader};
use snapvault::geo::{GeoPoint, RegionResolver};
use snapvault::test_support::{MockGeocoder, MockPhotoBackend};
use snapvault::upload::{ItemStatus, NewUpload, ParsePipeline, SourceFile, UploadSession};
use std::io::Cursor;
use std::sync::Arc;

fn field(tag: Tag, value: Value) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value,
    }
}

fn ascii(text: &str) -> Value {
    Value::Ascii(vec![text.as_bytes().to_vec()])
}

/// JPEG carrying an APP1 EXIF segment for Santiago de Chile, 12 m below sea level
fn santiago_jpeg() -> Vec<u8> {
    let fields = vec![
        field(Tag::Make, ascii("FUJIFILM")),
        field(Tag::Model, ascii("X100V")),
        field(Tag::DateTimeOriginal, ascii("2023:11:04 16:45:10")),
        field(Tag::GPSLatitudeRef, ascii("S")),
        field(
            Tag::GPSLatitude,
            Value::Rational(vec![(33, 1).into(), (26, 1).into(), (5604, 100).into()]),
        ),
        field(Tag::GPSLongitudeRef, ascii("W")),
        field(
            Tag::GPSLongitude,
            Value::Rational(vec![(70, 1).into(), (40, 1).into(), (948, 100).into()]),
        ),
        field(Tag::GPSAltitudeRef, Value::Byte(vec![1])),
        field(Tag::GPSAltitude, Value::Rational(vec![(12, 1).into()])),
    ];

    let mut writer = Writer::new();
    for f in &fields {
        writer.push_field(f);
    }
    let mut tiff = Cursor::new(Vec::new());
    writer.write(&mut tiff, false).expect("write tiff");
    let tiff = tiff.into_inner();

    let jpeg = jpeg_bytes(21);
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

    let segment_len = (2 + 6 + tiff.len()) as u16;
    let mut out = Vec::with_capacity(jpeg.len() + tiff.len() + 10);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(&tiff);
    out.extend_from_slice(&jpeg[2..]);
    out
}

#[test]
fn test_reader_applies_hemisphere_and_altitude_refs() {
    let exif = KamadakExifReader
        .read(&santiago_jpeg())
        .unwrap()
        .expect("exif block present");

    assert_eq!(exif.make.as_deref(), Some("FUJIFILM"));
    assert_eq!(exif.model.as_deref(), Some("X100V"));
    assert_eq!(
        exif.taken_at,
        NaiveDate::from_ymd_opt(2023, 11, 4).and_then(|d| d.and_hms_opt(16, 45, 10))
    );

    let gps = exif.gps.expect("gps block");
    assert!((gps.latitude + 33.4489).abs() < 1e-4, "lat {}", gps.latitude);
    assert!((gps.longitude + 70.6693).abs() < 1e-4, "lon {}", gps.longitude);
    assert_eq!(gps.altitude, Some(-12.0));
}

#[test]
fn test_reader_returns_none_without_exif() {
    assert!(KamadakExifReader.read(&jpeg_bytes(3)).unwrap().is_none());
}

#[tokio::test]
async fn test_parsed_photo_keeps_region_and_drops_exact_gps() {
    tracing_init();
    let geocoder = Arc::new(MockGeocoder::new());
    let pipeline = ParsePipeline::new(Extractors::default(), RegionResolver::new(geocoder.clone()));
    let api = PhotoApiClient::new(Arc::new(MockPhotoBackend::new()), Some("token".into()));
    let session = UploadSession::new(pipeline, api, Some(2));

    let file = SourceFile::new("santiago.jpg", "image/jpeg", santiago_jpeg());
    let id = session.enqueue(vec![NewUpload::still(file)]).remove(0);
    session.parse_all().await;

    let item = session.queue().get(&id).unwrap();
    assert_eq!(item.status, ItemStatus::Parsed, "error: {:?}", item.error);
    let metadata = item.metadata.unwrap();

    assert_eq!(
        metadata.taken_at,
        NaiveDate::from_ymd_opt(2023, 11, 4).and_then(|d| d.and_hms_opt(16, 45, 10))
    );
    let exif = metadata.exif.expect("camera fields kept");
    assert_eq!(exif.make.as_deref(), Some("FUJIFILM"));
    assert!(exif.gps.is_none());
    assert!(metadata.privacy.exif_gps_removed);

    let geo = metadata.geo.expect("geo");
    assert_eq!(geo.point, GeoPoint::new(-33.45, -70.67));
    assert_eq!(geo.region, Some(MockGeocoder::default_region()));
    assert_eq!(geocoder.reverse_calls(), 1);
}
