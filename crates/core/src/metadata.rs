use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Field name -> value, as handed over by a metadata provider.
pub type RawMetadata = HashMap<String, String>;

pub const CAPTURE_DATE_TAGS: &[&str] = &[
    "DateTimeOriginal",
    "CreateDate",
    "MediaCreateDate",
    "TrackCreateDate",
    "CreationDate",
    "DateTimeDigitized",
];
pub const CAMERA_TAGS: &[&str] = &["Model"];
pub const LENS_TAGS: &[&str] = &["LensModel", "Lens", "LensID"];
pub const ISO_TAGS: &[&str] = &["ISO", "PhotographicSensitivity", "ISOSpeedRatings"];
pub const APERTURE_TAGS: &[&str] = &["FNumber", "ApertureValue"];
pub const SHUTTER_TAGS: &[&str] = &["ExposureTime", "ShutterSpeed"];
pub const FOCAL_LENGTH_TAGS: &[&str] = &["FocalLength"];
pub const EXPOSURE_BIAS_TAGS: &[&str] = &["ExposureCompensation", "ExposureBiasValue"];
pub const WIDTH_TAGS: &[&str] = &["ImageWidth", "ExifImageWidth", "PixelXDimension"];
pub const HEIGHT_TAGS: &[&str] = &["ImageHeight", "ExifImageHeight", "PixelYDimension"];

/// Extra metadata that can be placed into a filename.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetaField {
    Iso,
    Aperture,
    ShutterSpeed,
    FocalLength,
    Resolution,
    ExposureBias,
}

impl MetaField {
    pub const ALL: [MetaField; 6] = [
        MetaField::Iso,
        MetaField::Aperture,
        MetaField::ShutterSpeed,
        MetaField::FocalLength,
        MetaField::Resolution,
        MetaField::ExposureBias,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Iso => "iso",
            Self::Aperture => "aperture",
            Self::ShutterSpeed => "shutter_speed",
            Self::FocalLength => "focal_length",
            Self::Resolution => "resolution",
            Self::ExposureBias => "exposure_bias",
        }
    }

    fn tags(self) -> &'static [&'static str] {
        match self {
            Self::Iso => ISO_TAGS,
            Self::Aperture => APERTURE_TAGS,
            Self::ShutterSpeed => SHUTTER_TAGS,
            Self::FocalLength => FOCAL_LENGTH_TAGS,
            Self::Resolution => &[],
            Self::ExposureBias => EXPOSURE_BIAS_TAGS,
        }
    }
}

impl fmt::Display for MetaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for MetaField {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "iso" => Ok(Self::Iso),
            "aperture" => Ok(Self::Aperture),
            "shutter" | "shutter_speed" => Ok(Self::ShutterSpeed),
            "focal_length" => Ok(Self::FocalLength),
            "resolution" => Ok(Self::Resolution),
            "exposure_bias" | "exposure_compensation" => Ok(Self::ExposureBias),
            other => Err(ConfigError::UnknownMetaField(other.to_string())),
        }
    }
}

/// A selected extra field that may not have been looked up yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Unresolved,
    Resolved(String),
}

impl FieldValue {
    pub fn as_resolved(&self) -> Option<&str> {
        match self {
            Self::Resolved(value) => Some(value.as_str()),
            Self::Unresolved => None,
        }
    }
}

/// Which groups of fields a lookup asks for. Part of the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FieldSignature {
    pub date: bool,
    pub camera: bool,
    pub lens: bool,
    pub extras: bool,
}

impl FieldSignature {
    pub const DATE_ONLY: FieldSignature = FieldSignature {
        date: true,
        camera: false,
        lens: false,
        extras: false,
    };

    /// Provider tag names covering this signature.
    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags = Vec::new();
        if self.date {
            tags.extend_from_slice(CAPTURE_DATE_TAGS);
        }
        if self.camera {
            tags.extend_from_slice(CAMERA_TAGS);
        }
        if self.lens {
            tags.extend_from_slice(LENS_TAGS);
        }
        if self.extras {
            for field in MetaField::ALL {
                tags.extend_from_slice(field.tags());
            }
            tags.extend_from_slice(WIDTH_TAGS);
            tags.extend_from_slice(HEIGHT_TAGS);
        }
        tags
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Capture date as `YYYYMMDD`.
    pub date: Option<String>,
    pub captured_at: Option<NaiveDateTime>,
    pub camera: Option<String>,
    pub lens: Option<String>,
    pub raw: RawMetadata,
    pub derived: BTreeMap<MetaField, String>,
}

impl MetadataRecord {
    pub fn from_raw(raw: RawMetadata) -> Self {
        let captured_at = capture_timestamp(&raw);
        let date = captured_at.map(|dt| dt.format("%Y%m%d").to_string());
        let camera = lookup(&raw, CAMERA_TAGS).map(str::to_string);
        let lens = lookup(&raw, LENS_TAGS).map(str::to_string);

        let mut derived = BTreeMap::new();
        if let Some(iso) = lookup(&raw, ISO_TAGS).and_then(derive_iso) {
            derived.insert(MetaField::Iso, iso);
        }
        if let Some(aperture) = lookup(&raw, APERTURE_TAGS).and_then(derive_aperture) {
            derived.insert(MetaField::Aperture, aperture);
        }
        if let Some(shutter) = lookup(&raw, SHUTTER_TAGS).and_then(derive_shutter_speed) {
            derived.insert(MetaField::ShutterSpeed, shutter);
        }
        if let Some(focal) = lookup(&raw, FOCAL_LENGTH_TAGS).and_then(derive_focal_length) {
            derived.insert(MetaField::FocalLength, focal);
        }
        if let Some(bias) = lookup(&raw, EXPOSURE_BIAS_TAGS) {
            derived.insert(MetaField::ExposureBias, bias.to_string());
        }
        if let (Some(w), Some(h)) = (
            lookup(&raw, WIDTH_TAGS).and_then(leading_number),
            lookup(&raw, HEIGHT_TAGS).and_then(leading_number),
        ) {
            derived.insert(MetaField::Resolution, format!("{:.0}x{:.0}", w, h));
        }

        Self {
            date,
            captured_at,
            camera,
            lens,
            raw,
            derived,
        }
    }

    pub fn extra(&self, field: MetaField) -> Option<&str> {
        self.derived.get(&field).map(String::as_str)
    }
}

/// Resolves every selected extra field against an optional record.
pub fn resolve_extra_fields(
    selected: &[MetaField],
    record: Option<&MetadataRecord>,
) -> BTreeMap<MetaField, FieldValue> {
    selected
        .iter()
        .map(|field| {
            let value = record
                .and_then(|r| r.extra(*field))
                .map(|v| FieldValue::Resolved(v.to_string()))
                .unwrap_or(FieldValue::Unresolved);
            (*field, value)
        })
        .collect()
}

/// First non-empty value among `names`, matched case-insensitively and
/// ignoring any `Group:` prefix on the stored key.
pub fn lookup<'a>(raw: &'a RawMetadata, names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|name| {
        raw.iter().find_map(|(key, value)| {
            let bare = key.rsplit(':').next().unwrap_or(key.as_str());
            if !bare.eq_ignore_ascii_case(name) {
                return None;
            }
            let value = value.trim();
            if value.is_empty() || value.eq_ignore_ascii_case("unknown") {
                None
            } else {
                Some(value)
            }
        })
    })
}

pub fn capture_timestamp(raw: &RawMetadata) -> Option<NaiveDateTime> {
    CAPTURE_DATE_TAGS
        .iter()
        .filter_map(|tag| lookup(raw, &[tag]))
        .find_map(parse_timestamp)
}

pub fn parse_timestamp(input: &str) -> Option<NaiveDateTime> {
    let normalized = input.trim();
    if normalized.is_empty() || normalized.starts_with("0000") {
        return None;
    }

    let with_offset = [
        "%Y:%m:%d %H:%M:%S%:z",
        "%Y:%m:%d %H:%M:%S%.f%:z",
        "%Y-%m-%dT%H:%M:%S%:z",
        "%Y-%m-%dT%H:%M:%S%.f%:z",
        "%Y-%m-%d %H:%M:%S%:z",
    ];
    for fmt in with_offset {
        if let Ok(dt) = DateTime::parse_from_str(normalized, fmt) {
            return Some(dt.naive_local());
        }
    }

    let naive = [
        "%Y:%m:%d %H:%M:%S",
        "%Y:%m:%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];
    for fmt in naive {
        if let Ok(dt) = NaiveDateTime::parse_from_str(normalized, fmt) {
            return Some(dt);
        }
    }

    for fmt in ["%Y:%m:%d", "%Y-%m-%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(normalized, fmt) {
            return date.and_hms_opt(0, 0, 0);
        }
    }

    None
}

fn derive_iso(value: &str) -> Option<String> {
    let first = value.split([',', ' ']).find(|s| !s.is_empty())?;
    Some(first.to_string())
}

fn derive_aperture(value: &str) -> Option<String> {
    let trimmed = value.trim().trim_start_matches("f/").trim_start_matches('f');
    let number = parse_rational(trimmed)?;
    if number <= 0.0 {
        return None;
    }
    let formatted = format!("{:.1}", number);
    let formatted = formatted.strip_suffix(".0").unwrap_or(&formatted);
    Some(format!("f{}", formatted))
}

fn derive_shutter_speed(value: &str) -> Option<String> {
    let trimmed = value.trim().trim_end_matches('s').trim();
    let seconds = parse_rational(trimmed)?;
    if seconds <= 0.0 {
        return None;
    }
    if seconds >= 1.0 {
        Some(format!("{:.0}s", seconds))
    } else {
        Some(format!("1/{:.0}s", (1.0 / seconds).round()))
    }
}

fn derive_focal_length(value: &str) -> Option<String> {
    let number = leading_number(value)?;
    if number <= 0.0 {
        return None;
    }
    Some(format!("{:.0}mm", number))
}

fn leading_number(value: &str) -> Option<f64> {
    let token = value.trim().split_whitespace().next()?;
    let token = token.trim_end_matches("mm");
    parse_rational(token)
}

fn parse_rational(value: &str) -> Option<f64> {
    let value = value.trim();
    if let Some((num, den)) = value.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den == 0.0 {
            return None;
        }
        return Some(num / den);
    }
    value.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> RawMetadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn record_derives_date_camera_lens_and_exposure_fields() {
        let record = MetadataRecord::from_raw(raw(&[
            ("EXIF:DateTimeOriginal", "2024:06:01 10:15:30"),
            ("Model", "ILCE-7M4"),
            ("LensModel", "FE 24-70mm F2.8 GM II"),
            ("ISO", "100"),
            ("FNumber", "2.8"),
            ("ExposureTime", "1/250"),
            ("FocalLength", "35.0 mm"),
            ("ImageWidth", "6000"),
            ("ImageHeight", "4000"),
        ]));

        assert_eq!(record.date.as_deref(), Some("20240601"));
        assert_eq!(record.camera.as_deref(), Some("ILCE-7M4"));
        assert_eq!(record.lens.as_deref(), Some("FE 24-70mm F2.8 GM II"));
        assert_eq!(record.extra(MetaField::Iso), Some("100"));
        assert_eq!(record.extra(MetaField::Aperture), Some("f2.8"));
        assert_eq!(record.extra(MetaField::ShutterSpeed), Some("1/250s"));
        assert_eq!(record.extra(MetaField::FocalLength), Some("35mm"));
        assert_eq!(record.extra(MetaField::Resolution), Some("6000x4000"));
    }

    #[test]
    fn exposure_bias_is_selectable_and_read_from_either_tag() {
        assert_eq!("exposure_bias".parse::<MetaField>(), Ok(MetaField::ExposureBias));
        assert!(MetaField::ALL.contains(&MetaField::ExposureBias));

        let record = MetadataRecord::from_raw(raw(&[("ExposureBiasValue", "+1/3")]));
        assert_eq!(record.extra(MetaField::ExposureBias), Some("+1/3"));
        let record = MetadataRecord::from_raw(raw(&[("ExposureCompensation", "-0.7 EV")]));
        assert_eq!(record.extra(MetaField::ExposureBias), Some("-0.7 EV"));
    }

    #[test]
    fn aperture_and_shutter_accept_display_forms() {
        let record = MetadataRecord::from_raw(raw(&[
            ("FNumber", "f/8"),
            ("ExposureTime", "2 s"),
        ]));
        assert_eq!(record.extra(MetaField::Aperture), Some("f8"));
        assert_eq!(record.extra(MetaField::ShutterSpeed), Some("2s"));
    }

    #[test]
    fn capture_timestamp_falls_through_to_container_fields() {
        let values = raw(&[
            ("DateTimeOriginal", "0000:00:00 00:00:00"),
            ("MediaCreateDate", "2023-12-31T23:59:58+01:00"),
        ]);
        let ts = capture_timestamp(&values).expect("container date must parse");
        assert_eq!(ts.format("%Y%m%d %H%M%S").to_string(), "20231231 235958");
    }

    #[test]
    fn lookup_skips_empty_and_unknown_values() {
        let values = raw(&[("LensModel", "  "), ("Lens", "Unknown"), ("LensID", "XF35")]);
        assert_eq!(lookup(&values, LENS_TAGS), Some("XF35"));
    }

    #[test]
    fn parse_timestamp_handles_date_only_and_fractions() {
        assert!(parse_timestamp("2024:06:01").is_some());
        assert!(parse_timestamp("2024:06:01 10:00:00.123").is_some());
        assert!(parse_timestamp("not a date").is_none());
    }

    #[test]
    fn unresolved_fields_stay_unresolved_without_record() {
        let fields = resolve_extra_fields(&[MetaField::Iso], None);
        assert_eq!(fields.get(&MetaField::Iso), Some(&FieldValue::Unresolved));

        let record = MetadataRecord::from_raw(raw(&[("ISO", "400")]));
        let fields = resolve_extra_fields(&[MetaField::Iso, MetaField::Aperture], Some(&record));
        assert_eq!(
            fields.get(&MetaField::Iso),
            Some(&FieldValue::Resolved("400".to_string()))
        );
        assert_eq!(fields.get(&MetaField::Aperture), Some(&FieldValue::Unresolved));
    }

    #[test]
    fn meta_field_parses_legacy_names() {
        assert_eq!("shutter".parse::<MetaField>(), Ok(MetaField::ShutterSpeed));
        assert!("exposure".parse::<MetaField>().is_err());
    }
}
