use crate::chronology::GroupMetadata;
use crate::config::{Component, RenameConfig};
use crate::metadata::{FieldValue, MetaField};
use crate::sanitize::{sanitize_component, sanitize_stem};
use std::collections::BTreeMap;

/// Everything a single file's name can be built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameValues {
    /// `YYYYMMDD`.
    pub date: Option<String>,
    pub camera: Option<String>,
    pub lens: Option<String>,
    pub extras: BTreeMap<MetaField, FieldValue>,
}

impl NameValues {
    pub fn new(meta: GroupMetadata, extras: BTreeMap<MetaField, FieldValue>) -> Self {
        Self {
            date: meta.date,
            camera: meta.camera,
            lens: meta.lens,
            extras,
        }
    }
}

/// Ordered, individually sanitized filename parts. The counter is always
/// among them.
pub fn compose(counter: u32, values: &NameValues, config: &RenameConfig) -> Vec<String> {
    let mut parts = Vec::with_capacity(config.order().len() + 1);
    let mut push = |value: Option<String>| {
        if let Some(value) = value {
            let clean = sanitize_component(&value);
            if !clean.is_empty() {
                parts.push(clean);
            }
        }
    };

    for component in config.order() {
        push(render_component(*component, counter, values, config));
    }

    let has_meta_slot = config
        .order()
        .iter()
        .any(|c| matches!(c, Component::Meta(_)));
    if !has_meta_slot {
        for field in config.meta_fields() {
            push(render_meta(*field, values, config));
        }
    }

    if !config.order().contains(&Component::Counter) {
        push(Some(format_counter(counter)));
    }
    parts
}

/// Joins `parts` and sanitizes the result. `extension` includes its dot.
pub fn build_filename(parts: &[String], separator: &str, extension: &str) -> String {
    let stem = sanitize_stem(&parts.join(separator));
    format!("{}{}", stem, extension)
}

pub fn format_counter(counter: u32) -> String {
    format!("{:03}", counter)
}

fn render_component(
    component: Component,
    counter: u32,
    values: &NameValues,
    config: &RenameConfig,
) -> Option<String> {
    match component {
        Component::Date => {
            if !config.use_date() {
                return None;
            }
            values
                .date
                .as_deref()
                .and_then(|d| config.date_format().format_compact(d))
        }
        Component::Prefix => config.prefix().map(str::to_string),
        Component::Additional => config.additional().map(str::to_string),
        Component::Camera if config.use_camera() => values.camera.as_deref().map(dashed),
        Component::Lens if config.use_lens() => values.lens.as_deref().map(dashed),
        Component::Camera | Component::Lens => None,
        Component::Counter => Some(format_counter(counter)),
        Component::Meta(field) => render_meta(field, values, config),
    }
}

fn render_meta(field: MetaField, values: &NameValues, config: &RenameConfig) -> Option<String> {
    if !config.meta_fields().contains(&field) {
        return None;
    }
    let value = values.extras.get(&field)?.as_resolved()?.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("unknown") {
        return None;
    }
    Some(format_meta(field, value))
}

pub fn format_meta(field: MetaField, value: &str) -> String {
    match field {
        MetaField::Iso => {
            if value.chars().all(|c| c.is_ascii_digit()) {
                format!("ISO{}", value)
            } else {
                value.replace(' ', "")
            }
        }
        MetaField::Aperture => {
            if let Some(rest) = value.strip_prefix("f/") {
                format!("f{}", rest)
            } else if value.starts_with('f') {
                value.to_string()
            } else {
                format!("f{}", value)
            }
        }
        MetaField::ShutterSpeed => value.replace(['/', ' '], ""),
        MetaField::FocalLength => leading_millimetres(value)
            .unwrap_or_else(|| value.replace(' ', "-")),
        MetaField::Resolution => value.replace(' ', "-"),
        MetaField::ExposureBias => value.replace([' ', '/', ':'], "-"),
    }
}

fn dashed(value: &str) -> String {
    value.trim().replace([' ', '/'], "-")
}

/// `<n>mm` from values like `35.0 mm` or `24mm (35mm equivalent: 36mm)`.
fn leading_millimetres(value: &str) -> Option<String> {
    let compact = value.replace(' ', "");
    let pos = compact.find("mm")?;
    let head = &compact[..pos];
    let digits_start = head
        .char_indices()
        .rev()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    let number = &head[digits_start..];
    let whole = number.split('.').next().unwrap_or(number);
    if whole.is_empty() {
        None
    } else {
        Some(format!("{}mm", whole))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenameOptions;

    fn config(options: RenameOptions) -> RenameConfig {
        RenameConfig::new(options).expect("valid options")
    }

    fn values() -> NameValues {
        let mut extras = BTreeMap::new();
        extras.insert(MetaField::Iso, FieldValue::Resolved("400".into()));
        extras.insert(MetaField::Aperture, FieldValue::Resolved("f/2.8".into()));
        extras.insert(MetaField::ShutterSpeed, FieldValue::Resolved("1/250s".into()));
        extras.insert(MetaField::FocalLength, FieldValue::Unresolved);
        NameValues {
            date: Some("20240601".into()),
            camera: Some("EOS R5".into()),
            lens: Some("RF24-70mm F2.8 L/IS".into()),
            extras,
        }
    }

    #[test]
    fn default_order_skips_absent_parts() {
        let cfg = config(RenameOptions {
            prefix: "Trip".into(),
            ..RenameOptions::default()
        });
        let parts = compose(7, &values(), &cfg);
        assert_eq!(parts, vec!["2024-06-01", "Trip", "007"]);
        assert_eq!(
            build_filename(&parts, cfg.separator(), ".JPG"),
            "2024-06-01-Trip-007.JPG"
        );
    }

    #[test]
    fn camera_and_lens_use_dashes() {
        let cfg = config(RenameOptions {
            use_camera: true,
            use_lens: true,
            separator: "_".into(),
            ..RenameOptions::default()
        });
        let parts = compose(1, &values(), &cfg);
        assert_eq!(
            parts,
            vec!["2024-06-01", "EOS-R5", "RF24-70mm-F2.8-L-IS", "001"]
        );
    }

    #[test]
    fn counter_is_appended_when_missing_from_order() {
        let cfg = config(RenameOptions {
            order: vec!["Prefix".into(), "Date".into()],
            prefix: "A".into(),
            date_format: "YYYYMMDD".into(),
            ..RenameOptions::default()
        });
        assert_eq!(compose(12, &values(), &cfg), vec!["A", "20240601", "012"]);
    }

    #[test]
    fn placed_meta_tokens_render_and_unresolved_are_skipped() {
        let cfg = config(RenameOptions {
            order: vec![
                "Meta_iso".into(),
                "Counter".into(),
                "Meta_focal_length".into(),
                "Meta_aperture".into(),
            ],
            meta_fields: vec!["iso".into(), "focal_length".into(), "aperture".into()],
            ..RenameOptions::default()
        });
        assert_eq!(compose(3, &values(), &cfg), vec!["ISO400", "003", "f2.8"]);
    }

    #[test]
    fn unplaced_meta_fields_are_appended_before_trailing_counter() {
        let cfg = config(RenameOptions {
            order: vec!["Date".into()],
            meta_fields: vec!["shutter_speed".into(), "iso".into()],
            ..RenameOptions::default()
        });
        assert_eq!(
            compose(2, &values(), &cfg),
            vec!["2024-06-01", "1250s", "ISO400", "002"]
        );
    }

    #[test]
    fn disabled_date_is_skipped() {
        let cfg = config(RenameOptions {
            use_date: false,
            ..RenameOptions::default()
        });
        assert_eq!(compose(1, &values(), &cfg), vec!["001"]);
    }

    #[test]
    fn focal_length_keeps_leading_millimetres() {
        assert_eq!(format_meta(MetaField::FocalLength, "35.0 mm"), "35mm");
        assert_eq!(
            format_meta(MetaField::FocalLength, "24mm (35mm equivalent: 36mm)"),
            "24mm"
        );
        assert_eq!(format_meta(MetaField::Aperture, "8"), "f8");
    }

    #[test]
    fn focal_length_with_non_ascii_prefix() {
        assert_eq!(format_meta(MetaField::FocalLength, "µ5mm"), "5mm");
        assert_eq!(format_meta(MetaField::FocalLength, "焦点距離 50mm"), "50mm");
    }

    #[test]
    fn exposure_bias_replaces_separators() {
        assert_eq!(format_meta(MetaField::ExposureBias, "+1/3"), "+1-3");
        assert_eq!(format_meta(MetaField::ExposureBias, "-0.7 EV"), "-0.7-EV");

        let cfg = config(RenameOptions {
            meta_fields: vec!["exposure_bias".into()],
            ..RenameOptions::default()
        });
        let mut vals = values();
        vals.extras
            .insert(MetaField::ExposureBias, FieldValue::Resolved("+1/3".into()));
        assert_eq!(compose(2, &vals, &cfg), vec!["2024-06-01", "+1-3", "002"]);
    }

    #[test]
    fn empty_result_uses_fallback_name() {
        assert_eq!(
            build_filename(&["..".to_string()], "-", ".jpg"),
            "unnamed_file.jpg"
        );
    }
}
