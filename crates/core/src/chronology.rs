//! Deterministic ordering of groups and the per-group facts derived from
//! their members' metadata.

use crate::cache::RecordMap;
use crate::grouper::{FileGroup, MediaFile};
use crate::metadata::MetadataRecord;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Total order over groups: capture time, then the last number in the
/// representative's name, then its full path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey {
    pub timestamp: NaiveDateTime,
    pub tiebreak: u64,
    pub path: PathBuf,
}

/// What every member of a group shares unless its own metadata says otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupMetadata {
    /// `YYYYMMDD`.
    pub date: Option<String>,
    pub camera: Option<String>,
    pub lens: Option<String>,
}

impl GroupMetadata {
    pub fn merge_missing_from(&mut self, record: &MetadataRecord) {
        if self.date.is_none() {
            self.date = record.date.clone();
        }
        if self.camera.is_none() {
            self.camera = record.camera.clone();
        }
        if self.lens.is_none() {
            self.lens = record.lens.clone();
        }
    }

    /// Values for one member: its own fields win over the group's.
    pub fn for_member(&self, record: Option<&MetadataRecord>) -> GroupMetadata {
        let Some(record) = record else {
            return self.clone();
        };
        GroupMetadata {
            date: record.date.clone().or_else(|| self.date.clone()),
            camera: record.camera.clone().or_else(|| self.camera.clone()),
            lens: record.lens.clone().or_else(|| self.lens.clone()),
        }
    }
}

pub fn sort_key(group: &FileGroup, record: Option<&MetadataRecord>) -> SortKey {
    let representative = group.representative();
    let timestamp = record
        .and_then(|r| r.captured_at)
        .or_else(|| modified_local(&representative.path))
        .unwrap_or_default();
    SortKey {
        timestamp,
        tiebreak: last_digit_run(&representative.stem),
        path: representative.path.clone(),
    }
}

/// Sorts groups chronologically using the representative's cached record.
pub fn order_groups(groups: Vec<FileGroup>, records: &RecordMap) -> Vec<FileGroup> {
    let mut keyed: Vec<(SortKey, FileGroup)> = groups
        .into_iter()
        .map(|group| {
            let record = records.get(&group.representative().path).map(AsRef::as_ref);
            (sort_key(&group, record), group)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.into_iter().map(|(_, group)| group).collect()
}

/// Metadata shared by a group, filled from its members in input order.
pub fn resolve_group_metadata(group: &FileGroup, records: &RecordMap) -> GroupMetadata {
    let mut merged = GroupMetadata {
        date: resolve_group_date(group, records),
        ..GroupMetadata::default()
    };
    for member in &group.members {
        if let Some(record) = records.get(&member.path) {
            merged.merge_missing_from(record);
        }
    }
    merged
}

/// Group date for counters and names: member metadata, a `20YYMMDD` run in a
/// member name, then the representative's modification time.
pub fn resolve_group_date(group: &FileGroup, records: &RecordMap) -> Option<String> {
    group
        .members
        .iter()
        .find_map(|m| records.get(&m.path).and_then(|r| r.date.clone()))
        .or_else(|| fallback_date(group))
}

fn fallback_date(group: &FileGroup) -> Option<String> {
    if let Some(date) = group.members.iter().find_map(|m| date_in_name(&m.stem)) {
        debug!(group = %group.stem, %date, "using date embedded in file name");
        return Some(date);
    }
    let MediaFile { path, .. } = group.representative();
    modified_local(path).map(|dt| dt.format("%Y%m%d").to_string())
}

/// Last run of ASCII digits in `name`; 0 when there is none.
pub fn last_digit_run(name: &str) -> u64 {
    let bytes = name.as_bytes();
    let Some(end) = bytes.iter().rposition(u8::is_ascii_digit) else {
        return 0;
    };
    let start = bytes[..end]
        .iter()
        .rposition(|b| !b.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    // Keep the least significant digits when the run would overflow.
    let run = &name[start..=end];
    let run = &run[run.len().saturating_sub(19)..];
    run.parse().unwrap_or(u64::MAX)
}

/// First `20YYMMDD` sequence in `name` that is a real calendar date.
pub fn date_in_name(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    if bytes.len() < 8 {
        return None;
    }
    (0..=bytes.len() - 8).find_map(|start| {
        let window = &bytes[start..start + 8];
        if !window.iter().all(u8::is_ascii_digit) || !window.starts_with(b"20") {
            return None;
        }
        let text = &name[start..start + 8];
        NaiveDate::parse_from_str(text, "%Y%m%d")
            .ok()
            .map(|_| text.to_string())
    })
}

fn modified_local(path: &Path) -> Option<NaiveDateTime> {
    let time = fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Local>::from(time).naive_local())
}
