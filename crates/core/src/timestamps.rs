use crate::cache::{MetadataCache, RecordMap};
use crate::config::TimestampOptions;
use crate::error::{ErrorKind, FileError};
use crate::metadata::FieldSignature;
use chrono::{Local, NaiveDateTime, TimeZone};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Filesystem times of one file as they were before synchronisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalTimes {
    pub accessed: Option<SystemTime>,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
}

pub type TimestampBackup = IndexMap<PathBuf, OriginalTimes>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub successes: Vec<PathBuf>,
    pub errors: Vec<FileError>,
    pub backup: TimestampBackup,
}

/// Sets the enabled filesystem times of each file to its capture time.
///
/// The target time comes from `options.custom`, then `prefetched`, then a
/// fresh cache lookup. A file's original times are backed up before it is
/// touched and stay in the backup even if the update fails.
pub fn sync_timestamps(
    files: &[PathBuf],
    options: &TimestampOptions,
    prefetched: &RecordMap,
    cache: &MetadataCache,
) -> SyncReport {
    let mut report = SyncReport::default();
    if !options.any_field() {
        return report;
    }

    for path in files {
        let original = match read_times(path) {
            Ok(times) => times,
            Err(err) => {
                report.errors.push(FileError::new(
                    path,
                    ErrorKind::FileInaccessible,
                    err.to_string(),
                ));
                continue;
            }
        };
        report.backup.insert(path.clone(), original);

        let target = options
            .custom
            .or_else(|| prefetched.get(path).and_then(|r| r.captured_at))
            .or_else(|| {
                cache
                    .get(path, FieldSignature::DATE_ONLY)
                    .and_then(|r| r.captured_at)
            });
        let Some(target) = target else {
            report.errors.push(FileError::new(
                path,
                ErrorKind::MetadataExtractionFailed,
                "no capture timestamp available",
            ));
            continue;
        };

        match apply_target(path, target, options) {
            Ok(()) => {
                debug!(path = %path.display(), %target, "timestamps synchronised");
                report.successes.push(path.clone());
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "timestamp sync failed");
                report
                    .errors
                    .push(FileError::new(path, ErrorKind::TimestampSync, err.to_string()));
            }
        }
    }
    report
}

/// Puts back the times captured by [`sync_timestamps`], file by file.
pub fn restore_timestamps(backup: &TimestampBackup) -> (Vec<PathBuf>, Vec<FileError>) {
    let mut successes = Vec::with_capacity(backup.len());
    let mut errors = Vec::new();

    for (path, original) in backup {
        let mut times = FileTimes::new();
        if let Some(accessed) = original.accessed {
            times = times.set_accessed(accessed);
        }
        if let Some(modified) = original.modified {
            times = times.set_modified(modified);
        }
        if let Some(created) = original.created {
            times = with_created(times, created);
        }
        match write_times(path, times) {
            Ok(()) => successes.push(path.clone()),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "timestamp restore failed");
                errors.push(FileError::new(path, ErrorKind::TimestampSync, err.to_string()));
            }
        }
    }
    (successes, errors)
}

fn read_times(path: &Path) -> io::Result<OriginalTimes> {
    let meta = fs::metadata(path)?;
    Ok(OriginalTimes {
        accessed: meta.accessed().ok(),
        modified: meta.modified().ok(),
        created: meta.created().ok(),
    })
}

fn apply_target(path: &Path, target: NaiveDateTime, options: &TimestampOptions) -> io::Result<()> {
    let local = Local
        .from_local_datetime(&target)
        .earliest()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} does not exist in the local time zone", target),
            )
        })?;
    let when = SystemTime::from(local);

    if options.creation && !CREATION_TIME_SUPPORTED && !options.modification && !options.access {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "setting the creation time is not supported on this platform",
        ));
    }

    let mut times = FileTimes::new();
    if options.access {
        times = times.set_accessed(when);
    }
    if options.modification {
        times = times.set_modified(when);
    }
    if options.creation {
        times = with_created(times, when);
    }
    write_times(path, times)
}

fn write_times(path: &Path, times: FileTimes) -> io::Result<()> {
    let file = File::options().write(true).open(path)?;
    file.set_times(times)
}

#[cfg(any(windows, target_os = "macos"))]
const CREATION_TIME_SUPPORTED: bool = true;
#[cfg(not(any(windows, target_os = "macos")))]
const CREATION_TIME_SUPPORTED: bool = false;

#[cfg(windows)]
fn with_created(times: FileTimes, created: SystemTime) -> FileTimes {
    use std::os::windows::fs::FileTimesExt;
    times.set_created(created)
}

#[cfg(target_os = "macos")]
fn with_created(times: FileTimes, created: SystemTime) -> FileTimes {
    use std::os::macos::fs::FileTimesExt;
    times.set_created(created)
}

#[cfg(not(any(windows, target_os = "macos")))]
fn with_created(times: FileTimes, _created: SystemTime) -> FileTimes {
    times
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MetadataRecord, RawMetadata};
    use crate::testing::{touch, InMemoryProvider};
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn local(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(h, 0, 0))
            .expect("valid datetime")
    }

    fn as_system(dt: NaiveDateTime) -> SystemTime {
        SystemTime::from(Local.from_local_datetime(&dt).earliest().expect("local time"))
    }

    fn modification_only() -> TimestampOptions {
        TimestampOptions {
            modification: true,
            ..TimestampOptions::default()
        }
    }

    #[test]
    fn custom_time_wins_and_backup_restores() {
        let temp = tempdir().expect("tempdir");
        let path = touch(temp.path(), "IMG_0001.JPG");
        let before = fs::metadata(&path).and_then(|m| m.modified()).expect("mtime");
        let cache = MetadataCache::new(Arc::new(InMemoryProvider::new()));
        let options = TimestampOptions {
            custom: Some(local(2020, 1, 2, 12)),
            ..modification_only()
        };

        let report = sync_timestamps(&[path.clone()], &options, &HashMap::new(), &cache);
        assert_eq!(report.successes, vec![path.clone()]);
        let after = fs::metadata(&path).and_then(|m| m.modified()).expect("mtime");
        assert_eq!(after, as_system(local(2020, 1, 2, 12)));

        let (restored, errors) = restore_timestamps(&report.backup);
        assert_eq!(restored.len(), 1);
        assert!(errors.is_empty());
        let back = fs::metadata(&path).and_then(|m| m.modified()).expect("mtime");
        assert_eq!(back, before);
    }

    #[test]
    fn prefetched_record_is_used_before_provider() {
        let temp = tempdir().expect("tempdir");
        let path = touch(temp.path(), "IMG_0001.JPG");
        let provider = Arc::new(InMemoryProvider::new());
        let cache = MetadataCache::new(provider.clone());
        let mut raw = RawMetadata::new();
        raw.insert("DateTimeOriginal".into(), "2021:03:04 05:00:00".into());
        let mut prefetched = RecordMap::new();
        prefetched.insert(path.clone(), Arc::new(MetadataRecord::from_raw(raw)));

        let report = sync_timestamps(&[path.clone()], &modification_only(), &prefetched, &cache);
        assert!(report.errors.is_empty());
        assert_eq!(provider.calls(), 0);
        let after = fs::metadata(&path).and_then(|m| m.modified()).expect("mtime");
        assert_eq!(after, as_system(local(2021, 3, 4, 5)));
    }

    #[test]
    fn falls_back_to_cache_lookup_and_reports_missing_dates() {
        let temp = tempdir().expect("tempdir");
        let dated = touch(temp.path(), "IMG_0001.JPG");
        let undated = touch(temp.path(), "IMG_0002.JPG");
        let provider = Arc::new(InMemoryProvider::new());
        provider.set(
            &dated,
            vec![("DateTimeOriginal", "2022:07:08 09:00:00".to_string())],
        );
        let cache = MetadataCache::new(provider.clone());

        let report = sync_timestamps(
            &[dated.clone(), undated.clone()],
            &modification_only(),
            &HashMap::new(),
            &cache,
        );
        assert_eq!(report.successes, vec![dated]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, ErrorKind::MetadataExtractionFailed);
        assert_eq!(report.backup.len(), 2);
    }

    #[test]
    fn untouched_fields_keep_their_values() {
        let temp = tempdir().expect("tempdir");
        let path = touch(temp.path(), "IMG_0001.JPG");
        let before = fs::metadata(&path).and_then(|m| m.modified()).expect("mtime");
        let cache = MetadataCache::new(Arc::new(InMemoryProvider::new()));
        let options = TimestampOptions {
            access: true,
            custom: Some(local(2019, 5, 6, 7)),
            ..TimestampOptions::default()
        };

        let report = sync_timestamps(&[path.clone()], &options, &HashMap::new(), &cache);
        assert!(report.errors.is_empty());
        let meta = fs::metadata(&path).expect("metadata");
        assert_eq!(meta.modified().expect("mtime"), before);
        assert_eq!(meta.accessed().expect("atime"), as_system(local(2019, 5, 6, 7)));
    }

    #[test]
    fn missing_file_is_reported_without_backup() {
        let temp = tempdir().expect("tempdir");
        let cache = MetadataCache::new(Arc::new(InMemoryProvider::new()));
        let report = sync_timestamps(
            &[temp.path().join("gone.JPG")],
            &modification_only(),
            &HashMap::new(),
            &cache,
        );
        assert!(report.backup.is_empty());
        assert_eq!(report.errors[0].kind, ErrorKind::FileInaccessible);
    }
}
