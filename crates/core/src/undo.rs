use crate::error::{ErrorKind, FileError};
use crate::executor::RenameOperation;
use crate::provenance::ProvenanceLedger;
use crate::timestamps::{restore_timestamps, TimestampBackup};
use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreResult {
    /// Paths the files are back at.
    pub restored: Vec<PathBuf>,
    pub errors: Vec<FileError>,
    /// Inputs that carried no usable provenance record.
    #[serde(default)]
    pub skipped: Vec<PathBuf>,
}

/// Reverses a `new -> old` mapping, newest rename first. Never overwrites.
pub fn undo_mapping(mapping: &IndexMap<PathBuf, PathBuf>) -> RestoreResult {
    let mut result = RestoreResult::default();
    for (new, old) in mapping.iter().rev() {
        if new == old {
            continue;
        }
        match move_back(new, old) {
            Ok(()) => result.restored.push(old.clone()),
            Err(err) => result.errors.push(err),
        }
    }
    info!(restored = result.restored.len(), errors = result.errors.len(), "undo finished");
    result
}

/// Restores original names using only the records stored in the files.
/// Each record is cleared once its file is back under its old name.
pub fn undo_from_provenance(paths: &[PathBuf], ledger: &ProvenanceLedger) -> RestoreResult {
    let mut result = RestoreResult::default();
    let names = ledger.read_batch(paths);

    for path in paths {
        let Some(Some(original_name)) = names.get(path) else {
            debug!(path = %path.display(), "no provenance record");
            result.skipped.push(path.clone());
            continue;
        };
        let target = path
            .parent()
            .map(|dir| dir.join(original_name))
            .unwrap_or_else(|| PathBuf::from(original_name));

        if target != *path {
            if let Err(err) = move_back(path, &target) {
                result.errors.push(err);
                continue;
            }
        }
        if let Err(err) = ledger.clear(&target) {
            warn!(path = %target.display(), error = %err, "could not clear provenance record");
            result.errors.push(FileError::new(
                &target,
                ErrorKind::Provenance,
                err.to_string(),
            ));
        }
        result.restored.push(target);
    }
    info!(
        restored = result.restored.len(),
        skipped = result.skipped.len(),
        errors = result.errors.len(),
        "provenance undo finished"
    );
    result
}

fn move_back(current: &Path, original: &Path) -> Result<(), FileError> {
    if current.symlink_metadata().is_err() {
        return Err(FileError::new(
            current,
            ErrorKind::FileInaccessible,
            "renamed file no longer exists",
        ));
    }
    if original.symlink_metadata().is_ok() {
        return Err(FileError::new(
            current,
            ErrorKind::RenameIoFailure,
            format!("original path is occupied: {}", original.display()),
        ));
    }
    fs::rename(current, original).map_err(|err| {
        FileError::new(
            current,
            ErrorKind::RenameIoFailure,
            format!("failed to move back to {}: {}", original.display(), err),
        )
    })?;
    debug!(from = %current.display(), to = %original.display(), "restored");
    Ok(())
}

/// What an applied run leaves behind so it can be reverted later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoLog {
    pub created_at: NaiveDateTime,
    pub operations: Vec<RenameOperation>,
    #[serde(default)]
    pub timestamp_backup: TimestampBackup,
}

impl UndoLog {
    pub fn new(operations: Vec<RenameOperation>, timestamp_backup: TimestampBackup) -> Self {
        Self {
            created_at: Local::now().naive_local(),
            operations,
            timestamp_backup,
        }
    }

    pub fn mapping(&self) -> IndexMap<PathBuf, PathBuf> {
        self.operations
            .iter()
            .map(|op| (op.to.clone(), op.from.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UndoOutcome {
    pub renames: RestoreResult,
    pub timestamps_restored: usize,
    pub timestamp_errors: Vec<FileError>,
}

pub fn save_undo_log(path: &Path, log: &UndoLog) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(log).context("failed to serialize undo log")?;
    fs::write(path, body)
        .with_context(|| format!("failed to write undo log {}", path.display()))?;
    Ok(())
}

/// Replays the undo log at `path`, then deletes it. When a ledger is given
/// the provenance record of every restored file is cleared too.
pub fn undo_last(path: &Path, ledger: Option<&ProvenanceLedger>) -> Result<UndoOutcome> {
    if !path.exists() {
        anyhow::bail!("nothing to undo: {} does not exist", path.display());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read undo log {}", path.display()))?;
    let log = serde_json::from_str::<UndoLog>(&raw)
        .with_context(|| format!("undo log is corrupted: {}", path.display()))?;

    let renames = undo_mapping(&log.mapping());
    if let Some(ledger) = ledger {
        for restored in &renames.restored {
            if let Err(err) = ledger.clear(restored) {
                debug!(path = %restored.display(), error = %err, "provenance left in place");
            }
        }
    }
    let (timestamps, timestamp_errors) = restore_timestamps(&log.timestamp_backup);

    fs::remove_file(path)
        .with_context(|| format!("failed to delete undo log {}", path.display()))?;

    Ok(UndoOutcome {
        renames,
        timestamps_restored: timestamps.len(),
        timestamp_errors,
    })
}
