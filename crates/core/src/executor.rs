use crate::cache::RecordMap;
use crate::chronology::GroupMetadata;
use crate::composer::{build_filename, compose, NameValues};
use crate::config::RenameConfig;
use crate::error::{FileError, RenameError};
use crate::grouper::{FileGroup, GroupId, MediaFile};
use crate::metadata::{resolve_extra_fields, FieldValue};
use crate::path_resolver::resolve_target;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cooperative cancellation flag, checked between groups.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameOperation {
    pub from: PathBuf,
    pub to: PathBuf,
    pub group: GroupId,
    pub counter: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collision_suffix: Option<u32>,
    #[serde(default)]
    pub unchanged: bool,
}

/// A rename computed without touching the filesystem.
pub type PlannedRename = RenameOperation;

/// Informational outcomes that are not failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenameNote {
    CollisionResolved {
        original: PathBuf,
        requested: String,
        actual: PathBuf,
        suffix: u32,
    },
    NameShortened {
        original: PathBuf,
        actual: PathBuf,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub renamed: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
    pub errors: Vec<FileError>,
    pub notes: Vec<RenameNote>,
    /// new path -> old path, identity renames included.
    pub mapping: IndexMap<PathBuf, PathBuf>,
    pub operations: Vec<RenameOperation>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Apply,
    Plan,
}

pub struct ExecutionContext<'a> {
    pub config: &'a RenameConfig,
    pub records: &'a RecordMap,
    pub cancel: &'a CancelToken,
    pub mode: ExecutionMode,
}

/// Renames (or plans) every group in order. A failing file is recorded and
/// skipped; its siblings and later groups still run.
pub fn execute(
    groups: &[FileGroup],
    counters: &HashMap<GroupId, u32>,
    group_meta: &HashMap<GroupId, GroupMetadata>,
    ctx: &ExecutionContext<'_>,
    on_group: &mut dyn FnMut(usize, &FileGroup),
) -> ExecutionReport {
    let mut report = ExecutionReport::default();
    let mut reserved: HashSet<PathBuf> = HashSet::new();

    for (index, group) in groups.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            info!(done = index, total = groups.len(), "rename cancelled");
            report.cancelled = true;
            break;
        }
        on_group(index, group);

        let counter = counters.get(&group.id).copied().unwrap_or(1);
        let shared = group_meta.get(&group.id).cloned().unwrap_or_default();
        for member in &group.members {
            let values = member_values(member, group, &shared, ctx);
            let parts = compose(counter, &values, ctx.config);
            let name = build_filename(&parts, ctx.config.separator(), &member.dotted_extension());
            match process_member(member, &name, counter, group.id, ctx, &mut reserved) {
                Ok(operation) => record_success(&mut report, member, &name, operation),
                Err(err) => {
                    warn!(path = %member.path.display(), error = %err, "rename failed");
                    report
                        .errors
                        .push(FileError::from_rename_error(&member.path, &err));
                }
            }
        }
    }

    info!(
        renamed = report.renamed.len(),
        unchanged = report.unchanged.len(),
        errors = report.errors.len(),
        notes = report.notes.len(),
        "rename pass finished"
    );
    report
}

/// A member's own metadata wins; gaps are filled from its group.
fn member_values(
    member: &MediaFile,
    group: &FileGroup,
    shared: &GroupMetadata,
    ctx: &ExecutionContext<'_>,
) -> NameValues {
    let own = ctx.records.get(&member.path).map(AsRef::as_ref);
    let meta = shared.for_member(own);

    let mut extras = resolve_extra_fields(ctx.config.meta_fields(), own);
    for (field, value) in extras.iter_mut() {
        if *value != FieldValue::Unresolved {
            continue;
        }
        if let Some(found) = group
            .members
            .iter()
            .filter_map(|m| ctx.records.get(&m.path))
            .find_map(|r| r.extra(*field))
        {
            *value = FieldValue::Resolved(found.to_string());
        }
    }
    NameValues::new(meta, extras)
}

fn process_member(
    member: &MediaFile,
    name: &str,
    counter: u32,
    group: GroupId,
    ctx: &ExecutionContext<'_>,
    reserved: &mut HashSet<PathBuf>,
) -> Result<RenameOperation, RenameError> {
    fs::symlink_metadata(&member.path).map_err(|source| RenameError::FileInaccessible {
        path: member.path.clone(),
        source,
    })?;

    // Resolved right before the move so earlier moves in this run are seen.
    let target = resolve_target(&member.path, name, reserved)?;
    let operation = RenameOperation {
        from: member.path.clone(),
        to: target.path.clone(),
        group,
        counter,
        collision_suffix: target.collision_suffix,
        unchanged: target.unchanged,
    };

    if target.unchanged {
        debug!(path = %member.path.display(), "already correctly named");
        return Ok(operation);
    }

    if ctx.mode == ExecutionMode::Apply {
        fs::rename(&member.path, &target.path).map_err(|source| RenameError::RenameIo {
            from: member.path.clone(),
            to: target.path.clone(),
            source,
        })?;
        debug!(from = %member.path.display(), to = %target.path.display(), "renamed");
    }
    reserved.insert(target.path.clone());
    if target.shortened {
        debug!(path = %target.path.display(), "target name was shortened");
    }
    Ok(operation)
}

fn record_success(
    report: &mut ExecutionReport,
    member: &MediaFile,
    requested: &str,
    operation: RenameOperation,
) {
    if operation.unchanged {
        report.unchanged.push(operation.from.clone());
    } else {
        report.renamed.push(operation.to.clone());
        if let Some(suffix) = operation.collision_suffix {
            warn!(
                from = %member.path.display(),
                to = %operation.to.display(),
                "name collision resolved with suffix"
            );
            report.notes.push(RenameNote::CollisionResolved {
                original: member.path.clone(),
                requested: requested.to_string(),
                actual: operation.to.clone(),
                suffix,
            });
        } else if operation
            .to
            .file_name()
            .map(|n| n.to_string_lossy() != requested)
            .unwrap_or(false)
        {
            report.notes.push(RenameNote::NameShortened {
                original: member.path.clone(),
                actual: operation.to.clone(),
            });
        }
    }
    report
        .mapping
        .insert(operation.to.clone(), operation.from.clone());
    report.operations.push(operation);
}
