//! The full rename run: metadata pre-fetch, ordering, counters, moves and
//! provenance, plus a worker-thread front end with progress events.

use crate::cache::{MetadataCache, RecordMap};
use crate::chronology::{order_groups, resolve_group_metadata, GroupMetadata};
use crate::config::RenameConfig;
use crate::counter::allocate;
use crate::error::FileError;
use crate::executor::{
    execute, CancelToken, ExecutionContext, ExecutionMode, PlannedRename, RenameNote,
    RenameOperation,
};
use crate::grouper::{group_files, is_media_file, FileGroup, GroupId};
use crate::provenance::ProvenanceLedger;
use crate::provider::MetadataProvider;
use crate::timestamps::{sync_timestamps, TimestampBackup};
use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::env;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ReadingMetadata,
    SyncingTimestamps,
    Renaming,
    WritingProvenance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameProgress {
    pub stage: Stage,
    pub groups_completed: usize,
    pub groups_total: usize,
    pub current_file: Option<PathBuf>,
}

#[derive(Debug)]
pub enum RenameEvent {
    Progress(RenameProgress),
    /// Sent exactly once, last.
    Complete(Result<RenameResult>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenameResult {
    pub renamed: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
    pub errors: Vec<FileError>,
    pub notes: Vec<RenameNote>,
    pub timestamp_backup: TimestampBackup,
    /// new path -> old path.
    pub rename_mapping: IndexMap<PathBuf, PathBuf>,
    pub operations: Vec<RenameOperation>,
    pub provenance_errors: Vec<FileError>,
    pub skipped_non_media: usize,
    pub cancelled: bool,
}

pub struct RenameContext<'a> {
    pub cancel: &'a CancelToken,
    pub progress: Option<&'a dyn Fn(RenameProgress)>,
}

impl<'a> RenameContext<'a> {
    pub fn new(cancel: &'a CancelToken) -> Self {
        Self {
            cancel,
            progress: None,
        }
    }

    fn report(&self, progress: RenameProgress) {
        if let Some(callback) = self.progress {
            callback(progress);
        }
    }
}

/// Everything computed before the first file is touched.
struct Prepared {
    groups: Vec<FileGroup>,
    records: RecordMap,
    counters: HashMap<GroupId, u32>,
    group_meta: HashMap<GroupId, GroupMetadata>,
    skipped_non_media: usize,
}

/// Owns the metadata cache and provenance ledger shared by every run.
pub struct RenameEngine {
    cache: MetadataCache,
    ledger: ProvenanceLedger,
}

impl RenameEngine {
    pub fn new(provider: Arc<dyn MetadataProvider>) -> Self {
        Self {
            cache: MetadataCache::new(Arc::clone(&provider)),
            ledger: ProvenanceLedger::new(provider),
        }
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn ledger(&self) -> &ProvenanceLedger {
        &self.ledger
    }

    pub fn rename(
        &self,
        files: &[PathBuf],
        config: &RenameConfig,
        ctx: &RenameContext<'_>,
    ) -> Result<RenameResult> {
        let files = absolutize(files)?;
        let mut result = RenameResult::default();

        ctx.report(RenameProgress {
            stage: Stage::ReadingMetadata,
            groups_completed: 0,
            groups_total: 0,
            current_file: None,
        });
        let prepared = self.prepare(&files, config);
        result.skipped_non_media = prepared.skipped_non_media;

        if let Some(options) = config.timestamps() {
            ctx.report(RenameProgress {
                stage: Stage::SyncingTimestamps,
                groups_completed: 0,
                groups_total: prepared.groups.len(),
                current_file: None,
            });
            let media: Vec<PathBuf> = prepared
                .groups
                .iter()
                .flat_map(|g| g.paths().map(PathBuf::from))
                .collect();
            let sync = sync_timestamps(&media, options, &prepared.records, &self.cache);
            info!(
                synced = sync.successes.len(),
                failed = sync.errors.len(),
                "timestamps synchronised"
            );
            result.timestamp_backup = sync.backup;
            result.errors.extend(sync.errors);
            if options.leave_names {
                return Ok(result);
            }
        }

        let total = prepared.groups.len();
        let exec_ctx = ExecutionContext {
            config,
            records: &prepared.records,
            cancel: ctx.cancel,
            mode: ExecutionMode::Apply,
        };
        let report = execute(
            &prepared.groups,
            &prepared.counters,
            &prepared.group_meta,
            &exec_ctx,
            &mut |index, group| {
                ctx.report(RenameProgress {
                    stage: Stage::Renaming,
                    groups_completed: index,
                    groups_total: total,
                    current_file: Some(group.representative().path.clone()),
                })
            },
        );

        if config.write_provenance() {
            let pairs: Vec<(PathBuf, String)> = report
                .operations
                .iter()
                .filter(|op| !op.unchanged)
                .filter_map(|op| {
                    op.from
                        .file_name()
                        .map(|name| (op.to.clone(), name.to_string_lossy().to_string()))
                })
                .collect();
            if !pairs.is_empty() {
                if self.ledger.supports_writing() {
                    ctx.report(RenameProgress {
                        stage: Stage::WritingProvenance,
                        groups_completed: total,
                        groups_total: total,
                        current_file: None,
                    });
                    let (_, errors) = self.ledger.write_batch(&pairs);
                    result.provenance_errors = errors;
                } else {
                    debug!(
                        provider = self.cache.provider().name(),
                        "provider is read-only, provenance not written"
                    );
                }
            }
        }

        result.renamed = report.renamed;
        result.unchanged = report.unchanged;
        result.errors.extend(report.errors);
        result.notes = report.notes;
        result.rename_mapping = report.mapping;
        result.operations = report.operations;
        result.cancelled = report.cancelled;
        Ok(result)
    }

    /// Computes the renames a run would perform without touching any file.
    pub fn preview(&self, files: &[PathBuf], config: &RenameConfig) -> Result<Vec<PlannedRename>> {
        let files = absolutize(files)?;
        let prepared = self.prepare(&files, config);
        let cancel = CancelToken::new();
        let exec_ctx = ExecutionContext {
            config,
            records: &prepared.records,
            cancel: &cancel,
            mode: ExecutionMode::Plan,
        };
        let report = execute(
            &prepared.groups,
            &prepared.counters,
            &prepared.group_meta,
            &exec_ctx,
            &mut |_, _| {},
        );
        Ok(report.operations)
    }

    fn prepare(&self, files: &[PathBuf], config: &RenameConfig) -> Prepared {
        // Failure markers only hold for the run that recorded them.
        self.cache.clear();
        let skipped_non_media = files.iter().filter(|p| !is_media_file(p)).count();
        let groups = group_files(files);
        let media: Vec<PathBuf> = groups
            .iter()
            .flat_map(|g| g.paths().map(PathBuf::from))
            .collect();
        let records = self.cache.batch_get(&media, config.field_signature());
        debug!(
            groups = groups.len(),
            files = media.len(),
            with_metadata = records.len(),
            "metadata pre-fetched"
        );

        let groups = order_groups(groups, &records);
        let group_meta: HashMap<GroupId, GroupMetadata> = groups
            .iter()
            .map(|g| (g.id, resolve_group_metadata(g, &records)))
            .collect();
        let dates: HashMap<GroupId, Option<String>> = group_meta
            .iter()
            .map(|(id, meta)| (*id, meta.date.clone()))
            .collect();
        let counters = allocate(&groups, &dates, config.counter_mode());

        Prepared {
            groups,
            records,
            counters,
            group_meta,
            skipped_non_media,
        }
    }
}

fn absolutize(files: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if files.iter().all(|p| p.is_absolute()) {
        return Ok(files.to_vec());
    }
    let cwd = env::current_dir().context("failed to resolve the current directory")?;
    Ok(files
        .iter()
        .map(|p| if p.is_absolute() { p.clone() } else { cwd.join(p) })
        .collect())
}

/// A rename running on its own thread.
pub struct RenameTask {
    pub events: Receiver<RenameEvent>,
    pub cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl RenameTask {
    /// Blocks until the run completes, discarding progress events.
    pub fn wait(self) -> Result<RenameResult> {
        let mut outcome = None;
        for event in self.events.iter() {
            if let RenameEvent::Complete(result) = event {
                outcome = Some(result);
                break;
            }
        }
        let _ = self.handle.join();
        outcome.unwrap_or_else(|| Err(anyhow!("rename worker exited without a result")))
    }
}

/// Runs [`RenameEngine::rename`] off the calling thread. A panic in the
/// worker is delivered as the `Complete` error instead of unwinding further.
pub fn spawn_rename(
    engine: Arc<RenameEngine>,
    files: Vec<PathBuf>,
    config: RenameConfig,
) -> RenameTask {
    let (tx, rx) = mpsc::channel();
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();

    let handle = thread::spawn(move || {
        let progress_tx = tx.clone();
        let on_progress = move |progress: RenameProgress| {
            let _ = progress_tx.send(RenameEvent::Progress(progress));
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let ctx = RenameContext {
                cancel: &worker_cancel,
                progress: Some(&on_progress),
            };
            engine.rename(&files, &config, &ctx)
        }))
        .unwrap_or_else(|payload| {
            Err(anyhow!(
                "rename worker panicked: {}",
                panic_message(payload.as_ref())
            ))
        });
        let _ = tx.send(RenameEvent::Complete(outcome));
    });

    RenameTask {
        events: rx,
        cancel,
        handle,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
