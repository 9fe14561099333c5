mod cache;
mod chronology;
mod composer;
mod config;
mod counter;
mod error;
mod exif_reader;
mod executor;
mod grouper;
mod metadata;
mod path_resolver;
mod pipeline;
mod provenance;
mod provider;
mod sanitize;
mod timestamps;
mod undo;

#[cfg(test)]
mod testing;

pub use cache::{CacheStats, MetadataCache, RecordMap};
pub use chronology::{
    date_in_name, order_groups, resolve_group_date, resolve_group_metadata, sort_key,
    GroupMetadata, SortKey,
};
pub use composer::{build_filename, compose, format_counter, format_meta, NameValues};
pub use config::{
    app_paths, load_config, load_config_from, AppConfig, AppPaths, Component, CounterMode,
    DateFormat, RenameConfig, RenameOptions, TimestampOptions,
};
pub use counter::allocate;
pub use error::{ConfigError, ErrorKind, FileError, ProviderError, RenameError};
pub use exif_reader::ExifReaderProvider;
pub use executor::{CancelToken, PlannedRename, RenameNote, RenameOperation};
pub use grouper::{
    collect_media_files, group_files, is_media_file, FileGroup, GroupId, MediaFile, ScanStats,
};
pub use metadata::{FieldSignature, FieldValue, MetaField, MetadataRecord, RawMetadata};
pub use path_resolver::{resolve_target, ResolvedTarget};
pub use pipeline::{
    spawn_rename, RenameContext, RenameEngine, RenameEvent, RenameProgress, RenameResult,
    RenameTask, Stage,
};
pub use provenance::{ProvenanceLedger, ProvenanceRecord, PROVENANCE_TAG};
pub use provider::{ExifToolProvider, MetadataProvider, TagWrite};
pub use sanitize::{sanitize_component, sanitize_stem};
pub use timestamps::{restore_timestamps, sync_timestamps, OriginalTimes, SyncReport, TimestampBackup};
pub use undo::{
    save_undo_log, undo_from_provenance, undo_last, undo_mapping, RestoreResult, UndoLog,
    UndoOutcome,
};
