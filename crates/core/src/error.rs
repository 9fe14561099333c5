use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Per-file failures raised while planning or applying a rename.
#[derive(Debug, Error)]
pub enum RenameError {
    #[error("file is not accessible: {path}")]
    FileInaccessible {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("target path is too long ({len} characters): {path}")]
    PathTooLong { path: PathBuf, len: usize },
    #[error("metadata extraction failed for {path}: {reason}")]
    MetadataExtractionFailed { path: PathBuf, reason: String },
    #[error("failed to move {from} -> {to}")]
    RenameIo {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid target name: {name:?}")]
    InvalidTargetName { name: String },
    #[error("no free name left for {name} after {attempts} attempts")]
    CollisionExhausted { name: String, attempts: u32 },
}

impl RenameError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FileInaccessible { .. } => ErrorKind::FileInaccessible,
            Self::PathTooLong { .. } => ErrorKind::PathTooLong,
            Self::MetadataExtractionFailed { .. } => ErrorKind::MetadataExtractionFailed,
            Self::RenameIo { .. } => ErrorKind::RenameIoFailure,
            Self::InvalidTargetName { .. } => ErrorKind::InvalidTargetName,
            Self::CollisionExhausted { .. } => ErrorKind::CollisionExhausted,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    FileInaccessible,
    PathTooLong,
    MetadataExtractionFailed,
    RenameIoFailure,
    InvalidTargetName,
    CollisionExhausted,
    TimestampSync,
    Provenance,
}

/// A failure tied to one file, kept in the result instead of aborting the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileError {
    pub path: PathBuf,
    pub kind: ErrorKind,
    pub message: String,
}

impl FileError {
    pub fn new(path: impl Into<PathBuf>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn from_rename_error(path: &Path, err: &RenameError) -> Self {
        let mut message = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }
        Self::new(path, err.kind(), message)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|v| v.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Failures reported by a metadata provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("metadata provider is not available: {0}")]
    Unavailable(String),
    #[error("metadata provider timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("metadata provider failed: {0}")]
    Failed(String),
    #[error("metadata provider output could not be parsed")]
    Parse(#[from] serde_json::Error),
    #[error("metadata provider i/o error")]
    Io(#[from] io::Error),
    #[error("operation not supported by the {0} provider")]
    Unsupported(&'static str),
}

/// Rejections raised while validating a [`crate::RenameOptions`] value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown filename component: {0}")]
    UnknownComponent(String),
    #[error("unknown metadata field: {0}")]
    UnknownMetaField(String),
    #[error("component listed more than once: {0}")]
    DuplicateComponent(String),
    #[error("unknown date format: {0}")]
    UnknownDateFormat(String),
    #[error("separator contains characters that are not allowed in file names: {0:?}")]
    InvalidSeparator(String),
}
