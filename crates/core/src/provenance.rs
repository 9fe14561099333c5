//! Original file names stored inside each renamed file, so undo works
//! without any history kept by this process.

use crate::error::{ErrorKind, FileError, ProviderError};
use crate::metadata::lookup;
use crate::provider::{MetadataProvider, TagWrite};
use chrono::{Local, NaiveDateTime};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

pub const PROVENANCE_TAG: &str = "UserComment";
pub const PROVENANCE_CHUNK_SIZE: usize = 50;

const NAME_LABEL: &str = "OriginalName: ";
const DATE_SEPARATOR: &str = " | RenameDate: ";
const DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceRecord {
    pub original_name: String,
    pub renamed_at: Option<NaiveDateTime>,
}

impl ProvenanceRecord {
    pub fn new(original_name: impl Into<String>) -> Self {
        Self {
            original_name: original_name.into(),
            renamed_at: None,
        }
    }

    pub fn stamped(original_name: impl Into<String>, renamed_at: NaiveDateTime) -> Self {
        Self {
            original_name: original_name.into(),
            renamed_at: Some(renamed_at),
        }
    }

    pub fn encode(&self) -> String {
        match self.renamed_at {
            Some(at) => format!(
                "{}{}{}{}",
                NAME_LABEL,
                self.original_name,
                DATE_SEPARATOR,
                at.format(DATE_FORMAT)
            ),
            None => format!("{}{}", NAME_LABEL, self.original_name),
        }
    }

    /// `None` for anything that is not a well-formed record naming a bare
    /// file name.
    pub fn parse(text: &str) -> Option<Self> {
        let body = text.trim().strip_prefix(NAME_LABEL)?;
        let (name, renamed_at) = match body.rsplit_once(DATE_SEPARATOR) {
            Some((name, date)) => (
                name,
                Some(NaiveDateTime::parse_from_str(date.trim(), DATE_FORMAT).ok()?),
            ),
            None => (body, None),
        };
        if !is_bare_file_name(name) {
            return None;
        }
        Some(Self {
            original_name: name.to_string(),
            renamed_at,
        })
    }
}

fn is_bare_file_name(name: &str) -> bool {
    !name.is_empty()
        && name.trim() == name
        && !name.contains(['/', '\\'])
        && !name.contains("..")
        && name != "."
}

pub struct ProvenanceLedger {
    provider: Arc<dyn MetadataProvider>,
    chunk_size: usize,
}

impl ProvenanceLedger {
    pub fn new(provider: Arc<dyn MetadataProvider>) -> Self {
        Self {
            provider,
            chunk_size: PROVENANCE_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn supports_writing(&self) -> bool {
        self.provider.supports_writing()
    }

    /// Records `(current path, original file name)` pairs stamped with the
    /// current local time.
    pub fn write_batch(&self, pairs: &[(PathBuf, String)]) -> (Vec<PathBuf>, Vec<FileError>) {
        let now = Local::now().naive_local();
        let records: Vec<(PathBuf, ProvenanceRecord)> = pairs
            .iter()
            .map(|(path, name)| (path.clone(), ProvenanceRecord::stamped(name.clone(), now)))
            .collect();
        self.write_records(&records)
    }

    pub fn write_records(
        &self,
        records: &[(PathBuf, ProvenanceRecord)],
    ) -> (Vec<PathBuf>, Vec<FileError>) {
        let mut successes = Vec::with_capacity(records.len());
        let mut errors = Vec::new();

        for chunk in records.chunks(self.chunk_size) {
            let writes: Vec<TagWrite> = chunk
                .iter()
                .map(|(path, record)| TagWrite {
                    path: path.clone(),
                    tag: PROVENANCE_TAG.to_string(),
                    value: Some(record.encode()),
                })
                .collect();
            match self.provider.write_tags(&writes) {
                Ok(()) => successes.extend(chunk.iter().map(|(path, _)| path.clone())),
                // The batch names no culprit, so find it file by file.
                Err(ProviderError::Failed(err)) if writes.len() > 1 => {
                    warn!(
                        files = chunk.len(),
                        error = %err,
                        "provenance batch failed, retrying per file"
                    );
                    for write in writes {
                        match self.provider.write_tags(std::slice::from_ref(&write)) {
                            Ok(()) => successes.push(write.path),
                            Err(err) => errors.push(FileError::new(
                                &write.path,
                                ErrorKind::Provenance,
                                err.to_string(),
                            )),
                        }
                    }
                }
                Err(err) => {
                    warn!(files = chunk.len(), error = %err, "provenance write failed");
                    errors.extend(chunk.iter().map(|(path, _)| {
                        FileError::new(path, ErrorKind::Provenance, err.to_string())
                    }));
                }
            }
        }
        debug!(written = successes.len(), failed = errors.len(), "provenance batch written");
        (successes, errors)
    }

    /// Original names for `paths`; `None` where no valid record was found.
    pub fn read_batch(&self, paths: &[PathBuf]) -> HashMap<PathBuf, Option<String>> {
        self.read_records(paths)
            .into_iter()
            .map(|(path, record)| (path, record.map(|r| r.original_name)))
            .collect()
    }

    pub fn read_records(&self, paths: &[PathBuf]) -> HashMap<PathBuf, Option<ProvenanceRecord>> {
        let mut out = HashMap::with_capacity(paths.len());
        for chunk in paths.chunks(self.chunk_size) {
            let found = match self.provider.batch_raw_metadata(chunk, &[PROVENANCE_TAG]) {
                Ok(found) => found,
                Err(err) => {
                    warn!(files = chunk.len(), error = %err, "provenance read failed");
                    HashMap::new()
                }
            };
            for path in chunk {
                let record = found
                    .get(path)
                    .and_then(|raw| lookup(raw, &[PROVENANCE_TAG]))
                    .and_then(ProvenanceRecord::parse);
                out.insert(path.clone(), record);
            }
        }
        out
    }

    pub fn clear(&self, path: &std::path::Path) -> Result<(), ProviderError> {
        self.provider.write_tags(&[TagWrite {
            path: path.to_path_buf(),
            tag: PROVENANCE_TAG.to_string(),
            value: None,
        }])
    }
}
