//! Memoised metadata lookups for one rename run.
//!
//! Entries are keyed by path, the file's modification time, and the
//! requested [`FieldSignature`]. A file touched on disk no longer matches its
//! old key, so stale entries are simply never hit again and age out through
//! eviction.

use crate::metadata::{FieldSignature, MetadataRecord};
use crate::provider::MetadataProvider;
use indexmap::IndexMap;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tracing::{debug, warn};

pub const DEFAULT_CHUNK_SIZE: usize = 50;
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Records found by a bulk lookup, keyed by the requested path.
pub type RecordMap = HashMap<PathBuf, Arc<MetadataRecord>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: PathBuf,
    modified: SystemTime,
    signature: FieldSignature,
}

#[derive(Debug, Clone)]
enum CacheEntry {
    Found(Arc<MetadataRecord>),
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub provider_calls: usize,
    pub failures: usize,
}

#[derive(Default)]
struct CacheState {
    entries: IndexMap<CacheKey, CacheEntry>,
    stats: CacheStats,
}

pub struct MetadataCache {
    provider: Arc<dyn MetadataProvider>,
    state: Mutex<CacheState>,
    max_entries: usize,
    chunk_size: usize,
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("provider", &self.provider.name())
            .field("max_entries", &self.max_entries)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl MetadataCache {
    pub fn new(provider: Arc<dyn MetadataProvider>) -> Self {
        Self {
            provider,
            state: Mutex::new(CacheState::default()),
            max_entries: DEFAULT_MAX_ENTRIES,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_limits(mut self, max_entries: usize, chunk_size: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn provider(&self) -> &Arc<dyn MetadataProvider> {
        &self.provider
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.stats = CacheStats::default();
    }

    /// Cached lookup for a single file. Never fails: inaccessible files and
    /// provider errors both come back as `None`.
    pub fn get(&self, path: &Path, signature: FieldSignature) -> Option<Arc<MetadataRecord>> {
        let key = cache_key(path, signature)?;
        if let Some(entry) = self.lookup(&key) {
            return found(entry);
        }

        let tags = signature.tags();
        self.lock().stats.provider_calls += 1;
        let entry = match self.provider.raw_metadata(path, &tags) {
            Ok(raw) => CacheEntry::Found(Arc::new(MetadataRecord::from_raw(raw))),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "metadata lookup failed");
                CacheEntry::Failed
            }
        };
        self.insert(vec![(key, entry.clone())]);
        found(entry)
    }

    /// Looks up many files with one provider call per chunk of misses.
    pub fn batch_get(
        &self,
        paths: &[PathBuf],
        signature: FieldSignature,
    ) -> RecordMap {
        let mut out = HashMap::with_capacity(paths.len());
        let mut misses: Vec<CacheKey> = Vec::new();
        let mut missed: HashSet<&Path> = HashSet::new();

        for path in paths {
            let Some(key) = cache_key(path, signature) else {
                continue;
            };
            match self.lookup(&key) {
                Some(entry) => {
                    if let Some(record) = found(entry) {
                        out.insert(path.clone(), record);
                    }
                }
                None => {
                    if missed.insert(path.as_path()) {
                        misses.push(key);
                    }
                }
            }
        }

        if misses.is_empty() {
            return out;
        }

        let tags = signature.tags();
        let chunks: Vec<&[CacheKey]> = misses.chunks(self.chunk_size).collect();
        let fetch = |chunk: &&[CacheKey]| -> Vec<(CacheKey, CacheEntry)> {
            let chunk_paths: Vec<PathBuf> = chunk.iter().map(|k| k.path.clone()).collect();
            self.lock().stats.provider_calls += 1;
            match self.provider.batch_raw_metadata(&chunk_paths, &tags) {
                Ok(mut found) => chunk
                    .iter()
                    .map(|key| {
                        let entry = match found.remove(&key.path) {
                            Some(raw) => {
                                CacheEntry::Found(Arc::new(MetadataRecord::from_raw(raw)))
                            }
                            None => CacheEntry::Failed,
                        };
                        (key.clone(), entry)
                    })
                    .collect(),
                Err(err) => {
                    warn!(files = chunk.len(), error = %err, "batch metadata lookup failed");
                    chunk
                        .iter()
                        .map(|key| (key.clone(), CacheEntry::Failed))
                        .collect()
                }
            }
        };

        let concurrency = self.provider.max_concurrency().min(chunks.len());
        let fetched: Vec<(CacheKey, CacheEntry)> = if concurrency > 1 {
            match rayon::ThreadPoolBuilder::new().num_threads(concurrency).build() {
                Ok(pool) => pool.install(|| chunks.par_iter().flat_map_iter(fetch).collect()),
                Err(err) => {
                    debug!(error = %err, "falling back to sequential metadata fetch");
                    chunks.iter().flat_map(fetch).collect()
                }
            }
        } else {
            chunks.iter().flat_map(fetch).collect()
        };

        for (key, entry) in &fetched {
            if let CacheEntry::Found(record) = entry {
                out.insert(key.path.clone(), Arc::clone(record));
            }
        }
        self.insert(fetched);
        out
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // A panic while holding the lock cannot leave the map half-written.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut state = self.lock();
        let hit = state.entries.get(key).cloned();
        if hit.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        hit
    }

    fn insert(&self, entries: Vec<(CacheKey, CacheEntry)>) {
        let mut state = self.lock();
        for (key, entry) in entries {
            if matches!(entry, CacheEntry::Failed) {
                state.stats.failures += 1;
            }
            state.entries.insert(key, entry);
        }
        if state.entries.len() > self.max_entries {
            // Shrink to 80% of the ceiling, however large the insert was.
            let target = (self.max_entries * 4 / 5).max(1);
            let evict = state.entries.len() - target;
            state.entries.drain(..evict);
            debug!(evicted = evict, "metadata cache evicted oldest entries");
        }
    }
}

fn cache_key(path: &Path, signature: FieldSignature) -> Option<CacheKey> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(CacheKey {
        path: path.to_path_buf(),
        modified,
        signature,
    })
}

fn found(entry: CacheEntry) -> Option<Arc<MetadataRecord>> {
    match entry {
        CacheEntry::Found(record) => Some(record),
        CacheEntry::Failed => None,
    }
}
