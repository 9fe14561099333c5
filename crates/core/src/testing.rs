use crate::error::ProviderError;
use crate::metadata::RawMetadata;
use crate::provider::{MetadataProvider, TagWrite};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Provider backed by a map, counting every call it receives.
///
/// Paths marked with [`InMemoryProvider::fail`] fail reads, and fail any
/// write call that touches them.
#[derive(Default)]
pub struct InMemoryProvider {
    data: Mutex<HashMap<PathBuf, RawMetadata>>,
    failing: Mutex<HashSet<PathBuf>>,
    single_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    write_calls: AtomicUsize,
    concurrency: usize,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sleeps this long inside every batch call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set(&self, path: &Path, fields: Vec<(&str, String)>) {
        let raw: RawMetadata = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.data
            .lock()
            .expect("provider data lock")
            .insert(path.to_path_buf(), raw);
    }

    pub fn fail(&self, path: &Path) {
        self.failing
            .lock()
            .expect("provider failing lock")
            .insert(path.to_path_buf());
    }

    pub fn recover(&self, path: &Path) {
        self.failing
            .lock()
            .expect("provider failing lock")
            .remove(path);
    }

    pub fn field(&self, path: &Path, tag: &str) -> Option<String> {
        self.data
            .lock()
            .expect("provider data lock")
            .get(path)
            .and_then(|raw| raw.get(tag).cloned())
    }

    pub fn calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Most batch calls that were running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn read(&self, path: &Path) -> Result<RawMetadata, ProviderError> {
        if self.failing.lock().expect("provider failing lock").contains(path) {
            return Err(ProviderError::Failed(format!("{} is broken", path.display())));
        }
        Ok(self
            .data
            .lock()
            .expect("provider data lock")
            .get(path)
            .cloned()
            .unwrap_or_default())
    }
}

impl MetadataProvider for InMemoryProvider {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    fn raw_metadata(&self, path: &Path, _tags: &[&str]) -> Result<RawMetadata, ProviderError> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        self.read(path)
    }

    fn batch_raw_metadata(
        &self,
        paths: &[PathBuf],
        _tags: &[&str],
    ) -> Result<HashMap<PathBuf, RawMetadata>, ProviderError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        let out = paths
            .iter()
            .filter_map(|path| self.read(path).ok().map(|raw| (path.clone(), raw)))
            .collect();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(out)
    }

    fn write_tags(&self, writes: &[TagWrite]) -> Result<(), ProviderError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        {
            let failing = self.failing.lock().expect("provider failing lock");
            if let Some(write) = writes.iter().find(|w| failing.contains(&w.path)) {
                return Err(ProviderError::Failed(format!(
                    "{} is read-only",
                    write.path.display()
                )));
            }
        }
        let mut data = self.data.lock().expect("provider data lock");
        for write in writes {
            let raw = data.entry(write.path.clone()).or_default();
            match &write.value {
                Some(value) => {
                    raw.insert(write.tag.clone(), value.clone());
                }
                None => {
                    raw.remove(&write.tag);
                }
            }
        }
        Ok(())
    }

    fn supports_writing(&self) -> bool {
        true
    }

    fn max_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

pub fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, name.as_bytes()).expect("write test file");
    path
}

/// Executable shell script standing in for an external tool.
#[cfg(unix)]
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    path
}
