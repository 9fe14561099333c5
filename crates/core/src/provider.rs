use crate::error::ProviderError;
use crate::metadata::RawMetadata;
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);
/// Base deadline for a write process; rewriting files takes far longer than
/// reading them.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
pub const WRITE_TIMEOUT_PER_FILE: Duration = Duration::from_secs(1);

/// One tag assignment. `value: None` removes the tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagWrite {
    pub path: PathBuf,
    pub tag: String,
    pub value: Option<String>,
}

/// Source of already-extracted metadata fields.
///
/// `tags` is a hint naming the fields the caller needs; an empty slice asks
/// for everything and providers may return more than was asked for.
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn raw_metadata(&self, path: &Path, tags: &[&str]) -> Result<RawMetadata, ProviderError>;

    /// Paths missing from the returned map had no readable metadata.
    fn batch_raw_metadata(
        &self,
        paths: &[PathBuf],
        tags: &[&str],
    ) -> Result<HashMap<PathBuf, RawMetadata>, ProviderError> {
        let mut out = HashMap::with_capacity(paths.len());
        for path in paths {
            if let Ok(raw) = self.raw_metadata(path, tags) {
                out.insert(path.clone(), raw);
            }
        }
        Ok(out)
    }

    fn write_tags(&self, _writes: &[TagWrite]) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported(self.name()))
    }

    fn supports_writing(&self) -> bool {
        false
    }

    /// How many batch calls may run at the same time.
    fn max_concurrency(&self) -> usize {
        1
    }
}

/// Talks to an `exiftool` executable, one process per batch.
#[derive(Debug, Clone)]
pub struct ExifToolProvider {
    executable: PathBuf,
    timeout: Duration,
    write_timeout: Duration,
    concurrency: usize,
}

struct RunOutput {
    success: bool,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl RunOutput {
    fn stderr_message(&self) -> String {
        let message = String::from_utf8_lossy(&self.stderr).trim().to_string();
        if message.is_empty() {
            "exiftool exited with an error".to_string()
        } else {
            message
        }
    }
}

impl ExifToolProvider {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            timeout: DEFAULT_PROVIDER_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            concurrency: 2,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Finds `exiftool` on `PATH`.
    pub fn locate() -> Option<PathBuf> {
        let names: &[&str] = if cfg!(windows) {
            &["exiftool.exe", "exiftool(-k).exe"]
        } else {
            &["exiftool"]
        };
        let path_var = env::var_os("PATH")?;
        env::split_paths(&path_var).find_map(|dir| {
            names
                .iter()
                .map(|name| dir.join(name))
                .find(|candidate| candidate.is_file())
        })
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn read_args(tags: &[&str], paths: &[PathBuf]) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-json".into(), "-charset".into(), "filename=utf8".into()];
        for tag in tags {
            args.push(format!("-{}", tag).into());
        }
        args.push("--".into());
        args.extend(paths.iter().map(|p| p.as_os_str().to_os_string()));
        args
    }

    /// Deadline for one write process covering `files` files.
    pub fn write_deadline(&self, files: usize) -> Duration {
        let files = u32::try_from(files).unwrap_or(u32::MAX);
        let per_file = WRITE_TIMEOUT_PER_FILE.saturating_mul(files);
        self.write_timeout.saturating_add(per_file)
    }

    fn run(&self, args: &[OsString], timeout: Duration) -> Result<RunOutput, ProviderError> {
        let mut child = Command::new(&self.executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                ProviderError::Unavailable(format!("{}: {}", self.executable.display(), err))
            })?;

        let stdout = drain(&mut child, true);
        let stderr = drain(&mut child, false);
        let status = wait_with_deadline(&mut child, timeout)?;

        let output = RunOutput {
            success: status.success(),
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        };
        if output.success && !output.stderr.is_empty() {
            debug!(stderr = %output.stderr_message(), "exiftool reported warnings");
        }
        Ok(output)
    }
}

impl MetadataProvider for ExifToolProvider {
    fn name(&self) -> &'static str {
        "exiftool"
    }

    fn raw_metadata(&self, path: &Path, tags: &[&str]) -> Result<RawMetadata, ProviderError> {
        let mut batch = self.batch_raw_metadata(&[path.to_path_buf()], tags)?;
        batch
            .remove(path)
            .ok_or_else(|| ProviderError::Failed(format!("no metadata for {}", path.display())))
    }

    fn batch_raw_metadata(
        &self,
        paths: &[PathBuf],
        tags: &[&str],
    ) -> Result<HashMap<PathBuf, RawMetadata>, ProviderError> {
        if paths.is_empty() {
            return Ok(HashMap::new());
        }
        let output = self.run(&Self::read_args(tags, paths), self.timeout)?;
        // exiftool exits with 1 when some files had no readable metadata but
        // still prints JSON for the rest.
        if !output.success && output.stdout.is_empty() {
            return Err(ProviderError::Failed(output.stderr_message()));
        }
        parse_json_output(&output.stdout, paths)
    }

    fn write_tags(&self, writes: &[TagWrite]) -> Result<(), ProviderError> {
        if writes.is_empty() {
            return Ok(());
        }
        // Tag assignments apply to every file of one command, so each file
        // gets its own -execute section inside the same process.
        let mut args: Vec<OsString> = Vec::with_capacity(writes.len() * 5);
        for (index, write) in writes.iter().enumerate() {
            if index > 0 {
                args.push("-execute".into());
            }
            args.push("-overwrite_original".into());
            let assignment = match &write.value {
                Some(value) => format!("-{}={}", write.tag, value),
                None => format!("-{}=", write.tag),
            };
            args.push(assignment.into());
            args.push(write.path.as_os_str().to_os_string());
        }
        let output = self.run(&args, self.write_deadline(writes.len()))?;
        // Any failed section fails the whole call; callers retry per file to
        // find out which one it was.
        if !output.success {
            return Err(ProviderError::Failed(output.stderr_message()));
        }
        Ok(())
    }

    fn supports_writing(&self) -> bool {
        true
    }

    fn max_concurrency(&self) -> usize {
        self.concurrency
    }
}

fn drain(child: &mut Child, stdout: bool) -> thread::JoinHandle<Vec<u8>> {
    let reader: Option<Box<dyn Read + Send>> = if stdout {
        child.stdout.take().map(|s| Box::new(s) as Box<dyn Read + Send>)
    } else {
        child.stderr.take().map(|s| Box::new(s) as Box<dyn Read + Send>)
    };
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buf);
        }
        buf
    })
}

fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
) -> Result<std::process::ExitStatus, ProviderError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            warn!(?timeout, "metadata provider timed out, killing process");
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProviderError::Timeout(timeout));
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Maps exiftool `-json` output back onto the requested paths.
pub(crate) fn parse_json_output(
    output: &[u8],
    requested: &[PathBuf],
) -> Result<HashMap<PathBuf, RawMetadata>, ProviderError> {
    let entries: Vec<serde_json::Map<String, Value>> = serde_json::from_slice(output)?;
    let by_name: HashMap<String, &PathBuf> = requested
        .iter()
        .map(|p| (normalize_source(&p.to_string_lossy()), p))
        .collect();

    let mut out = HashMap::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let source = entry
            .get("SourceFile")
            .and_then(Value::as_str)
            .map(normalize_source);
        let path = match source.as_deref().and_then(|s| by_name.get(s)) {
            Some(path) => (*path).clone(),
            None => match requested.get(index) {
                Some(path) if source.is_none() => path.clone(),
                _ => continue,
            },
        };

        let mut raw = RawMetadata::with_capacity(entry.len());
        for (key, value) in entry {
            if key == "SourceFile" {
                continue;
            }
            let bare = key.rsplit(':').next().unwrap_or(key.as_str()).to_string();
            if let Some(text) = value_to_string(&value) {
                raw.entry(bare).or_insert(text);
            }
        }
        out.insert(path, raw);
    }
    Ok(out)
}

fn normalize_source(value: &str) -> String {
    value.replace('\\', "/")
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_to_string).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        Value::Null | Value::Object(_) => None,
    }
}
