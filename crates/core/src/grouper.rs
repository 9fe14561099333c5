use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "bmp", "tiff", "tif", "gif", "heic", "heif", "cr2", "cr3", "nef",
    "arw", "orf", "rw2", "dng", "raw", "sr2", "pef", "raf", "3fr", "erf", "kdc", "mos", "nrw",
    "srw", "x3f",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "avi", "mkv", "m4v", "3gp", "wmv", "flv", "webm", "mpg", "mpeg", "m2v", "mts",
    "m2ts", "ts", "vob", "asf", "rm", "rmvb", "f4v", "ogv",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaFile {
    pub path: PathBuf,
    pub directory: PathBuf,
    pub stem: String,
    /// Without the leading dot, original case. Empty when the file has none.
    pub extension: String,
}

impl MediaFile {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|v| v.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|v| v.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            path,
            directory,
            stem,
            extension,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|v| v.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// `.ext` or an empty string.
    pub fn dotted_extension(&self) -> String {
        if self.extension.is_empty() {
            String::new()
        } else {
            format!(".{}", self.extension)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub usize);

/// Files renamed as one unit: same directory, same stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileGroup {
    pub id: GroupId,
    pub directory: PathBuf,
    pub stem: String,
    pub members: Vec<MediaFile>,
}

impl FileGroup {
    /// First member in input order.
    pub fn representative(&self) -> &MediaFile {
        &self.members[0]
    }

    pub fn is_sibling_set(&self) -> bool {
        self.members.len() > 1
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.members.iter().map(|m| m.path.as_path())
    }
}

pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str()) || VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Partitions `files` by (directory, stem). Non-media paths and duplicates
/// are dropped; groups come out in first-seen order.
pub fn group_files(files: &[PathBuf]) -> Vec<FileGroup> {
    let mut seen = HashSet::new();
    let mut groups: IndexMap<(PathBuf, String), Vec<MediaFile>> = IndexMap::new();

    for path in files {
        if !is_media_file(path) || !seen.insert(path.clone()) {
            continue;
        }
        let file = MediaFile::from_path(path.clone());
        groups
            .entry((file.directory.clone(), file.stem.clone()))
            .or_default()
            .push(file);
    }

    groups
        .into_iter()
        .enumerate()
        .map(|(index, ((directory, stem), members))| FileGroup {
            id: GroupId(index),
            directory,
            stem,
            members,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub scanned_files: usize,
    pub media_files: usize,
    pub skipped_non_media: usize,
    pub skipped_hidden: usize,
}

/// Expands files and directories into a sorted, de-duplicated media file list.
pub fn collect_media_files(
    inputs: &[PathBuf],
    recursive: bool,
    include_hidden: bool,
    stats: &mut ScanStats,
) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();

    for input in inputs {
        if input.is_file() {
            consider(input, include_hidden, stats, &mut seen, &mut out);
            continue;
        }
        if !input.is_dir() {
            anyhow::bail!("input does not exist: {}", input.display());
        }

        if recursive {
            let walker = WalkDir::new(input)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| {
                    entry.depth() == 0 || include_hidden || !is_hidden(entry.path())
                });
            for entry in walker {
                let entry =
                    entry.with_context(|| format!("failed to walk {}", input.display()))?;
                if entry.file_type().is_dir() {
                    continue;
                }
                consider(entry.path(), include_hidden, stats, &mut seen, &mut out);
            }
        } else {
            let mut entries = Vec::new();
            for entry in fs::read_dir(input)
                .with_context(|| format!("failed to read directory {}", input.display()))?
            {
                let entry =
                    entry.with_context(|| format!("failed to read entry in {}", input.display()))?;
                let path = entry.path();
                if path.is_dir() {
                    continue;
                }
                entries.push(path);
            }
            entries.sort();
            for path in entries {
                consider(&path, include_hidden, stats, &mut seen, &mut out);
            }
        }
    }

    Ok(out)
}

fn consider(
    path: &Path,
    include_hidden: bool,
    stats: &mut ScanStats,
    seen: &mut HashSet<PathBuf>,
    out: &mut Vec<PathBuf>,
) {
    if !seen.insert(path.to_path_buf()) {
        return;
    }
    stats.scanned_files += 1;
    if is_hidden(path) && !include_hidden {
        stats.skipped_hidden += 1;
        return;
    }
    if is_media_file(path) {
        stats.media_files += 1;
        out.push(path.to_path_buf());
    } else {
        stats.skipped_non_media += 1;
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn siblings_share_one_group() {
        let files = vec![
            PathBuf::from("/shoot/IMG_0001.JPG"),
            PathBuf::from("/shoot/IMG_0002.JPG"),
            PathBuf::from("/shoot/IMG_0001.ARW"),
        ];
        let groups = group_files(&files);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].stem, "IMG_0001");
        assert!(groups[0].is_sibling_set());
        assert_eq!(groups[0].members[1].extension, "ARW");
        assert_eq!(groups[0].representative().path, files[0]);
        assert_eq!(groups[1].id, GroupId(1));
    }

    #[test]
    fn same_stem_in_different_directories_stays_apart() {
        let files = vec![
            PathBuf::from("/day1/IMG_0001.JPG"),
            PathBuf::from("/day2/IMG_0001.JPG"),
        ];
        assert_eq!(group_files(&files).len(), 2);
    }

    #[test]
    fn non_media_and_duplicates_are_dropped() {
        let files = vec![
            PathBuf::from("/shoot/IMG_0001.JPG"),
            PathBuf::from("/shoot/IMG_0001.xmp"),
            PathBuf::from("/shoot/notes.txt"),
            PathBuf::from("/shoot/IMG_0001.JPG"),
            PathBuf::from("/shoot/clip.MP4"),
        ];
        let groups = group_files(&files);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].members.len(), 1);
    }

    #[test]
    fn collect_skips_hidden_and_counts_non_media() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("IMG_0002.JPG"), b"x").expect("write");
        fs::write(root.join("IMG_0001.ARW"), b"x").expect("write");
        fs::write(root.join(".hidden.JPG"), b"x").expect("write");
        fs::write(root.join("notes.txt"), b"x").expect("write");
        fs::create_dir_all(root.join("nested")).expect("mkdir");
        fs::write(root.join("nested").join("IMG_0003.JPG"), b"x").expect("write");

        let mut stats = ScanStats::default();
        let files =
            collect_media_files(&[root.to_path_buf()], false, false, &mut stats).expect("scan");
        assert_eq!(
            files,
            vec![root.join("IMG_0001.ARW"), root.join("IMG_0002.JPG")]
        );
        assert_eq!(stats.skipped_hidden, 1);
        assert_eq!(stats.skipped_non_media, 1);

        let mut stats = ScanStats::default();
        let files =
            collect_media_files(&[root.to_path_buf()], true, false, &mut stats).expect("scan");
        assert_eq!(files.len(), 3);
        assert_eq!(stats.media_files, 3);
    }

    #[test]
    fn collect_rejects_missing_input() {
        let temp = tempdir().expect("tempdir");
        let mut stats = ScanStats::default();
        let err = collect_media_files(&[temp.path().join("missing")], false, false, &mut stats)
            .expect_err("missing input");
        assert!(err.to_string().contains("does not exist"));
    }
}
