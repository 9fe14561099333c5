use crate::error::RenameError;
use crate::sanitize::truncate_stem;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Longest full path, in characters, a target may have.
pub const MAX_PATH_CHARS: usize = 250;
pub const MAX_COLLISION_ATTEMPTS: u32 = 999;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub path: PathBuf,
    /// The candidate named the source file itself.
    pub unchanged: bool,
    /// `n` of the `(n)` suffix that had to be added.
    pub collision_suffix: Option<u32>,
    pub shortened: bool,
}

/// Turns `candidate_name` into a free path next to `original`.
///
/// `reserved` holds targets already claimed in the same run but not yet on
/// disk, so a dry run never hands out one path twice.
pub fn resolve_target(
    original: &Path,
    candidate_name: &str,
    reserved: &HashSet<PathBuf>,
) -> Result<ResolvedTarget, RenameError> {
    resolve_target_with_limit(original, candidate_name, reserved, MAX_PATH_CHARS)
}

pub fn resolve_target_with_limit(
    original: &Path,
    candidate_name: &str,
    reserved: &HashSet<PathBuf>,
    limit: usize,
) -> Result<ResolvedTarget, RenameError> {
    validate_name(candidate_name)?;
    let parent = original.parent().unwrap_or_else(|| Path::new(""));

    match attempt(parent, original, candidate_name, reserved, limit) {
        Err(RenameError::PathTooLong { path, len }) => {
            let (stem, extension) = split_name(candidate_name);
            // Leave room for a collision suffix of up to "(999)".
            let budget = limit.saturating_sub(char_len(parent) + 1 + 5);
            if budget <= 10 {
                return Err(RenameError::PathTooLong { path, len });
            }
            let shorter = format!("{}{}", truncate_stem(&stem, &extension, budget), extension);
            debug!(from = candidate_name, to = %shorter, "shortening over-long target name");
            let mut resolved = attempt(parent, original, &shorter, reserved, limit)?;
            resolved.shortened = true;
            Ok(resolved)
        }
        other => other,
    }
}

fn attempt(
    parent: &Path,
    original: &Path,
    name: &str,
    reserved: &HashSet<PathBuf>,
    limit: usize,
) -> Result<ResolvedTarget, RenameError> {
    let target = parent.join(name);
    if same_path_ignoring_case(&target, original) {
        return Ok(ResolvedTarget {
            path: original.to_path_buf(),
            unchanged: true,
            collision_suffix: None,
            shortened: false,
        });
    }

    if !is_taken(&target, original, reserved) {
        check_length(&target, limit)?;
        return Ok(ResolvedTarget {
            path: target,
            unchanged: false,
            collision_suffix: None,
            shortened: false,
        });
    }

    let (stem, extension) = split_name(name);
    for n in 1..=MAX_COLLISION_ATTEMPTS {
        let candidate = parent.join(format!("{}({}){}", stem, n, extension));
        if same_path_ignoring_case(&candidate, original) {
            return Ok(ResolvedTarget {
                path: original.to_path_buf(),
                unchanged: true,
                collision_suffix: None,
                shortened: false,
            });
        }
        if !is_taken(&candidate, original, reserved) {
            check_length(&candidate, limit)?;
            return Ok(ResolvedTarget {
                path: candidate,
                unchanged: false,
                collision_suffix: Some(n),
                shortened: false,
            });
        }
    }

    Err(RenameError::CollisionExhausted {
        name: name.to_string(),
        attempts: MAX_COLLISION_ATTEMPTS,
    })
}

fn validate_name(name: &str) -> Result<(), RenameError> {
    let invalid = name.is_empty()
        || name == "."
        || name.contains(['/', '\\'])
        || name.contains("..")
        || Path::new(name).is_absolute();
    if invalid {
        return Err(RenameError::InvalidTargetName {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn is_taken(candidate: &Path, original: &Path, reserved: &HashSet<PathBuf>) -> bool {
    if reserved.contains(candidate) {
        return true;
    }
    candidate.symlink_metadata().is_ok() && !same_path_ignoring_case(candidate, original)
}

fn check_length(path: &Path, limit: usize) -> Result<(), RenameError> {
    let len = char_len(path);
    if len > limit {
        return Err(RenameError::PathTooLong {
            path: path.to_path_buf(),
            len,
        });
    }
    Ok(())
}

fn same_path_ignoring_case(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}

/// Splits a bare file name into stem and `.ext` (possibly empty).
fn split_name(name: &str) -> (String, String) {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|v| v.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string());
    let extension = path
        .extension()
        .map(|v| format!(".{}", v.to_string_lossy()))
        .unwrap_or_default();
    (stem, extension)
}

fn char_len(path: &Path) -> usize {
    path.to_string_lossy().chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn collision_with_unrelated_file_gets_suffix() {
        let temp = tempdir().expect("tempdir");
        let original = temp.path().join("photo.jpg");
        fs::write(&original, b"a").expect("write");
        fs::write(temp.path().join("photo_out.jpg"), b"b").expect("write");

        let resolved =
            resolve_target(&original, "photo_out.jpg", &HashSet::new()).expect("resolved");
        assert_eq!(resolved.path, temp.path().join("photo_out(1).jpg"));
        assert_eq!(resolved.collision_suffix, Some(1));
    }

    #[test]
    fn suffixes_are_gap_free() {
        let temp = tempdir().expect("tempdir");
        let original = temp.path().join("IMG_0001.JPG");
        fs::write(&original, b"a").expect("write");
        fs::write(temp.path().join("out.JPG"), b"b").expect("write");
        fs::write(temp.path().join("out(1).JPG"), b"c").expect("write");

        let mut reserved = HashSet::new();
        reserved.insert(temp.path().join("out(2).JPG"));
        let resolved = resolve_target(&original, "out.JPG", &reserved).expect("resolved");
        assert_eq!(resolved.path, temp.path().join("out(3).JPG"));
    }

    #[test]
    fn same_name_ignoring_case_is_a_no_op() {
        let temp = tempdir().expect("tempdir");
        let original = temp.path().join("IMG_0001.JPG");
        fs::write(&original, b"a").expect("write");

        let resolved =
            resolve_target(&original, "img_0001.jpg", &HashSet::new()).expect("resolved");
        assert!(resolved.unchanged);
        assert_eq!(resolved.path, original);
    }

    #[test]
    fn traversal_and_separators_are_rejected() {
        let original = PathBuf::from("/shoot/IMG_0001.JPG");
        for name in ["../evil.jpg", "sub/evil.jpg", "sub\\evil.jpg", "", "a..b.jpg"] {
            let err = resolve_target(&original, name, &HashSet::new()).expect_err(name);
            assert!(matches!(err, RenameError::InvalidTargetName { .. }), "{name}");
        }
    }

    #[test]
    fn long_name_is_shortened_once() {
        let temp = tempdir().expect("tempdir");
        let original = temp.path().join("IMG_0001.JPG");
        let base_len = temp.path().to_string_lossy().chars().count() + 1;
        let limit = base_len + 40;
        let name = format!("{}.JPG", ["word"; 20].join("_"));

        let resolved = resolve_target_with_limit(&original, &name, &HashSet::new(), limit)
            .expect("shortened");
        assert!(resolved.shortened);
        assert!(resolved.path.to_string_lossy().chars().count() <= limit);
        assert!(resolved.path.to_string_lossy().ends_with(".JPG"));
    }

    #[test]
    fn shortening_keeps_date_and_counter() {
        let temp = tempdir().expect("tempdir");
        let original = temp.path().join("IMG_0001.JPG");
        let base_len = temp.path().to_string_lossy().chars().count() + 1;
        let limit = base_len + 40;
        let name = format!("2024-06-01-{}-007.JPG", ["Landscape"; 8].join("_"));

        let resolved = resolve_target_with_limit(&original, &name, &HashSet::new(), limit)
            .expect("shortened");
        let file_name = resolved
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .expect("file name");
        assert!(resolved.shortened);
        assert!(file_name.starts_with("2024-06-01-"), "{file_name}");
        assert!(file_name.ends_with("-007.JPG"), "{file_name}");
        assert!(resolved.path.to_string_lossy().chars().count() <= limit);
    }

    #[test]
    fn hopeless_length_is_reported() {
        let temp = tempdir().expect("tempdir");
        let original = temp.path().join("IMG_0001.JPG");
        let limit = temp.path().to_string_lossy().chars().count() + 8;

        let err = resolve_target_with_limit(&original, "a_long_name.JPG", &HashSet::new(), limit)
            .expect_err("too long");
        assert!(matches!(err, RenameError::PathTooLong { .. }));
    }
}
