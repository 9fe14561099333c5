use crate::error::ProviderError;
use crate::metadata::RawMetadata;
use crate::provider::MetadataProvider;
use exif::{In, Reader};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Read-only provider that parses EXIF containers in-process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifReaderProvider;

impl MetadataProvider for ExifReaderProvider {
    fn name(&self) -> &'static str {
        "exif-reader"
    }

    fn raw_metadata(&self, path: &Path, tags: &[&str]) -> Result<RawMetadata, ProviderError> {
        let file = File::open(path)?;
        let mut buf = BufReader::new(file);
        let exif = Reader::new()
            .read_from_container(&mut buf)
            .map_err(|err| ProviderError::Failed(format!("{}: {}", path.display(), err)))?;

        let mut raw = RawMetadata::new();
        for field in exif.fields() {
            let tag_name = field.tag.to_string();
            if !tags.is_empty() && !tags.iter().any(|t| t.eq_ignore_ascii_case(&tag_name)) {
                continue;
            }
            let value = field.display_value().with_unit(&exif).to_string();
            let value = value.trim().trim_matches('"').trim().to_string();
            if value.is_empty() {
                continue;
            }
            // Thumbnail IFD repeats several primary tags; the primary wins.
            if field.ifd_num == In::PRIMARY {
                raw.insert(tag_name, value);
            } else {
                raw.entry(tag_name).or_insert(value);
            }
        }
        Ok(raw)
    }

    fn max_concurrency(&self) -> usize {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn non_image_file_is_a_provider_failure() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("IMG_0001.JPG");
        fs::write(&path, b"not really a jpeg").expect("write file");

        let err = ExifReaderProvider
            .raw_metadata(&path, &[])
            .expect_err("garbage must not parse");
        assert!(matches!(err, ProviderError::Failed(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let temp = tempdir().expect("tempdir");
        let err = ExifReaderProvider
            .raw_metadata(&temp.path().join("missing.jpg"), &[])
            .expect_err("missing file");
        assert!(matches!(err, ProviderError::Io(_)));
    }

    #[test]
    fn writing_is_unsupported() {
        let err = ExifReaderProvider
            .write_tags(&[])
            .expect_err("read-only provider");
        assert!(matches!(err, ProviderError::Unsupported("exif-reader")));
    }
}
