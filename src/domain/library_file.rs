use std::path::{Path, PathBuf};

use super::{Uuid, ValidationError};
use crate::utils::normalizations::normalize_path;

/// A physical audio file on disk, attached to exactly one Recording. Paths
/// are stored with forward slashes and are unique across the library.
#[derive(Clone, Debug)]
pub struct LibraryFile {
    id: Uuid,
    recording_id: Uuid,
    path: PathBuf,
    file_hash: Option<String>,
    size: u64,
    mtime: Option<f64>,
    format: String,
    bitrate: Option<u32>
}

impl AsRef<LibraryFile> for LibraryFile {
    fn as_ref(&self) -> &LibraryFile {
        self
    }
}

impl PartialEq for LibraryFile {
    fn eq(&self, other: &Self) -> bool {
        self.path() == other.path()
    }
}

impl Eq for LibraryFile {}

impl LibraryFile {

    pub fn new<P: AsRef<Path>>(
        id: Uuid,
        recording_id: Uuid,
        path: P,
        size: u64,
        mtime: Option<f64>,
        format: String,
    ) -> Result<Self, ValidationError> {
        let norm_path = normalize_path(path.as_ref());
        if norm_path.as_os_str().is_empty() { return Err(ValidationError::PathIsEmptyString); }

        Ok(
            Self {
                id,
                recording_id,
                path: norm_path,
                file_hash: None,
                size,
                mtime,
                format,
                bitrate: None
            }
        )
    }

    pub fn from_stored(
        id: Uuid,
        recording_id: Uuid,
        path: String,
        file_hash: Option<String>,
        size: u64,
        mtime: Option<f64>,
        format: String,
        bitrate: Option<u32>,
    ) -> Self {
        Self {
            id,
            recording_id,
            path: PathBuf::from(path),
            file_hash,
            size,
            mtime,
            format,
            bitrate
        }
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    pub fn recording_id(&self) -> &Uuid {
        &self.recording_id
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn file_hash(&self) -> Option<&str> {
        self.file_hash.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mtime(&self) -> Option<f64> {
        self.mtime
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn bitrate(&self) -> Option<u32> {
        self.bitrate
    }

    pub fn with_hash(mut self, hash: Option<String>) -> Self {
        self.file_hash = hash;
        self
    }

    pub fn with_bitrate(mut self, bitrate: Option<u32>) -> Self {
        self.bitrate = bitrate;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_normalizes_backslashes() {
        let file = LibraryFile::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            r"m\a\b.mp3",
            1024,
            Some(1.0),
            "mp3".to_string(),
        ).unwrap();
        assert_eq!(file.path(), &PathBuf::from("m/a/b.mp3"));
    }

    #[test]
    fn equality_is_by_path() {
        let a = LibraryFile::new(Uuid::new_v4(), Uuid::new_v4(), "m/a.mp3", 1, None, "mp3".into()).unwrap();
        let b = LibraryFile::new(Uuid::new_v4(), Uuid::new_v4(), "m/a.mp3", 2, None, "mp3".into()).unwrap();
        assert_eq!(a, b);
    }
}
