//! Filesystem store for uploaded images.
//!
//! References are relative paths like `photos/<name>.jpg`, stored in the
//! database and served statically. Writes go through a temporary file in the
//! destination directory followed by a rename, so a partially-written upload
//! is never visible to readers.

use std::{
    io::Write,
    path::{Component, Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;

pub const PHOTOS: &str = "photos";
pub const EMBLEMS: &str = "emblems";
pub const CAROUSEL: &str = "carousel";
pub const GROUPS: &str = "groups";

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(root: P) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Stores `data` under `subdir` with a random name, returning the
    /// reference string. The file appears atomically.
    pub fn save(&self, subdir: &str, ext: &str, data: &[u8]) -> Result<String, AppError> {
        let dir = self.root.join(subdir);
        std::fs::create_dir_all(&dir)?;

        let name = format!("{}{ext}", Uuid::new_v4().simple());

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(data)?;
        tmp.persist(dir.join(&name)).map_err(|e| e.error)?;

        debug!(subdir, name, size = data.len(), "Stored upload");
        Ok(format!("{subdir}/{name}"))
    }

    /// Deletes a stored file by reference. Missing files are not an error;
    /// the reference may already have been cleaned up.
    pub fn delete(&self, reference: &str) {
        if let Some(path) = self.resolve(reference) {
            if std::fs::remove_file(&path).is_ok() {
                debug!(reference, "Deleted upload");
            }
        }
    }

    /// Deletes a whole subdirectory, e.g. `groups/7` when group 7 goes away.
    pub fn delete_dir(&self, subdir: &str) {
        if let Some(path) = self.resolve(subdir) {
            std::fs::remove_dir_all(path).ok();
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a reference to an absolute path, rejecting anything that
    /// would escape the root.
    fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let rel = Path::new(reference);
        let safe = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));

        safe.then(|| self.root.join(rel))
    }
}

/// Lowercased extension of an uploaded filename, including the dot.
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_and_delete_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        let reference = store.save(PHOTOS, ".jpg", b"fake jpeg").unwrap();
        assert!(reference.starts_with("photos/"));
        assert!(reference.ends_with(".jpg"));

        let on_disk = dir.path().join(&reference);
        assert_eq!(std::fs::read(&on_disk).unwrap(), b"fake jpeg");

        store.delete(&reference);
        assert!(!on_disk.exists());

        // Idempotent on a missing file.
        store.delete(&reference);
    }

    #[test]
    fn traversal_references_are_ignored() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        store.delete("../outside.txt");
        store.delete("/etc/passwd");
        assert!(dir.path().exists());
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension_of("Photo.JPG"), ".jpg");
        assert_eq!(extension_of("emblem.svg"), ".svg");
        assert_eq!(extension_of("noext"), "");
    }
}
