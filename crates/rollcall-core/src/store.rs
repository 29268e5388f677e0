//! Registered-face store.
//!
//! Maps a student identifier to one image. [`DirectoryStore`] keeps a flat
//! directory of `<student_id>.jpg` files plus a `scratch/` subdirectory for
//! per-request scratch images.

use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

const FACE_EXTENSION: &str = "jpg";
const SCRATCH_DIR: &str = "scratch";
const MAX_ID_LEN: usize = 128;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid student_id {0:?}: use 1-128 of [A-Za-z0-9._-], not starting with '.'")]
    InvalidId(String),
    #[error("store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Validated student identifier, safe to use as a file stem.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct StudentId(String);

impl StudentId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, StoreError> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && raw.len() <= MAX_ID_LEN
            && !raw.starts_with('.')
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(StudentId(raw))
        } else {
            Err(StoreError::InvalidId(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered face on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFace {
    pub id: StudentId,
    pub path: PathBuf,
}

/// A decoded upload held in a uniquely named scratch file.
///
/// The file is removed when it is dropped unless it has been
/// persisted into the store.
#[derive(Debug)]
pub struct ScratchImage {
    file: NamedTempFile,
}

impl ScratchImage {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Keyed storage of one face image per student.
pub trait FaceStore: Send + Sync {
    /// Write `bytes` to a fresh scratch file.
    fn scratch(&self, bytes: &[u8]) -> Result<ScratchImage, StoreError>;

    /// Atomically install `image` for `id`, replacing any previous one.
    fn persist(&self, id: &StudentId, image: ScratchImage) -> Result<StoredFace, StoreError>;

    /// All registered faces, ordered by identifier.
    fn faces(&self) -> Result<Vec<StoredFace>, StoreError>;

    fn root(&self) -> &Path;
}

/// Flat-directory store: `<root>/<student_id>.jpg`.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    scratch_dir: PathBuf,
}

impl DirectoryStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let scratch_dir = root.join(SCRATCH_DIR);
        std::fs::create_dir_all(&scratch_dir).map_err(|e| StoreError::io(&scratch_dir, e))?;
        tracing::debug!(root = %root.display(), "face store opened");
        Ok(Self { root, scratch_dir })
    }

    /// Path of the image registered (or to be registered) for `id`.
    pub fn face_path(&self, id: &StudentId) -> PathBuf {
        self.root.join(format!("{id}.{FACE_EXTENSION}"))
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }
}

impl FaceStore for DirectoryStore {
    fn scratch(&self, bytes: &[u8]) -> Result<ScratchImage, StoreError> {
        let mut file = tempfile::Builder::new()
            .prefix("scratch-")
            .suffix(&format!(".{FACE_EXTENSION}"))
            .tempfile_in(&self.scratch_dir)
            .map_err(|e| StoreError::io(&self.scratch_dir, e))?;
        file.write_all(bytes)
            .and_then(|_| file.flush())
            .map_err(|e| StoreError::io(file.path(), e))?;
        Ok(ScratchImage { file })
    }

    fn persist(&self, id: &StudentId, image: ScratchImage) -> Result<StoredFace, StoreError> {
        let path = self.face_path(id);
        image
            .file
            .persist(&path)
            .map_err(|e| StoreError::io(&path, e.error))?;
        Ok(StoredFace {
            id: id.clone(),
            path,
        })
    }

    fn faces(&self) -> Result<Vec<StoredFace>, StoreError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;

        let mut faces = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.root, e))?;
            let path = entry.path();
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file || path.extension().and_then(|e| e.to_str()) != Some(FACE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match StudentId::parse(stem) {
                Ok(id) => faces.push(StoredFace { id, path }),
                Err(_) => tracing::debug!(path = %path.display(), "ignoring foreign file in store"),
            }
        }

        faces.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(faces)
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> StudentId {
        StudentId::parse(s).unwrap()
    }

    #[test]
    fn test_student_id_accepts_common_forms() {
        for ok in ["12345", "s-001", "jane_doe", "A.B.C", "x"] {
            assert!(StudentId::parse(ok).is_ok(), "{ok} should be valid");
        }
    }

    #[test]
    fn test_student_id_rejects_path_tricks() {
        for bad in ["", "../etc", "a/b", "a\\b", ".hidden", "..", "temp jpg", "é"] {
            assert!(StudentId::parse(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(StudentId::parse("x".repeat(129)).is_err());
        assert!(StudentId::parse("x".repeat(128)).is_ok());
    }

    #[test]
    fn test_scratch_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();

        let image = store.scratch(b"bytes").unwrap();
        let path = image.path().to_path_buf();
        assert!(path.starts_with(store.scratch_dir()));
        assert!(store.scratch_dir().starts_with(store.root()));
        assert_eq!(std::fs::read(&path).unwrap(), b"bytes");

        drop(image);
        assert!(!path.exists());
    }

    #[test]
    fn test_scratch_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        let a = store.scratch(b"a").unwrap();
        let b = store.scratch(b"b").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_persist_overwrites_previous_image() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();

        let first = store.persist(&id("42"), store.scratch(b"first").unwrap()).unwrap();
        let second = store.persist(&id("42"), store.scratch(b"second").unwrap()).unwrap();

        assert_eq!(first.path, second.path);
        assert_eq!(second.path, dir.path().join("42.jpg"));
        assert_eq!(std::fs::read(&second.path).unwrap(), b"second");
        assert_eq!(store.faces().unwrap().len(), 1);
        assert_eq!(std::fs::read_dir(store.scratch_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_faces_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        for name in ["zed", "amy", "mo"] {
            store.persist(&id(name), store.scratch(name.as_bytes()).unwrap()).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join(".hidden.jpg"), b"x").unwrap();
        let _pending = store.scratch(b"in flight").unwrap();

        let ids: Vec<String> = store
            .faces()
            .unwrap()
            .into_iter()
            .map(|f| f.id.to_string())
            .collect();
        assert_eq!(ids, ["amy", "mo", "zed"]);
    }
}
