//! rollcall-core — face analysis and the registered-face store.
//!
//! [`FaceAnalyzer`] turns images into embeddings through an [`Embedder`] and
//! compares them with a [`DistanceMetric`]. The ONNX embedder runs an optional
//! SCRFD detector followed by a recognition model.

pub mod analyzer;
pub mod onnx;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use analyzer::{load_image, AnalyzerError, Embedder, FaceAnalyzer};
pub use store::{DirectoryStore, FaceStore, ScratchImage, StoreError, StoredFace, StudentId};
pub use types::{BoundingBox, Candidate, DistanceMetric, Embedding, FaceModel, Verification};

use std::path::PathBuf;

/// Base directory for rollcall data: `$XDG_DATA_HOME/rollcall`, falling back
/// to `~/.local/share/rollcall`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}
