//! Face analysis operations: represent, verify and find.
//!
//! [`FaceAnalyzer`] wraps an [`Embedder`] and turns raw embeddings into
//! verification decisions using the configured distance metric and threshold.

use crate::store::StoredFace;
use crate::types::{Candidate, DistanceMetric, Embedding, FaceModel, Verification};
use image::{DynamicImage, ImageReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("cannot read image {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("face could not be detected; confirm that the picture is a face photo")]
    NoFaceDetected,
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Extracts a face embedding from a decoded image.
pub trait Embedder {
    fn embed(&mut self, image: &DynamicImage) -> Result<Embedding, AnalyzerError>;
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn embed(&mut self, image: &DynamicImage) -> Result<Embedding, AnalyzerError> {
        (**self).embed(image)
    }
}

/// Decode an image file, sniffing the format from its content.
///
/// Registered files always carry a `.jpg` name regardless of what the client
/// uploaded, so the extension is not trusted.
pub fn load_image(path: &Path) -> Result<DynamicImage, AnalyzerError> {
    let io_err = |source| AnalyzerError::Io {
        path: path.to_path_buf(),
        source,
    };
    ImageReader::open(path)
        .map_err(io_err)?
        .with_guessed_format()
        .map_err(io_err)?
        .decode()
        .map_err(|source| AnalyzerError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

pub struct FaceAnalyzer<E> {
    embedder: E,
    model: FaceModel,
    metric: DistanceMetric,
    threshold: f32,
}

impl<E: Embedder> FaceAnalyzer<E> {
    /// Create an analyzer using the model's default threshold for `metric`.
    pub fn new(embedder: E, model: FaceModel, metric: DistanceMetric) -> Self {
        Self {
            embedder,
            model,
            metric,
            threshold: model.threshold(metric),
        }
    }

    /// Override the verification threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn model(&self) -> FaceModel {
        self.model
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Extract an embedding from an image file.
    pub fn represent(&mut self, image: &Path) -> Result<Embedding, AnalyzerError> {
        let decoded = load_image(image)?;
        let mut embedding = self.embedder.embed(&decoded)?;
        embedding.model.get_or_insert_with(|| self.model.name().to_string());
        Ok(embedding)
    }

    /// Compare two image files.
    pub fn verify(
        &mut self,
        query: &Path,
        reference: &Path,
    ) -> Result<Verification, AnalyzerError> {
        let query = self.represent(query)?;
        self.compare(&query, reference)
    }

    /// Compare a precomputed query embedding against a reference image file.
    pub fn compare(
        &mut self,
        query: &Embedding,
        reference: &Path,
    ) -> Result<Verification, AnalyzerError> {
        let reference = self.represent(reference)?;
        let distance = self.metric.distance(query, &reference);
        Ok(Verification {
            verified: distance <= self.threshold,
            distance,
            threshold: self.threshold,
            metric: self.metric,
        })
    }

    /// Search `gallery` for faces matching `query`, closest first.
    ///
    /// Only candidates within the threshold are returned. Gallery images that
    /// cannot be represented are skipped.
    pub fn find(
        &mut self,
        query: &Path,
        gallery: &[StoredFace],
    ) -> Result<Vec<Candidate>, AnalyzerError> {
        let query = self.represent(query)?;

        let mut candidates = Vec::new();
        for face in gallery {
            let reference = match self.represent(&face.path) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(
                        student_id = %face.id,
                        path = %face.path.display(),
                        error = %e,
                        "find: skipping unrepresentable gallery image"
                    );
                    continue;
                }
            };

            let distance = self.metric.distance(&query, &reference);
            if distance <= self.threshold {
                candidates.push(Candidate {
                    identity: face.id.to_string(),
                    path: face.path.clone(),
                    distance,
                });
            }
        }

        candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        tracing::debug!(
            gallery = gallery.len(),
            candidates = candidates.len(),
            "find: search complete"
        );
        Ok(candidates)
    }
}
