use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Bounding box for a detected face, in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Face embedding vector produced by a recognition model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding (e.g., "Facenet").
    pub model: Option<String>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Euclidean distance between the raw vectors.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Copy of this embedding scaled to unit L2 norm. Zero vectors are returned unchanged.
    pub fn l2_normalized(&self) -> Embedding {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            self.values.iter().map(|x| x / norm).collect()
        } else {
            self.values.clone()
        };
        Embedding {
            values,
            model: self.model.clone(),
        }
    }
}

/// Distance measure between two embeddings. Lower = closer for every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 - cosine_similarity`, in [0, 2].
    #[default]
    Cosine,
    Euclidean,
    /// Euclidean distance over L2-normalized vectors, in [0, 2].
    EuclideanL2,
}

impl DistanceMetric {
    pub fn distance(self, a: &Embedding, b: &Embedding) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - a.similarity(b),
            DistanceMetric::Euclidean => a.euclidean_distance(b),
            DistanceMetric::EuclideanL2 => a.l2_normalized().euclidean_distance(&b.l2_normalized()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::EuclideanL2 => "euclidean_l2",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" => Ok(DistanceMetric::Euclidean),
            "euclidean_l2" => Ok(DistanceMetric::EuclideanL2),
            other => Err(format!("unknown distance metric: {other}")),
        }
    }
}

/// Recognition model presets: input geometry, normalization and verification thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FaceModel {
    #[default]
    Facenet,
    Facenet512,
    ArcFace,
}

impl FaceModel {
    pub fn name(self) -> &'static str {
        match self {
            FaceModel::Facenet => "Facenet",
            FaceModel::Facenet512 => "Facenet512",
            FaceModel::ArcFace => "ArcFace",
        }
    }

    /// Square input edge in pixels.
    pub fn input_size(self) -> usize {
        match self {
            FaceModel::Facenet | FaceModel::Facenet512 => 160,
            FaceModel::ArcFace => 112,
        }
    }

    pub fn embedding_dim(self) -> usize {
        match self {
            FaceModel::Facenet => 128,
            FaceModel::Facenet512 | FaceModel::ArcFace => 512,
        }
    }

    /// Per-channel `(mean, std)` applied as `(pixel - mean) / std`.
    pub fn normalization(self) -> (f32, f32) {
        match self {
            FaceModel::Facenet | FaceModel::Facenet512 => (127.5, 128.0),
            FaceModel::ArcFace => (127.5, 127.5),
        }
    }

    /// Default distance at or below which two faces are the same person.
    pub fn threshold(self, metric: DistanceMetric) -> f32 {
        match (self, metric) {
            (FaceModel::Facenet, DistanceMetric::Cosine) => 0.40,
            (FaceModel::Facenet, DistanceMetric::Euclidean) => 10.0,
            (FaceModel::Facenet, DistanceMetric::EuclideanL2) => 0.80,
            (FaceModel::Facenet512, DistanceMetric::Cosine) => 0.30,
            (FaceModel::Facenet512, DistanceMetric::Euclidean) => 23.56,
            (FaceModel::Facenet512, DistanceMetric::EuclideanL2) => 1.04,
            (FaceModel::ArcFace, DistanceMetric::Cosine) => 0.68,
            (FaceModel::ArcFace, DistanceMetric::Euclidean) => 4.15,
            (FaceModel::ArcFace, DistanceMetric::EuclideanL2) => 1.13,
        }
    }
}

impl fmt::Display for FaceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FaceModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "facenet" => Ok(FaceModel::Facenet),
            "facenet512" => Ok(FaceModel::Facenet512),
            "arcface" => Ok(FaceModel::ArcFace),
            other => Err(format!("unknown face model: {other}")),
        }
    }
}

/// Outcome of comparing a query against one reference image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verification {
    pub verified: bool,
    pub distance: f32,
    pub threshold: f32,
    pub metric: DistanceMetric,
}

/// A gallery face that passed the threshold during a search.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Identity of the matched record (the student identifier).
    pub identity: String,
    pub path: PathBuf,
    pub distance: f32,
}
