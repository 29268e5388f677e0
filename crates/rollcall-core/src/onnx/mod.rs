//! ONNX-backed [`Embedder`]: optional SCRFD detection followed by a recognition model.

pub mod detector;
pub mod recognizer;

pub use detector::FaceDetector;
pub use recognizer::{FaceRecognizer, TensorLayout};

use crate::analyzer::{AnalyzerError, Embedder};
use crate::types::{BoundingBox, Embedding, FaceModel};
use image::{DynamicImage, RgbImage};
use std::path::PathBuf;

/// Fraction of the box size added on every side before cropping.
const CROP_MARGIN: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct OnnxConfig {
    pub model: FaceModel,
    pub recognizer_path: PathBuf,
    /// SCRFD model; `None` embeds the whole image without detection.
    pub detector_path: Option<PathBuf>,
    pub layout: TensorLayout,
}

pub struct OnnxEmbedder {
    detector: Option<FaceDetector>,
    recognizer: FaceRecognizer,
}

impl OnnxEmbedder {
    /// Load both models. Fails if either file is missing or unloadable.
    pub fn load(config: &OnnxConfig) -> Result<Self, AnalyzerError> {
        let detector = match &config.detector_path {
            Some(path) => Some(FaceDetector::load(path)?),
            None => {
                tracing::info!("face detection disabled; embedding whole images");
                None
            }
        };
        let recognizer =
            FaceRecognizer::load(&config.recognizer_path, config.model, config.layout)?;
        Ok(Self { detector, recognizer })
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&mut self, image: &DynamicImage) -> Result<Embedding, AnalyzerError> {
        let rgb = image.to_rgb8();
        let Some(detector) = self.detector.as_mut() else {
            return self.recognizer.extract(&rgb);
        };

        let faces = detector.detect(&rgb)?;
        let face = faces.first().ok_or(AnalyzerError::NoFaceDetected)?;
        tracing::debug!(confidence = face.confidence, count = faces.len(), "face selected");

        let crop = crop_face(&rgb, face).ok_or(AnalyzerError::NoFaceDetected)?;
        self.recognizer.extract(&crop)
    }
}

/// Crop `face` plus margin, clamped to `image`. `None` if nothing remains.
fn crop_face(image: &RgbImage, face: &BoundingBox) -> Option<RgbImage> {
    let mx = face.width * CROP_MARGIN;
    let my = face.height * CROP_MARGIN;
    let x1 = (face.x - mx).max(0.0) as u32;
    let y1 = (face.y - my).max(0.0) as u32;
    let x2 = ((face.x + face.width + mx).min(image.width() as f32)).max(0.0) as u32;
    let y2 = ((face.y + face.height + my).min(image.height() as f32)).max(0.0) as u32;
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(image::imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn bbox(x: f32, y: f32, width: f32, height: f32) -> BoundingBox {
        BoundingBox { x, y, width, height, confidence: 0.9 }
    }

    #[test]
    fn test_crop_adds_margin() {
        let img = RgbImage::from_pixel(200, 200, Rgb([1, 2, 3]));
        let crop = crop_face(&img, &bbox(50.0, 50.0, 100.0, 100.0)).unwrap();
        assert_eq!(crop.dimensions(), (120, 120));
    }

    #[test]
    fn test_crop_clamps_to_image() {
        let img = RgbImage::from_pixel(100, 100, Rgb([1, 2, 3]));
        let crop = crop_face(&img, &bbox(-20.0, 60.0, 60.0, 80.0)).unwrap();
        assert_eq!(crop.dimensions(), (46, 48));
    }

    #[test]
    fn test_crop_outside_image() {
        let img = RgbImage::from_pixel(100, 100, Rgb([1, 2, 3]));
        assert!(crop_face(&img, &bbox(150.0, 150.0, 20.0, 20.0)).is_none());
    }

    #[test]
    fn test_load_reports_missing_models() {
        let config = OnnxConfig {
            model: FaceModel::Facenet,
            recognizer_path: PathBuf::from("/nonexistent/facenet.onnx"),
            detector_path: None,
            layout: TensorLayout::Nchw,
        };
        let err = OnnxEmbedder::load(&config).err().unwrap();
        assert!(matches!(err, AnalyzerError::ModelNotFound(_)), "got {err:?}");
    }
}
