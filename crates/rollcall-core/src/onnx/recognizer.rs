//! Face recognition model via ONNX Runtime.
//!
//! Pads a face crop to a square, resizes it to the preset's input edge and
//! returns the raw embedding. Normalization for comparison is left to the
//! distance metric.

use crate::analyzer::AnalyzerError;
use crate::types::{Embedding, FaceModel};
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Memory layout the recognition model expects for its image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// 1×3×H×W (InsightFace / PyTorch exports).
    #[default]
    Nchw,
    /// 1×H×W×3 (Keras exports).
    Nhwc,
}

pub struct FaceRecognizer {
    session: Session,
    model: FaceModel,
    layout: TensorLayout,
}

impl FaceRecognizer {
    pub fn load(
        model_path: &Path,
        model: FaceModel,
        layout: TensorLayout,
    ) -> Result<Self, AnalyzerError> {
        if !model_path.exists() {
            return Err(AnalyzerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            model = %model,
            ?layout,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded recognition model"
        );

        Ok(Self { session, model, layout })
    }

    /// Extract an embedding from a face crop.
    pub fn extract(&mut self, face: &RgbImage) -> Result<Embedding, AnalyzerError> {
        let input = preprocess(face, self.model, self.layout);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AnalyzerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let expected = self.model.embedding_dim();
        if raw.len() != expected {
            return Err(AnalyzerError::InferenceFailed(format!(
                "expected {expected}-dim embedding from {}, got {}",
                self.model,
                raw.len()
            )));
        }

        Ok(Embedding {
            values: raw.to_vec(),
            model: Some(self.model.name().to_string()),
        })
    }
}

/// Centre `face` on a black square canvas, keeping its aspect ratio.
fn pad_to_square(face: &RgbImage, edge: u32) -> RgbImage {
    let scale = (edge as f32 / face.width() as f32).min(edge as f32 / face.height() as f32);
    let w = ((face.width() as f32 * scale).round() as u32).clamp(1, edge);
    let h = ((face.height() as f32 * scale).round() as u32).clamp(1, edge);
    let resized = image::imageops::resize(face, w, h, FilterType::Triangle);

    let mut canvas = RgbImage::from_pixel(edge, edge, Rgb([0, 0, 0]));
    let (x, y) = (((edge - w) / 2) as i64, ((edge - h) / 2) as i64);
    image::imageops::overlay(&mut canvas, &resized, x, y);
    canvas
}

fn preprocess(face: &RgbImage, model: FaceModel, layout: TensorLayout) -> Array4<f32> {
    let size = model.input_size();
    let (mean, std) = model.normalization();
    let square = pad_to_square(face, size as u32);

    let mut tensor = match layout {
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, size, size)),
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, size, size, 3)),
    };
    for (x, y, px) in square.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let v = (px.0[c] as f32 - mean) / std;
            match layout {
                TensorLayout::Nchw => tensor[[0, c, y, x]] = v,
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = v,
            }
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_shapes() {
        let face = RgbImage::from_pixel(50, 80, Rgb([10, 20, 30]));
        let nchw = preprocess(&face, FaceModel::Facenet, TensorLayout::Nchw);
        assert_eq!(nchw.shape(), &[1, 3, 160, 160]);
        let nhwc = preprocess(&face, FaceModel::ArcFace, TensorLayout::Nhwc);
        assert_eq!(nhwc.shape(), &[1, 112, 112, 3]);
    }

    #[test]
    fn test_preprocess_normalization_and_channel_order() {
        let face = RgbImage::from_pixel(160, 160, Rgb([255, 0, 128]));
        let t = preprocess(&face, FaceModel::ArcFace, TensorLayout::Nchw);
        let (mean, std) = FaceModel::ArcFace.normalization();
        assert!((t[[0, 0, 56, 56]] - (255.0 - mean) / std).abs() < 0.02);
        assert!((t[[0, 1, 56, 56]] - (0.0 - mean) / std).abs() < 0.02);
        assert!((t[[0, 2, 56, 56]] - (128.0 - mean) / std).abs() < 0.02);
    }

    #[test]
    fn test_pad_to_square_centres_tall_crop() {
        let face = RgbImage::from_pixel(40, 80, Rgb([255, 255, 255]));
        let square = pad_to_square(&face, 160);
        assert_eq!(square.dimensions(), (160, 160));
        // 80×160 content centred horizontally: columns 40..120.
        assert_eq!(square.get_pixel(10, 80).0, [0, 0, 0]);
        assert_eq!(square.get_pixel(80, 80).0, [255, 255, 255]);
        assert_eq!(square.get_pixel(150, 80).0, [0, 0, 0]);
    }
}
