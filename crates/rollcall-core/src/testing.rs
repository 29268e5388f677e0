//! Deterministic test doubles for code that needs an [`Embedder`] without ONNX models.
//!
//! Enabled for this crate's own tests and, for dependents, via the `test-util` feature.

use crate::analyzer::{AnalyzerError, Embedder};
use crate::types::Embedding;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::time::Duration;

const GRID: u32 = 4;

/// Embeds an image as its centred RGB colour over a 4×4 grid.
///
/// Images of similar colour land close under every metric, which is enough to
/// drive matching logic end to end.
pub struct GridEmbedder;

impl Embedder for GridEmbedder {
    fn embed(&mut self, image: &DynamicImage) -> Result<Embedding, AnalyzerError> {
        let small = image::imageops::resize(&image.to_rgb8(), GRID, GRID, FilterType::Triangle);
        let values = small
            .pixels()
            .flat_map(|p| p.0)
            .map(|c| c as f32 / 255.0 - 0.5)
            .collect();
        Ok(Embedding { values, model: None })
    }
}

/// [`GridEmbedder`] that sleeps for `delay` before every embedding.
pub struct SlowEmbedder {
    pub delay: Duration,
}

impl Embedder for SlowEmbedder {
    fn embed(&mut self, image: &DynamicImage) -> Result<Embedding, AnalyzerError> {
        std::thread::sleep(self.delay);
        GridEmbedder.embed(image)
    }
}

/// Encode a 32×32 single-colour JPEG.
pub fn solid_jpeg(rgb: [u8; 3]) -> Vec<u8> {
    encode(RgbImage::from_pixel(32, 32, Rgb(rgb)), ImageFormat::Jpeg)
}

/// Encode a 32×32 single-colour PNG.
pub fn solid_png(rgb: [u8; 3]) -> Vec<u8> {
    encode(RgbImage::from_pixel(32, 32, Rgb(rgb)), ImageFormat::Png)
}

fn encode(img: RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, format)
        .expect("in-memory encode cannot fail");
    buf.into_inner()
}
