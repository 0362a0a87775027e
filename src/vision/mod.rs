//! Vision/OCR Layer
//!
//! Locates plate-shaped regions in a photograph and reads text from them.
//! - `preprocess`: grayscale / blur / adaptive threshold / closing
//! - `detection`: Canny + contour region proposals
//! - `ocr`: OCR capability interface and text extraction
//! - `paddle`: PaddleOCR via ONNX Runtime, the bundled OCR engine

pub mod debug;
pub mod detection;
pub mod models;
pub mod ocr;
pub mod paddle;
pub mod preprocess;
pub mod tensor;

use base64::Engine as _;
use image::{DynamicImage, GrayImage, Luma, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VisionError};

pub use debug::{render_regions, save_debug_image};
pub use detection::RegionDetector;
pub use models::{ModelManager, ModelType, OnnxSession};
pub use ocr::{OcrCapability, TextDetector, TextExtractor, TextFragment};
pub use paddle::PaddleOcrEngine;
pub use preprocess::ImagePreprocessor;

/// Axis-aligned rectangle in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Create a region, rejecting empty rectangles
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Option<Self> {
        (width > 0 && height > 0).then_some(Self { x, y, width, height })
    }

    /// Region covering a whole image
    pub fn full(width: u32, height: u32) -> Option<Self> {
        Self::new(0, 0, width, height)
    }

    /// Width / height
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether the rectangle is non-empty and lies inside an image of the given size
    pub fn fits_within(&self, image_width: u32, image_height: u32) -> bool {
        let right = self.x.checked_add(self.width);
        let bottom = self.y.checked_add(self.height);
        self.width > 0
            && self.height > 0
            && matches!(right, Some(r) if r <= image_width)
            && matches!(bottom, Some(b) if b <= image_height)
    }

    /// Get bounding box as (x, y, width, height)
    pub fn bounds(&self) -> (u32, u32, u32, u32) {
        (self.x, self.y, self.width, self.height)
    }
}

/// Copy a region out of an image
pub fn crop_region(image: &RgbImage, region: Region) -> Result<RgbImage> {
    let (width, height) = image.dimensions();
    if !region.fits_within(width, height) {
        return Err(VisionError::InvalidRegion {
            region,
            image_width: width,
            image_height: height,
        });
    }

    Ok(image::imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image())
}

/// Convert RGB to single-channel grayscale with BT.601 luma weights
pub fn to_grayscale(image: &RgbImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut gray = GrayImage::new(width, height);

    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        gray.put_pixel(x, y, Luma([luma.round().clamp(0.0, 255.0) as u8]));
    }

    gray
}

/// Decode base64 image text, tolerating a `data:<mime>;base64,` prefix and line breaks
pub fn decode_base64(input: &str) -> Result<Vec<u8>> {
    let payload = match input.trim_start().strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| VisionError::Decode("data URL without payload".to_string()))?,
        None => input,
    };

    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();

    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| VisionError::Decode(format!("invalid base64: {}", e)))
}

/// Decode encoded image bytes (JPEG, PNG, ...) into a raster image
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(VisionError::Decode("empty image data".to_string()));
    }

    image::load_from_memory(bytes).map_err(|e| VisionError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::Cursor;

    fn encode_png(image: &RgbImage) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_region_rejects_empty() {
        assert!(Region::new(0, 0, 0, 10).is_none());
        assert!(Region::new(0, 0, 10, 0).is_none());
        assert!(Region::new(5, 5, 10, 4).is_some());
    }

    #[test]
    fn test_region_fits_within() {
        let region = Region::new(10, 10, 20, 5).unwrap();
        assert!(region.fits_within(30, 15));
        assert!(!region.fits_within(29, 15));
        assert!(!region.fits_within(30, 14));

        let overflowing = Region { x: u32::MAX, y: 0, width: 2, height: 2 };
        assert!(!overflowing.fits_within(u32::MAX, 10));
    }

    #[test]
    fn test_region_aspect_ratio() {
        let region = Region::new(0, 0, 250, 100).unwrap();
        assert_eq!(region.aspect_ratio(), 2.5);
        assert_eq!(region.area(), 25_000);
    }

    #[test]
    fn test_crop_region() {
        let mut image = RgbImage::new(10, 10);
        image.put_pixel(3, 4, Rgb([255, 0, 0]));

        let cropped = crop_region(&image, Region::new(3, 4, 2, 2).unwrap()).unwrap();
        assert_eq!(cropped.dimensions(), (2, 2));
        assert_eq!(cropped.get_pixel(0, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_crop_region_out_of_bounds() {
        let image = RgbImage::new(10, 10);
        let result = crop_region(&image, Region::new(8, 8, 5, 5).unwrap());
        assert!(matches!(result, Err(VisionError::InvalidRegion { .. })));
    }

    #[test]
    fn test_to_grayscale() {
        let mut image = RgbImage::new(3, 1);
        image.put_pixel(0, 0, Rgb([0, 0, 255]));
        image.put_pixel(1, 0, Rgb([0, 255, 0]));
        image.put_pixel(2, 0, Rgb([255, 255, 255]));

        let gray = to_grayscale(&image);

        assert!(gray.get_pixel(1, 0).0[0] > gray.get_pixel(0, 0).0[0], "Green should be brighter than blue");
        assert_eq!(gray.get_pixel(2, 0).0[0], 255);
    }

    #[test]
    fn test_decode_base64_with_data_url() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"plate");
        let data_url = format!("data:image/png;base64,{}", encoded);

        assert_eq!(decode_base64(&encoded).unwrap(), b"plate");
        assert_eq!(decode_base64(&data_url).unwrap(), b"plate");
    }

    #[test]
    fn test_decode_base64_ignores_line_breaks() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"license plate bytes");
        let (head, tail) = encoded.split_at(8);
        let wrapped = format!("{}\n{}\r\n", head, tail);

        assert_eq!(decode_base64(&wrapped).unwrap(), b"license plate bytes");
    }

    #[test]
    fn test_decode_base64_invalid() {
        assert!(matches!(decode_base64("***not base64***"), Err(VisionError::Decode(_))));
        assert!(matches!(decode_base64("data:image/png;base64"), Err(VisionError::Decode(_))));
    }

    #[test]
    fn test_decode_image_roundtrip() {
        let image = RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]));
        let decoded = decode_image(&encode_png(&image)).unwrap();

        assert_eq!(decoded.width(), 4);
        assert_eq!(decoded.height(), 3);
    }

    #[test]
    fn test_decode_image_rejects_garbage() {
        assert!(matches!(decode_image(b"definitely not an image"), Err(VisionError::Decode(_))));
        assert!(matches!(decode_image(&[]), Err(VisionError::Decode(_))));
    }
}
