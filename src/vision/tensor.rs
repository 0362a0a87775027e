//! Tensor preparation for the PaddleOCR models
//!
//! Converts images to normalized NCHW `f32` tensors: the detection model
//! takes the whole image scaled to a multiple of 32, the recognition model
//! takes one text line scaled to a fixed height.

use image::RgbImage;
use ndarray::{Array3, Array4};

use crate::vision::Region;

/// Recognition model input height
pub const REC_INPUT_HEIGHT: u32 = 48;

/// Tensor preparation settings
#[derive(Debug, Clone)]
pub struct TensorConfig {
    /// Longest side of the detection input
    pub det_target_size: u32,
    /// Target height for recognition model
    pub rec_target_height: u32,
    /// Maximum width for recognition
    pub rec_max_width: u32,
    /// Mean values for normalization [R, G, B]
    pub mean: [f32; 3],
    /// Std values for normalization [R, G, B]
    pub std: [f32; 3],
}

impl Default for TensorConfig {
    fn default() -> Self {
        Self {
            det_target_size: 960,
            rec_target_height: REC_INPUT_HEIGHT,
            rec_max_width: 640,
            // (pixel / 255 - 0.5) / 0.5 maps [0, 255] to [-1, 1]
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        }
    }
}

/// Detection input plus the factor mapping it back to the source image
#[derive(Debug, Clone)]
pub struct DetectionInput {
    pub tensor: Array4<f32>,
    /// Resized width / source width
    pub scale: f32,
    /// Width and height of the resized (unpadded) content
    pub content_size: (usize, usize),
}

/// Convert an RGB image to an HWC array in [0, 1]
pub fn rgb_to_f32(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut rgb = Array3::<f32>::zeros((height as usize, width as usize, 3));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            rgb[[y as usize, x as usize, c]] = pixel.0[c] as f32 / 255.0;
        }
    }

    rgb
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let mut normalized = image.clone();
    for ((_, _, c), value) in normalized.indexed_iter_mut() {
        *value = (*value - mean[c]) / std[c];
    }
    normalized
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));

    for ((y, x, ch), &value) in image.indexed_iter() {
        tensor[[0, ch, y, x]] = value;
    }

    tensor
}

/// Bilinear resize of an HWC array into a (possibly larger, zero-padded) canvas
fn resize_into(image: &Array3<f32>, new_h: usize, new_w: usize, canvas_h: usize, canvas_w: usize) -> Array3<f32> {
    let (h, w, c) = image.dim();
    let mut resized = Array3::<f32>::zeros((canvas_h, canvas_w, c));
    if h == 0 || w == 0 || new_h == 0 || new_w == 0 {
        return resized;
    }

    let scale_y = h as f32 / new_h as f32;
    let scale_x = w as f32 / new_w as f32;

    for y in 0..new_h.min(canvas_h) {
        let src_y = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (h - 1) as f32);
        let y0 = src_y.floor() as usize;
        let y1 = (y0 + 1).min(h - 1);
        let fy = src_y - y0 as f32;

        for x in 0..new_w.min(canvas_w) {
            let src_x = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (w - 1) as f32);
            let x0 = src_x.floor() as usize;
            let x1 = (x0 + 1).min(w - 1);
            let fx = src_x - x0 as f32;

            for ch in 0..c {
                let top = image[[y0, x0, ch]] * (1.0 - fx) + image[[y0, x1, ch]] * fx;
                let bottom = image[[y1, x0, ch]] * (1.0 - fx) + image[[y1, x1, ch]] * fx;
                resized[[y, x, ch]] = top * (1.0 - fy) + bottom * fy;
            }
        }
    }

    resized
}

/// Scale so the longer side equals `target_size`, then pad to multiples of 32
pub fn resize_for_detection(image: &Array3<f32>, target_size: u32) -> (Array3<f32>, f32, (usize, usize)) {
    let (h, w, _) = image.dim();
    let scale = target_size as f32 / h.max(w).max(1) as f32;
    let new_h = ((h as f32 * scale).round() as usize).max(1);
    let new_w = ((w as f32 * scale).round() as usize).max(1);

    let padded_h = new_h.div_ceil(32) * 32;
    let padded_w = new_w.div_ceil(32) * 32;

    (resize_into(image, new_h, new_w, padded_h, padded_w), scale, (new_w, new_h))
}

/// Scale a text line to a fixed height, capping the width
pub fn resize_for_recognition(image: &Array3<f32>, target_height: u32, max_width: u32) -> Array3<f32> {
    let (h, w, _) = image.dim();
    let scale = target_height as f32 / h.max(1) as f32;
    let new_w = ((w as f32 * scale).ceil() as u32).clamp(4, max_width.max(4)) as usize;
    let new_h = target_height as usize;

    resize_into(image, new_h, new_w, new_h, new_w)
}

/// Copy a rectangular region out of an HWC array, clamped to the image
pub fn crop(image: &Array3<f32>, region: Region) -> Option<Array3<f32>> {
    let (img_h, img_w, _) = image.dim();
    let x1 = (region.x as usize).min(img_w);
    let y1 = (region.y as usize).min(img_h);
    let x2 = (region.x as usize + region.width as usize).min(img_w);
    let y2 = (region.y as usize + region.height as usize).min(img_h);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    Some(image.slice(ndarray::s![y1..y2, x1..x2, ..]).to_owned())
}

/// Full preprocessing pipeline for detection
pub fn preprocess_for_detection(image: &RgbImage, config: &TensorConfig) -> DetectionInput {
    let rgb = rgb_to_f32(image);
    let (resized, scale, content_size) = resize_for_detection(&rgb, config.det_target_size);
    let normalized = normalize(&resized, &config.mean, &config.std);

    DetectionInput {
        tensor: hwc_to_nchw(&normalized),
        scale,
        content_size,
    }
}

/// Full preprocessing pipeline for recognition of one text line
pub fn preprocess_for_recognition(line: &Array3<f32>, config: &TensorConfig) -> Array4<f32> {
    let resized = resize_for_recognition(line, config.rec_target_height, config.rec_max_width);
    let normalized = normalize(&resized, &config.mean, &config.std);
    hwc_to_nchw(&normalized)
}
