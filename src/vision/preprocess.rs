//! Image binarization for OCR
//!
//! Turns a color crop into a clean black/white image: grayscale, Gaussian
//! denoise, locally adaptive threshold, then a morphological close to mend
//! broken character strokes. Plate photos are unevenly lit, so the threshold
//! is always computed per pixel from its neighborhood.
//!
//! [`ImagePreprocessor::enhance`] is the contrast-first variant: histogram
//! equalization and an edge-preserving bilateral filter replace the blur and
//! closing steps.

use image::{GrayImage, Luma, RgbImage};
use imageproc::contrast::equalize_histogram;
use imageproc::distance_transform::Norm;
use imageproc::filter::separable_filter_equal;
use imageproc::morphology;
use tracing::debug;

use crate::config::PreprocessSettings;
use crate::error::{Result, VisionError};
use crate::vision::to_grayscale;

/// Bilateral filter window (pixels)
pub const BILATERAL_WINDOW: u32 = 9;

/// Bilateral filter intensity sigma
pub const BILATERAL_SIGMA_COLOR: f32 = 75.0;

/// Bilateral filter spatial sigma
pub const BILATERAL_SIGMA_SPATIAL: f32 = 75.0;

/// Binarizes images before they are handed to the OCR engine
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    settings: PreprocessSettings,
    available: bool,
}

impl ImagePreprocessor {
    /// Create a preprocessor, validating kernel sizes
    pub fn new(settings: PreprocessSettings) -> Result<Self> {
        if settings.blur_kernel == 0 || settings.blur_kernel % 2 == 0 {
            return Err(VisionError::InvalidConfig(format!(
                "blur kernel must be odd, got {}",
                settings.blur_kernel
            )));
        }
        if settings.threshold_block_size < 3 || settings.threshold_block_size % 2 == 0 {
            return Err(VisionError::InvalidConfig(format!(
                "threshold block size must be odd and >= 3, got {}",
                settings.threshold_block_size
            )));
        }
        if settings.morph_kernel == 0 || settings.morph_kernel % 2 == 0 {
            return Err(VisionError::InvalidConfig(format!(
                "morphology kernel must be odd, got {}",
                settings.morph_kernel
            )));
        }

        Ok(Self {
            settings,
            available: true,
        })
    }

    /// A preprocessor for degraded mode; every call fails with `CapabilityUnavailable`
    pub fn unavailable(settings: PreprocessSettings) -> Self {
        Self {
            settings,
            available: false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn settings(&self) -> &PreprocessSettings {
        &self.settings
    }

    /// Produce a binary (0/255) image ready for OCR
    pub fn preprocess(&self, image: &RgbImage) -> Result<GrayImage> {
        if !self.available {
            return Err(VisionError::CapabilityUnavailable(
                "image preprocessing is disabled".to_string(),
            ));
        }

        let (width, height) = image.dimensions();
        debug!(
            "Binarizing {}x{} image (blur={}, block={}, offset={}, morph={})",
            width,
            height,
            self.settings.blur_kernel,
            self.settings.threshold_block_size,
            self.settings.threshold_offset,
            self.settings.morph_kernel
        );

        let gray = to_grayscale(image);
        let blurred = gaussian_blur(&gray, self.settings.blur_kernel);
        let binary = adaptive_threshold_gaussian(
            &blurred,
            self.settings.threshold_block_size,
            self.settings.threshold_offset,
        );

        Ok(close(&binary, self.settings.morph_kernel))
    }

    /// Contrast-enhancing binarization: equalize, bilateral filter, adaptive threshold
    pub fn enhance(&self, image: &RgbImage) -> Result<GrayImage> {
        if !self.available {
            return Err(VisionError::CapabilityUnavailable(
                "image preprocessing is disabled".to_string(),
            ));
        }

        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(VisionError::Decode("cannot enhance an empty image".to_string()));
        }
        debug!(
            "Enhancing {}x{} image (block={}, offset={})",
            width, height, self.settings.threshold_block_size, self.settings.threshold_offset
        );

        let equalized = equalize_histogram(&to_grayscale(image));
        let filtered = bilateral_filter(
            &equalized,
            BILATERAL_WINDOW,
            BILATERAL_SIGMA_COLOR,
            BILATERAL_SIGMA_SPATIAL,
        );

        Ok(adaptive_threshold_gaussian(
            &filtered,
            self.settings.threshold_block_size,
            self.settings.threshold_offset,
        ))
    }

    /// Binarize with the pipeline selected by `settings.enhance`
    pub fn prepare(&self, image: &RgbImage) -> Result<GrayImage> {
        if self.settings.enhance {
            self.enhance(image)
        } else {
            self.preprocess(image)
        }
    }
}

/// Edge-preserving smoothing over a square window
///
/// Each neighbor is weighted by its spatial distance and by its intensity
/// difference to the center pixel. Coordinates are clamped at the border.
pub fn bilateral_filter(image: &GrayImage, window: u32, sigma_color: f32, sigma_spatial: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    let radius = (window / 2) as i64;
    if radius == 0 || width == 0 || height == 0 {
        return image.clone();
    }

    let color_weights: Vec<f32> = (0..256)
        .map(|d| (-((d * d) as f32) / (2.0 * sigma_color * sigma_color)).exp())
        .collect();
    let spatial_weights: Vec<f32> = (-radius..=radius)
        .flat_map(|dy| (-radius..=radius).map(move |dx| (dx, dy)))
        .map(|(dx, dy)| (-((dx * dx + dy * dy) as f32) / (2.0 * sigma_spatial * sigma_spatial)).exp())
        .collect();

    let max_x = width as i64 - 1;
    let max_y = height as i64 - 1;

    GrayImage::from_fn(width, height, |x, y| {
        let center = image.get_pixel(x, y).0[0] as i32;
        let mut weighted = 0.0f32;
        let mut total = 0.0f32;

        for (i, dy) in (-radius..=radius).enumerate() {
            let ny = (y as i64 + dy).clamp(0, max_y) as u32;
            for (j, dx) in (-radius..=radius).enumerate() {
                let nx = (x as i64 + dx).clamp(0, max_x) as u32;
                let value = image.get_pixel(nx, ny).0[0] as i32;
                let weight = spatial_weights[i * (2 * radius as usize + 1) + j]
                    * color_weights[(value - center).unsigned_abs() as usize];
                weighted += weight * value as f32;
                total += weight;
            }
        }

        Luma([(weighted / total).round().clamp(0.0, 255.0) as u8])
    })
}

/// Sigma derived from kernel size, as OpenCV does when sigma is left at 0
pub fn sigma_for_kernel(size: u32) -> f32 {
    0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Normalized 1D Gaussian kernel of the given (odd) size
pub fn gaussian_kernel(size: u32) -> Vec<f32> {
    let size = size.max(1) as i32;
    let sigma = sigma_for_kernel(size as u32);
    let half = size / 2;

    let weights: Vec<f32> = (-half..=half)
        .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f32 = weights.iter().sum();

    weights.into_iter().map(|w| w / sum).collect()
}

/// Gaussian blur with a fixed square kernel
pub fn gaussian_blur(image: &GrayImage, kernel_size: u32) -> GrayImage {
    if kernel_size <= 1 {
        return image.clone();
    }
    separable_filter_equal(image, &gaussian_kernel(kernel_size))
}

/// Gaussian-weighted adaptive threshold: white where `pixel > local_mean - offset`
pub fn adaptive_threshold_gaussian(image: &GrayImage, block_size: u32, offset: i32) -> GrayImage {
    let local_mean = gaussian_blur(image, block_size);
    let (width, height) = image.dimensions();

    GrayImage::from_fn(width, height, |x, y| {
        let value = image.get_pixel(x, y).0[0] as i32;
        let threshold = local_mean.get_pixel(x, y).0[0] as i32 - offset;
        if value > threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Morphological close (dilate then erode) with a square structuring element
pub fn close(image: &GrayImage, kernel_size: u32) -> GrayImage {
    let radius = (kernel_size / 2).min(u8::MAX as u32) as u8;
    if radius == 0 {
        return image.clone();
    }
    morphology::close(image, Norm::LInf, radius)
}
