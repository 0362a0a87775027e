//! Error types for the recognition pipeline
//!
//! Pipeline stages fail with precise kinds so they can be tested in
//! isolation. Only [`crate::recognizer::PlateRecognizer`] is total and folds
//! these into the `UNKNOWN` / `ERROR` sentinels.

use thiserror::Error;

use crate::vision::Region;

#[derive(Debug, Error)]
pub enum VisionError {
    /// Imaging or OCR backend switched off or not initialized
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// Input bytes are not valid base64 or not a raster image
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Region {region:?} lies outside the {image_width}x{image_height} image")]
    InvalidRegion {
        region: Region,
        image_width: u32,
        image_height: u32,
    },

    /// OCR engine inference failure
    #[error("OCR engine error: {0}")]
    Engine(String),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid plate format pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VisionError {
    /// Whether this error means "running without OCR" rather than a fault
    pub fn is_capability_unavailable(&self) -> bool {
        matches!(self, VisionError::CapabilityUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, VisionError>;
