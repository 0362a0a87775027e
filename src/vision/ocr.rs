//! OCR (Optical Character Recognition) module
//!
//! The OCR engine is an injected capability behind [`TextDetector`]. It is
//! built once per process and shared read-only between concurrent
//! recognitions; [`TextExtractor`] crops, binarizes and hands images to it.

use image::{DynamicImage, RgbImage};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::vision::preprocess::ImagePreprocessor;
use crate::vision::{crop_region, Region};

/// Single text fragment reported by an OCR engine
#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    /// Recognized text
    pub text: String,
    /// Engine-reported score (0.0 - 1.0), if the engine exposes one
    pub score: Option<f32>,
    /// Location of the fragment in the image it was detected in
    pub bounds: Option<Region>,
}

impl TextFragment {
    /// Fragment with text only
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            score: None,
            bounds: None,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_bounds(mut self, bounds: Region) -> Self {
        self.bounds = Some(bounds);
        self
    }
}

/// OCR engine interface
///
/// Implementations return fragments in reading order (top-to-bottom,
/// left-to-right) and must be safe to call from several threads at once.
pub trait TextDetector: Send + Sync {
    /// Detect and recognize all text in an image
    fn detect_text(&self, image: &DynamicImage) -> Result<Vec<TextFragment>>;

    /// Engine name for logs
    fn name(&self) -> &str {
        "ocr"
    }
}

/// Whether an OCR engine is present, decided once at startup
#[derive(Clone)]
pub enum OcrCapability {
    /// Engine loaded and shared
    Enabled(Arc<dyn TextDetector>),
    /// Running without OCR; the reason is kept for logs
    Disabled { reason: String },
}

impl OcrCapability {
    pub fn enabled(engine: Arc<dyn TextDetector>) -> Self {
        Self::Enabled(engine)
    }

    pub fn disabled(reason: impl Into<String>) -> Self {
        Self::Disabled {
            reason: reason.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    pub fn engine(&self) -> Option<&Arc<dyn TextDetector>> {
        match self {
            Self::Enabled(engine) => Some(engine),
            Self::Disabled { .. } => None,
        }
    }
}

impl std::fmt::Debug for OcrCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enabled(engine) => f.debug_tuple("Enabled").field(&engine.name()).finish(),
            Self::Disabled { reason } => f.debug_struct("Disabled").field("reason", reason).finish(),
        }
    }
}

/// Reads text out of image regions
#[derive(Debug, Clone)]
pub struct TextExtractor {
    preprocessor: ImagePreprocessor,
    capability: OcrCapability,
}

impl TextExtractor {
    pub fn new(preprocessor: ImagePreprocessor, capability: OcrCapability) -> Self {
        Self {
            preprocessor,
            capability,
        }
    }

    pub fn capability(&self) -> &OcrCapability {
        &self.capability
    }

    pub fn preprocessor(&self) -> &ImagePreprocessor {
        &self.preprocessor
    }

    /// Raw engine fragments for a region (or the whole image when `region` is `None`)
    ///
    /// Returns an empty list when OCR is disabled.
    pub fn fragments(&self, image: &RgbImage, region: Option<Region>) -> Result<Vec<TextFragment>> {
        let Some(engine) = self.capability.engine() else {
            return Ok(vec![]);
        };

        let binary = match region {
            Some(region) => self.preprocessor.prepare(&crop_region(image, region)?)?,
            None => self.preprocessor.prepare(image)?,
        };

        let fragments = engine.detect_text(&DynamicImage::ImageLuma8(binary))?;

        debug!(
            "{} returned {} fragments for {:?}",
            engine.name(),
            fragments.len(),
            region.map(|r| r.bounds())
        );

        Ok(fragments)
    }

    /// All fragment texts joined with single spaces, in engine order
    ///
    /// Empty when OCR is disabled or nothing was read; absence of text is a
    /// normal outcome, not an error.
    pub fn extract(&self, image: &RgbImage, region: Option<Region>) -> Result<String> {
        let fragments = self.fragments(image, region)?;
        Ok(join_fragments(&fragments))
    }
}

/// Join fragment texts with a single space and trim the result
pub fn join_fragments(fragments: &[TextFragment]) -> String {
    fragments
        .iter()
        .map(|f| f.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}
