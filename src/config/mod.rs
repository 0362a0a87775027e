//! Application Configuration
//!
//! Pipeline tuning (thresholds, kernel sizes, plate grammars) and OCR engine
//! settings stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable that switches the OCR capability off
pub const DISABLE_OCR_ENV: &str = "DISABLE_OCR";

/// Accepted plate layouts, in precedence order
pub const DEFAULT_PLATE_FORMATS: [&str; 5] = [
    r"^[A-Z]{2,3}\s?\d{3,4}\s?[A-Z]{1,2}$",
    r"^[A-Z]{2,3}\d{3,4}[A-Z]{1,2}$",
    r"^[A-Z]{2,3}\s\d{3,4}\s[A-Z]{1,2}$",
    r"^[A-Z]{2,3}\d{3,4}$",
    r"^[A-Z]{2,3}\s\d{3,4}$",
];

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// OCR engine settings
    pub ocr: OcrSettings,
    /// Binarization settings used before OCR
    pub preprocessing: PreprocessSettings,
    /// Plate region proposal settings
    pub detection: DetectionSettings,
    /// Plate grammar settings
    pub plate: PlateSettings,
}

/// OCR engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Capability flag; when false the pipeline runs in degraded mode
    pub enabled: bool,
    /// Directory holding det.onnx / rec.onnx / dict.txt (defaults to the data dir)
    pub models_dir: Option<PathBuf>,
    /// Probability threshold for the text detection map (0.0 - 1.0)
    pub detection_threshold: f32,
    /// Minimum mean probability for a detected text box (0.0 - 1.0)
    pub box_threshold: f32,
    /// How far detected text boxes are grown before recognition
    pub unclip_ratio: f32,
    /// Longest side of the image fed to the detection model
    pub det_target_size: u32,
    /// Maximum width of a text line fed to the recognition model
    pub rec_max_width: u32,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            models_dir: None,
            detection_threshold: 0.3,
            box_threshold: 0.6,
            unclip_ratio: 1.5,
            det_target_size: 960,
            rec_max_width: 640,
            intra_threads: 4,
        }
    }
}

/// Binarization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessSettings {
    /// Gaussian blur kernel size (odd)
    pub blur_kernel: u32,
    /// Adaptive threshold neighborhood size (odd, >= 3)
    pub threshold_block_size: u32,
    /// Constant subtracted from the local mean
    pub threshold_offset: i32,
    /// Closing structuring element size (odd)
    pub morph_kernel: u32,
    /// Use histogram equalization + bilateral filter instead of blur + close
    pub enhance: bool,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            blur_kernel: 5,
            threshold_block_size: 11,
            threshold_offset: 2,
            morph_kernel: 3,
            enhance: false,
        }
    }
}

/// Region proposal settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Canny low threshold
    pub canny_low: f32,
    /// Canny high threshold
    pub canny_high: f32,
    /// Contours with area at or below this are noise
    pub min_area: f64,
    /// Inclusive lower bound on width / height
    pub min_aspect_ratio: f64,
    /// Inclusive upper bound on width / height
    pub max_aspect_ratio: f64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            canny_low: 50.0,
            canny_high: 150.0,
            min_area: 1000.0,
            min_aspect_ratio: 2.5,
            max_aspect_ratio: 5.5,
        }
    }
}

/// Plate grammar settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateSettings {
    /// Regular expressions for accepted plate layouts, in precedence order
    pub formats: Vec<String>,
    /// Fall back to the first valid whitespace-separated token when the whole text fails
    pub match_tokens: bool,
}

impl Default for PlateSettings {
    fn default() -> Self {
        Self {
            formats: DEFAULT_PLATE_FORMATS.iter().map(|p| p.to_string()).collect(),
            match_tokens: false,
        }
    }
}

impl AppConfig {
    /// Check value ranges the pipeline relies on
    pub fn validate(&self) -> Result<()> {
        let pp = &self.preprocessing;
        if pp.blur_kernel == 0 || pp.blur_kernel % 2 == 0 {
            anyhow::bail!("preprocessing.blur_kernel must be odd, got {}", pp.blur_kernel);
        }
        if pp.threshold_block_size < 3 || pp.threshold_block_size % 2 == 0 {
            anyhow::bail!(
                "preprocessing.threshold_block_size must be odd and >= 3, got {}",
                pp.threshold_block_size
            );
        }
        if pp.morph_kernel == 0 || pp.morph_kernel % 2 == 0 {
            anyhow::bail!("preprocessing.morph_kernel must be odd, got {}", pp.morph_kernel);
        }

        let det = &self.detection;
        if det.canny_low > det.canny_high {
            anyhow::bail!(
                "detection.canny_low ({}) exceeds canny_high ({})",
                det.canny_low,
                det.canny_high
            );
        }
        if det.min_aspect_ratio <= 0.0 || det.min_aspect_ratio > det.max_aspect_ratio {
            anyhow::bail!(
                "detection aspect ratio range [{}, {}] is empty",
                det.min_aspect_ratio,
                det.max_aspect_ratio
            );
        }

        if self.plate.formats.is_empty() {
            anyhow::bail!("plate.formats must contain at least one pattern");
        }

        let ocr = &self.ocr;
        if !(0.0..=1.0).contains(&ocr.detection_threshold) || !(0.0..=1.0).contains(&ocr.box_threshold) {
            anyhow::bail!("ocr thresholds must lie in [0, 1]");
        }
        if ocr.det_target_size < 32 {
            anyhow::bail!("ocr.det_target_size must be at least 32, got {}", ocr.det_target_size);
        }

        Ok(())
    }

    /// Apply environment overrides (currently only `DISABLE_OCR`)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(DISABLE_OCR_ENV) {
            if env_flag_set(&value) {
                info!("OCR disabled via {} env var", DISABLE_OCR_ENV);
                self.ocr.enabled = false;
            }
        }
    }
}

/// Truthy values accepted for boolean environment flags
pub fn env_flag_set(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
