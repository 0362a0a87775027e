//! PlateScanner - license plate recognition
//!
//! Finds plate-shaped regions in a photograph, reads them with an OCR
//! engine and validates the text against known plate layouts.

pub mod config;
pub mod error;
pub mod plate;
pub mod recognizer;
pub mod storage;
pub mod vision;

pub use config::AppConfig;
pub use error::{Result, VisionError};
pub use recognizer::{PlateRecognizer, RecognitionResult, RecognitionStatus, ERROR_PLATE, UNKNOWN_PLATE};
