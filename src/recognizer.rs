//! End-to-end plate recognition
//!
//! [`PlateRecognizer`] ties the pipeline together: decode the image, propose
//! plate regions and read each one; if no region yields a valid plate, read
//! the whole image instead. Recognition never fails: faults collapse into the
//! `ERROR` sentinel and "nothing found" into `UNKNOWN`.

use image::{DynamicImage, RgbImage};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{AppConfig, OcrSettings};
use crate::error::Result;
use crate::plate::{evaluate, BestCandidate, Candidate, FormatValidator};
use crate::vision::{
    decode_base64, decode_image, ImagePreprocessor, OcrCapability, PaddleOcrEngine, Region, RegionDetector,
    TextExtractor,
};

/// Plate text reported when no valid plate was found
pub const UNKNOWN_PLATE: &str = "UNKNOWN";

/// Plate text reported when recognition failed
pub const ERROR_PLATE: &str = "ERROR";

/// Outcome class of a recognition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionStatus {
    Recognized,
    NotFound,
    Error,
}

/// Result of one recognition call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResult {
    /// Normalized plate text, or one of the sentinels
    pub plate_number: String,
    /// Length-based confidence (0.0 - 1.0); 0.0 for sentinels
    pub confidence: f32,
    /// Wall-clock seconds spent in the call
    pub processing_time: f64,
    pub status: RecognitionStatus,
}

impl RecognitionResult {
    fn recognized(candidate: Candidate, processing_time: f64) -> Self {
        Self {
            plate_number: candidate.text,
            confidence: candidate.confidence,
            processing_time,
            status: RecognitionStatus::Recognized,
        }
    }

    fn not_found(processing_time: f64) -> Self {
        Self {
            plate_number: UNKNOWN_PLATE.to_string(),
            confidence: 0.0,
            processing_time,
            status: RecognitionStatus::NotFound,
        }
    }

    fn error(processing_time: f64) -> Self {
        Self {
            plate_number: ERROR_PLATE.to_string(),
            confidence: 0.0,
            processing_time,
            status: RecognitionStatus::Error,
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.status == RecognitionStatus::Recognized
    }

    pub fn is_unknown(&self) -> bool {
        self.status == RecognitionStatus::NotFound
    }

    pub fn is_error(&self) -> bool {
        self.status == RecognitionStatus::Error
    }
}

/// License plate recognizer
///
/// Built once and shared; all state is read-only after construction.
#[derive(Debug)]
pub struct PlateRecognizer {
    detector: RegionDetector,
    extractor: TextExtractor,
    validator: FormatValidator,
    match_tokens: bool,
}

impl PlateRecognizer {
    /// Assemble a recognizer around an OCR capability
    ///
    /// Without OCR the imaging stages are switched off too, so every
    /// decodable image reports `UNKNOWN`.
    pub fn new(config: &AppConfig, capability: OcrCapability) -> Result<Self> {
        let validator = FormatValidator::new(config.plate.formats.as_slice())?;

        let (detector, preprocessor) = if capability.is_enabled() {
            (
                RegionDetector::new(config.detection.clone())?,
                ImagePreprocessor::new(config.preprocessing.clone())?,
            )
        } else {
            (
                RegionDetector::unavailable(config.detection.clone()),
                ImagePreprocessor::unavailable(config.preprocessing.clone()),
            )
        };

        info!(
            "Plate recognizer ready: ocr={:?}, {} plate formats, match_tokens={}",
            capability,
            validator.pattern_count(),
            config.plate.match_tokens
        );

        Ok(Self {
            detector,
            extractor: TextExtractor::new(preprocessor, capability),
            validator,
            match_tokens: config.plate.match_tokens,
        })
    }

    /// Build from configuration, applying `DISABLE_OCR` and loading the OCR models
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut config = config.clone();
        config.apply_env_overrides();

        let capability = build_capability(&config.ocr);
        Self::new(&config, capability)
    }

    pub fn detector(&self) -> &RegionDetector {
        &self.detector
    }

    pub fn extractor(&self) -> &TextExtractor {
        &self.extractor
    }

    pub fn validator(&self) -> &FormatValidator {
        &self.validator
    }

    pub fn ocr_enabled(&self) -> bool {
        self.extractor.capability().is_enabled()
    }

    /// Recognize a plate in base64-encoded image bytes
    pub fn recognize(&self, image_base64: &str) -> RecognitionResult {
        self.traced(|| {
            let bytes = decode_base64(image_base64)?;
            self.run(&decode_image(&bytes)?.to_rgb8())
        })
    }

    /// Recognize a plate in encoded image bytes (JPEG, PNG, ...)
    pub fn recognize_bytes(&self, bytes: &[u8]) -> RecognitionResult {
        self.traced(|| self.run(&decode_image(bytes)?.to_rgb8()))
    }

    /// Recognize a plate in an already decoded image
    pub fn recognize_image(&self, image: &DynamicImage) -> RecognitionResult {
        self.traced(|| self.run(&image.to_rgb8()))
    }

    /// Candidate plate regions in encoded image bytes
    pub fn detect_regions(&self, bytes: &[u8]) -> Result<Vec<Region>> {
        self.detector.detect(&decode_image(bytes)?.to_rgb8())
    }

    fn traced(&self, recognize: impl FnOnce() -> Result<Option<Candidate>>) -> RecognitionResult {
        let start = Instant::now();
        let request_id = Uuid::new_v4();
        let span = info_span!("recognize", %request_id);
        let _guard = span.enter();

        let outcome = recognize();
        let elapsed = start.elapsed().as_secs_f64();

        match outcome {
            Ok(Some(candidate)) => {
                info!(
                    "Recognized plate {} (confidence {:.2}) in {:.3}s",
                    candidate.text, candidate.confidence, elapsed
                );
                RecognitionResult::recognized(candidate, elapsed)
            }
            Ok(None) => {
                info!("No valid plate found in {:.3}s", elapsed);
                RecognitionResult::not_found(elapsed)
            }
            Err(e) if e.is_capability_unavailable() => {
                debug!("Recognition skipped: {}", e);
                RecognitionResult::not_found(elapsed)
            }
            Err(e) => {
                warn!("Plate recognition failed: {}", e);
                RecognitionResult::error(elapsed)
            }
        }
    }

    /// Region pass, then whole-image fallback
    fn run(&self, image: &RgbImage) -> Result<Option<Candidate>> {
        let regions = self.detector.detect(image)?;
        let mut best = BestCandidate::new();

        for region in &regions {
            let text = self.extractor.extract(image, Some(*region))?;
            self.consider(&text, &mut best);
        }

        if best.is_empty() {
            debug!("No plate in {} regions, reading whole image", regions.len());
            for fragment in self.extractor.fragments(image, None)? {
                self.consider(&fragment.text, &mut best);
            }
        }

        Ok(best.into_inner())
    }

    fn consider(&self, raw: &str, best: &mut BestCandidate) {
        match evaluate(raw, &self.validator, self.match_tokens) {
            Some(candidate) => {
                let text = candidate.text.clone();
                if best.offer(candidate) {
                    debug!("New best candidate {:?}", text);
                }
            }
            None if !raw.trim().is_empty() => debug!("Rejected OCR text {:?}", raw),
            None => {}
        }
    }
}

/// Decide the OCR capability once: disabled by configuration, or the loaded engine
///
/// A model loading failure downgrades to disabled instead of failing startup.
pub fn build_capability(settings: &OcrSettings) -> OcrCapability {
    if !settings.enabled {
        info!("OCR disabled; recognizer runs in degraded mode");
        return OcrCapability::disabled("disabled by configuration");
    }

    match PaddleOcrEngine::from_settings(settings) {
        Ok(engine) => OcrCapability::enabled(Arc::new(engine)),
        Err(e) => {
            warn!("Failed to load OCR engine, running without OCR: {:#}", e);
            OcrCapability::disabled(format!("engine failed to load: {:#}", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VisionError;
    use crate::vision::ocr::tests::{ScriptedDetector, SequencedDetector};
    use crate::vision::{TextDetector, TextFragment};
    use base64::Engine as _;
    use image::Rgb;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;
    use std::io::Cursor;

    struct BrokenEngine;

    impl TextDetector for BrokenEngine {
        fn detect_text(&self, _image: &DynamicImage) -> Result<Vec<TextFragment>> {
            Err(VisionError::Engine("session poisoned".to_string()))
        }
    }

    fn encode_png(image: &RgbImage) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn blank_png() -> Vec<u8> {
        encode_png(&RgbImage::from_pixel(120, 60, Rgb([128, 128, 128])))
    }

    /// Dark scene with one bright plate-shaped rectangle
    fn plate_scene() -> RgbImage {
        let mut image = RgbImage::from_pixel(400, 200, Rgb([40, 40, 40]));
        draw_filled_rect_mut(&mut image, Rect::at(80, 60).of_size(240, 70), Rgb([235, 235, 235]));
        draw_filled_rect_mut(&mut image, Rect::at(110, 85).of_size(12, 20), Rgb([20, 20, 20]));
        draw_filled_rect_mut(&mut image, Rect::at(140, 85).of_size(12, 20), Rgb([20, 20, 20]));
        image
    }

    /// Dark 600x300 scene with two separated plate-shaped rectangles
    fn two_plate_scene() -> RgbImage {
        let mut image = RgbImage::from_pixel(600, 300, Rgb([40, 40, 40]));
        draw_filled_rect_mut(&mut image, Rect::at(40, 40).of_size(240, 70), Rgb([235, 235, 235]));
        draw_filled_rect_mut(&mut image, Rect::at(320, 180).of_size(240, 70), Rgb([235, 235, 235]));
        image
    }

    fn recognizer_with(engine: Arc<dyn TextDetector>) -> PlateRecognizer {
        PlateRecognizer::new(&AppConfig::default(), OcrCapability::enabled(engine)).unwrap()
    }

    #[test]
    fn test_invalid_bytes_report_error() {
        let recognizer = recognizer_with(Arc::new(ScriptedDetector::new(&["AB1234"])));

        let result = recognizer.recognize_bytes(b"this is not an image");

        assert_eq!(result.plate_number, ERROR_PLATE);
        assert_eq!(result.confidence, 0.0);
        assert!(result.processing_time >= 0.0);
        assert!(result.is_error());
    }

    #[test]
    fn test_invalid_base64_reports_error() {
        let recognizer = recognizer_with(Arc::new(ScriptedDetector::new(&["AB1234"])));

        let result = recognizer.recognize("%%% definitely not base64 %%%");

        assert_eq!(result.plate_number, ERROR_PLATE);
        assert_eq!(result.status, RecognitionStatus::Error);
    }

    #[test]
    fn test_disabled_ocr_reports_unknown() {
        let recognizer = PlateRecognizer::new(&AppConfig::default(), OcrCapability::disabled("test")).unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode(encode_png(&plate_scene()));

        let result = recognizer.recognize(&encoded);

        assert!(!recognizer.ocr_enabled());
        assert_eq!(result.plate_number, UNKNOWN_PLATE);
        assert_eq!(result.confidence, 0.0);
        assert!(result.is_unknown());
    }

    #[test]
    fn test_disabled_ocr_still_reports_decode_errors() {
        let recognizer = PlateRecognizer::new(&AppConfig::default(), OcrCapability::disabled("test")).unwrap();

        assert!(recognizer.recognize_bytes(b"garbage").is_error());
    }

    #[test]
    fn test_recognizes_synthetic_plate() {
        let engine = Arc::new(ScriptedDetector::new(&["AB 1234 C"]));
        let recognizer = recognizer_with(engine.clone());
        let png = encode_png(&plate_scene());
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);

        let regions = recognizer.detect_regions(&png).unwrap();
        let result = recognizer.recognize(&encoded);

        assert_eq!(result.plate_number, "AB 1234 C");
        assert!(result.confidence > 0.0);
        assert!((result.confidence - 0.9).abs() < 1e-6);
        assert!(recognizer.validator().is_valid_format(&result.plate_number));

        // Region reads that succeed make the whole-image read unnecessary
        assert!(!regions.is_empty());
        let calls = engine.calls.lock();
        assert_eq!(calls.len(), regions.len());
        assert!(!calls.contains(&(400, 200)));
    }

    #[test]
    fn test_two_plate_scene_yields_two_regions_in_order() {
        let recognizer = recognizer_with(Arc::new(ScriptedDetector::new(&[])));

        let regions = recognizer.detect_regions(&encode_png(&two_plate_scene())).unwrap();

        assert_eq!(regions.len(), 2);
        assert!(regions[0].y < regions[1].y);
    }

    #[test]
    fn test_region_ties_keep_first_region() {
        let engine = Arc::new(SequencedDetector::new(&[&["AB1234"], &["CD5678"]]));
        let recognizer = recognizer_with(engine.clone());

        let result = recognizer.recognize_bytes(&encode_png(&two_plate_scene()));

        assert_eq!(result.plate_number, "AB1234");
        assert!((result.confidence - 0.6).abs() < 1e-6);
        // Both regions read, no whole-image pass
        let calls = engine.calls.lock();
        assert_eq!(calls.len(), 2);
        assert!(!calls.contains(&(600, 300)));
    }

    #[test]
    fn test_longer_plate_in_later_region_wins() {
        let engine = Arc::new(SequencedDetector::new(&[&["AB1234"], &["CD 5678 EF"]]));
        let recognizer = recognizer_with(engine);

        let result = recognizer.recognize_bytes(&encode_png(&two_plate_scene()));

        assert_eq!(result.plate_number, "CD 5678 EF");
    }

    #[test]
    fn test_invalid_region_texts_fall_back_to_whole_image() {
        let engine = Arc::new(SequencedDetector::new(&[&["xx"], &["HELLO"], &["xx", "GR 4521"]]));
        let recognizer = recognizer_with(engine.clone());

        let result = recognizer.recognize_bytes(&encode_png(&two_plate_scene()));

        assert_eq!(result.plate_number, "GR 4521");
        assert!((result.confidence - 0.7).abs() < 1e-6);
        let calls = engine.calls.lock();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls.last(), Some(&(600, 300)));
    }

    #[test]
    fn test_data_url_input() {
        let recognizer = recognizer_with(Arc::new(ScriptedDetector::new(&["XYZ 987"])));
        let encoded = base64::engine::general_purpose::STANDARD.encode(blank_png());

        let result = recognizer.recognize(&format!("data:image/png;base64,{}", encoded));

        assert_eq!(result.plate_number, "XYZ 987");
        assert!((result.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_fallback_normalizes_fragments() {
        let recognizer = recognizer_with(Arc::new(ScriptedDetector::new(&["  ab-1234 c  "])));

        let result = recognizer.recognize_bytes(&blank_png());

        assert_eq!(result.plate_number, "AB1234 C");
        assert!((result.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_ties_keep_first_candidate() {
        let recognizer = recognizer_with(Arc::new(ScriptedDetector::new(&["AB1234", "CD5678", "X"])));

        let result = recognizer.recognize_bytes(&blank_png());

        assert_eq!(result.plate_number, "AB1234");
        assert!((result.confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_longer_candidate_wins() {
        let recognizer = recognizer_with(Arc::new(ScriptedDetector::new(&["AB123", "hello", "AB 1234 C"])));

        let result = recognizer.recognize_bytes(&blank_png());

        assert_eq!(result.plate_number, "AB 1234 C");
    }

    #[test]
    fn test_no_valid_text_reports_unknown() {
        let recognizer = recognizer_with(Arc::new(ScriptedDetector::new(&["HELLO WORLD", "A1"])));

        let result = recognizer.recognize_bytes(&blank_png());

        assert_eq!(result.plate_number, UNKNOWN_PLATE);
        assert_eq!(result.status, RecognitionStatus::NotFound);
    }

    #[test]
    fn test_match_tokens_extracts_plate_from_noise() {
        let mut config = AppConfig::default();
        config.plate.match_tokens = true;
        let engine = Arc::new(ScriptedDetector::new(&["PARK AB1234 NOW"]));
        let recognizer = PlateRecognizer::new(&config, OcrCapability::enabled(engine.clone())).unwrap();

        let result = recognizer.recognize_bytes(&blank_png());
        assert_eq!(result.plate_number, "AB1234");

        let strict = recognizer_with(engine);
        assert!(strict.recognize_bytes(&blank_png()).is_unknown());
    }

    #[test]
    fn test_engine_failure_reports_error() {
        let recognizer = recognizer_with(Arc::new(BrokenEngine));

        let result = recognizer.recognize_bytes(&blank_png());

        assert!(result.is_error());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_recognize_image_entry_point() {
        let recognizer = recognizer_with(Arc::new(ScriptedDetector::new(&["KLM 4521"])));
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 20, Rgb([128, 128, 128])));

        assert_eq!(recognizer.recognize_image(&image).plate_number, "KLM 4521");
    }

    #[test]
    fn test_invalid_format_pattern_fails_construction() {
        let mut config = AppConfig::default();
        config.plate.formats = vec!["^[A-Z".to_string()];

        let result = PlateRecognizer::new(&config, OcrCapability::disabled("test"));
        assert!(matches!(result, Err(VisionError::InvalidPattern(_))));
    }

    #[test]
    fn test_inverted_canny_thresholds_fail_construction() {
        let mut config = AppConfig::default();
        config.detection.canny_low = 200.0;
        config.detection.canny_high = 100.0;
        let engine = Arc::new(ScriptedDetector::new(&["AB1234"]));

        let result = PlateRecognizer::new(&config, OcrCapability::enabled(engine));
        assert!(matches!(result, Err(VisionError::InvalidConfig(_))));
    }

    #[test]
    fn test_result_serializes_status() {
        let result = RecognitionResult::not_found(0.25);
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["plate_number"], "UNKNOWN");
        assert_eq!(json["status"], "not_found");
        assert_eq!(json["processing_time"], 0.25);
    }

    #[test]
    fn test_build_capability_respects_disabled_setting() {
        let settings = OcrSettings {
            enabled: false,
            ..Default::default()
        };

        assert!(!build_capability(&settings).is_enabled());
    }

    #[test]
    fn test_concurrent_recognitions_share_recognizer() {
        let recognizer = Arc::new(recognizer_with(Arc::new(ScriptedDetector::new(&["AB1234"]))));
        let png = Arc::new(blank_png());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let recognizer = Arc::clone(&recognizer);
                let png = Arc::clone(&png);
                std::thread::spawn(move || recognizer.recognize_bytes(&png))
            })
            .collect();

        for handle in handles {
            let result = handle.join().unwrap();
            assert_eq!(result.plate_number, "AB1234");
        }
    }
}
