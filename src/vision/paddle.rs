//! PaddleOCR engine on ONNX Runtime
//!
//! Two models run per call: the DB detection network produces a text
//! probability map, which is binarized and turned into line boxes; each box
//! is then read by the CRNN recognition network and CTC-decoded against the
//! character dictionary.

use anyhow::Context;
use image::{DynamicImage, GrayImage, Luma};
use ndarray::{Array2, Array3, Array4, ArrayView2, Axis, Ix2, Ix4};
use ort::value::Value;
use parking_lot::Mutex;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::OcrSettings;
use crate::error::{Result, VisionError};
use crate::vision::detection::{bounding_rect, external_contours};
use crate::vision::models::{ModelManager, ModelType, OnnxSession};
use crate::vision::ocr::{TextDetector, TextFragment};
use crate::vision::tensor::{self, TensorConfig};
use crate::vision::Region;

/// Boxes whose tops differ by less than this many pixels share a text line
const SAME_LINE_TOLERANCE: u32 = 10;

/// Boxes thinner than this (in detection-map pixels) are noise
const MIN_BOX_SIDE: u32 = 3;

/// Post-processing settings for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub detection_threshold: f32,
    pub box_threshold: f32,
    pub unclip_ratio: f32,
    pub tensor: TensorConfig,
}

impl From<&OcrSettings> for EngineConfig {
    fn from(settings: &OcrSettings) -> Self {
        Self {
            detection_threshold: settings.detection_threshold,
            box_threshold: settings.box_threshold,
            unclip_ratio: settings.unclip_ratio,
            tensor: TensorConfig {
                det_target_size: settings.det_target_size,
                rec_max_width: settings.rec_max_width,
                ..Default::default()
            },
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&OcrSettings::default())
    }
}

/// Text box found on the detection map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedBox {
    pub region: Region,
    /// Mean text probability inside the box
    pub score: f32,
}

/// PaddleOCR detection + recognition
pub struct PaddleOcrEngine {
    detection: Mutex<OnnxSession>,
    recognition: Mutex<OnnxSession>,
    dictionary: Vec<char>,
    config: EngineConfig,
}

impl PaddleOcrEngine {
    /// Load models from the manager's directory, downloading missing files
    pub fn load(manager: &ModelManager, settings: &OcrSettings) -> anyhow::Result<Self> {
        let det_path = manager.ensure_model(ModelType::Detection)?;
        let rec_path = manager.ensure_model(ModelType::Recognition)?;
        let dict_path = manager.ensure_model(ModelType::Dictionary)?;

        let engine = Self {
            detection: Mutex::new(OnnxSession::new(&det_path, settings.intra_threads)?),
            recognition: Mutex::new(OnnxSession::new(&rec_path, settings.intra_threads)?),
            dictionary: load_dictionary(&dict_path)?,
            config: EngineConfig::from(settings),
        };

        info!(
            "PaddleOCR engine ready ({} dictionary entries, models in {:?})",
            engine.dictionary.len(),
            manager.models_dir()
        );

        Ok(engine)
    }

    /// Load models from the configured (or default) models directory
    pub fn from_settings(settings: &OcrSettings) -> anyhow::Result<Self> {
        let manager = ModelManager::from_setting(settings.models_dir.as_deref())?;
        Self::load(&manager, settings)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dictionary_size(&self) -> usize {
        self.dictionary.len()
    }

    /// Run the detection network and return the probability map
    fn probability_map(&self, input: Array4<f32>) -> Result<Array2<f32>> {
        let mut det = self.detection.lock();
        let input_name = det.primary_input().to_string();

        let value = Value::from_array(input).map_err(engine_error)?;
        let outputs = det
            .session_mut()
            .run(ort::inputs![input_name.as_str() => value])
            .map_err(engine_error)?;

        let map = outputs[0].try_extract_array::<f32>().map_err(engine_error)?;
        let map = map.into_dimensionality::<Ix4>().map_err(engine_error)?;

        let prob = map.index_axis(Axis(0), 0).index_axis(Axis(0), 0).to_owned();
        Ok(prob)
    }

    /// Run the recognition network on one text line
    fn recognize_line(&self, line: &Array3<f32>) -> Result<(String, f32)> {
        let input = tensor::preprocess_for_recognition(line, &self.config.tensor);

        let mut rec = self.recognition.lock();
        let input_name = rec.primary_input().to_string();

        let value = Value::from_array(input).map_err(engine_error)?;
        let outputs = rec
            .session_mut()
            .run(ort::inputs![input_name.as_str() => value])
            .map_err(engine_error)?;

        let logits = outputs[0].try_extract_array::<f32>().map_err(engine_error)?;
        let logits = logits.index_axis(Axis(0), 0);
        let logits = logits.into_dimensionality::<Ix2>().map_err(engine_error)?;

        let decoded = ctc_greedy_decode(logits, &self.dictionary);
        Ok(decoded)
    }
}

impl TextDetector for PaddleOcrEngine {
    fn detect_text(&self, image: &DynamicImage) -> Result<Vec<TextFragment>> {
        let start = Instant::now();
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return Ok(vec![]);
        }

        let input = tensor::preprocess_for_detection(&rgb, &self.config.tensor);
        let prob = self.probability_map(input.tensor)?;

        let mut boxes: Vec<DetectedBox> = boxes_from_probability_map(&prob, input.content_size, &self.config)
            .into_iter()
            .filter_map(|b| {
                let region = scale_region(b.region, input.scale, width, height)?;
                Some(DetectedBox { region, score: b.score })
            })
            .collect();
        sort_reading_order(&mut boxes);

        let pixels = tensor::rgb_to_f32(&rgb);
        let mut fragments = Vec::with_capacity(boxes.len());
        for detected in &boxes {
            let Some(line) = tensor::crop(&pixels, detected.region) else {
                continue;
            };
            let (text, score) = self.recognize_line(&line)?;
            if text.trim().is_empty() {
                continue;
            }
            fragments.push(TextFragment::new(text).with_score(score).with_bounds(detected.region));
        }

        debug!(
            "PaddleOCR read {} of {} boxes in {:?}",
            fragments.len(),
            boxes.len(),
            start.elapsed()
        );

        Ok(fragments)
    }

    fn name(&self) -> &str {
        "paddleocr"
    }
}

impl std::fmt::Debug for PaddleOcrEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaddleOcrEngine")
            .field("dictionary_size", &self.dictionary.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn engine_error(e: impl std::fmt::Display) -> VisionError {
    VisionError::Engine(e.to_string())
}

/// Load the recognition dictionary from disk
pub fn load_dictionary(path: &Path) -> anyhow::Result<Vec<char>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read dictionary {:?}", path))?;
    Ok(parse_dictionary(&content))
}

/// One character per line; index 0 is the CTC blank, a trailing space is ensured
pub fn parse_dictionary(content: &str) -> Vec<char> {
    let mut dictionary = vec![' '];
    dictionary.extend(content.lines().filter_map(|line| line.chars().next()));

    if !dictionary[1..].contains(&' ') {
        dictionary.push(' ');
    }

    dictionary
}

/// Best-path CTC decoding of `[time, classes]` scores
///
/// Returns the text and the mean probability of the emitted characters.
pub fn ctc_greedy_decode(logits: ArrayView2<f32>, dictionary: &[char]) -> (String, f32) {
    let mut text = String::new();
    let mut total = 0.0f32;
    let mut emitted = 0usize;
    let mut prev: Option<usize> = None;

    for step in logits.rows() {
        let (index, prob) = step
            .iter()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best });

        if index != 0 && Some(index) != prev {
            if let Some(&ch) = dictionary.get(index) {
                text.push(ch);
                total += prob;
                emitted += 1;
            }
        }

        prev = (index != 0).then_some(index);
    }

    let score = if emitted == 0 { 0.0 } else { (total / emitted as f32).clamp(0.0, 1.0) };
    (text.trim().to_string(), score)
}

/// Text boxes on the detection map, in detection-map coordinates
pub fn boxes_from_probability_map(
    prob: &Array2<f32>,
    content_size: (usize, usize),
    config: &EngineConfig,
) -> Vec<DetectedBox> {
    let (map_h, map_w) = prob.dim();
    let width = content_size.0.min(map_w) as u32;
    let height = content_size.1.min(map_h) as u32;

    let bitmap = GrayImage::from_fn(width, height, |x, y| {
        if prob[[y as usize, x as usize]] > config.detection_threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    });

    external_contours(&bitmap)
        .iter()
        .filter_map(|points| {
            let region = bounding_rect(points)?;
            if region.width < MIN_BOX_SIDE || region.height < MIN_BOX_SIDE {
                return None;
            }

            let score = box_score(prob, region);
            if score < config.box_threshold {
                return None;
            }

            let region = unclip(region, config.unclip_ratio, width, height)?;
            Some(DetectedBox { region, score })
        })
        .collect()
}

/// Mean probability inside a box
pub fn box_score(prob: &Array2<f32>, region: Region) -> f32 {
    let (map_h, map_w) = prob.dim();
    let x1 = (region.x as usize).min(map_w);
    let y1 = (region.y as usize).min(map_h);
    let x2 = (region.x as usize + region.width as usize).min(map_w);
    let y2 = (region.y as usize + region.height as usize).min(map_h);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    prob.slice(ndarray::s![y1..y2, x1..x2]).mean().unwrap_or(0.0)
}

/// Grow a box by `area * ratio / perimeter` on every side, clamped to the map
pub fn unclip(region: Region, ratio: f32, max_width: u32, max_height: u32) -> Option<Region> {
    let (w, h) = (region.width as f32, region.height as f32);
    let offset = (w * h * ratio / (2.0 * (w + h))).max(0.0);

    let x1 = (region.x as f32 - offset).max(0.0).floor() as u32;
    let y1 = (region.y as f32 - offset).max(0.0).floor() as u32;
    let x2 = ((region.x as f32 + w + offset).ceil() as u32).min(max_width);
    let y2 = ((region.y as f32 + h + offset).ceil() as u32).min(max_height);

    Region::new(x1, y1, x2.saturating_sub(x1), y2.saturating_sub(y1))
}

/// Map a detection-map box back to the source image
pub fn scale_region(region: Region, scale: f32, image_width: u32, image_height: u32) -> Option<Region> {
    if scale <= 0.0 {
        return None;
    }

    let x1 = ((region.x as f32 / scale).floor() as u32).min(image_width);
    let y1 = ((region.y as f32 / scale).floor() as u32).min(image_height);
    let x2 = (((region.x + region.width) as f32 / scale).ceil() as u32).min(image_width);
    let y2 = (((region.y + region.height) as f32 / scale).ceil() as u32).min(image_height);

    Region::new(x1, y1, x2.saturating_sub(x1), y2.saturating_sub(y1))
}

/// Order boxes top-to-bottom, then left-to-right within a text line
pub fn sort_reading_order(boxes: &mut [DetectedBox]) {
    boxes.sort_by_key(|b| (b.region.y, b.region.x));

    for i in 1..boxes.len() {
        let mut j = i;
        while j > 0 {
            let (prev, cur) = (boxes[j - 1].region, boxes[j].region);
            if cur.y.abs_diff(prev.y) < SAME_LINE_TOLERANCE && cur.x < prev.x {
                boxes.swap(j - 1, j);
                j -= 1;
            } else {
                break;
            }
        }
    }
}
