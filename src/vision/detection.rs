//! Plate region proposal
//!
//! Finds wide rectangular outlines with Canny edges and external contours.
//! Boxes are filtered by contour area and aspect ratio and returned in the
//! order the contours were discovered, which downstream is also the
//! tie-break order between equally scored plates.

use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::edges::canny;
use imageproc::point::Point;
use std::time::Instant;
use tracing::debug;

use crate::config::DetectionSettings;
use crate::error::{Result, VisionError};
use crate::vision::{to_grayscale, Region};

/// Proposes rectangles likely to contain a license plate
#[derive(Debug, Clone)]
pub struct RegionDetector {
    settings: DetectionSettings,
    available: bool,
}

impl RegionDetector {
    /// Create a region detector, validating thresholds and filter bounds
    pub fn new(settings: DetectionSettings) -> Result<Self> {
        validate_settings(&settings)?;

        Ok(Self {
            settings,
            available: true,
        })
    }

    /// A detector for degraded mode; every call fails with `CapabilityUnavailable`
    pub fn unavailable(settings: DetectionSettings) -> Self {
        Self {
            settings,
            available: false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn settings(&self) -> &DetectionSettings {
        &self.settings
    }

    /// Detect candidate plate regions in an RGB image
    pub fn detect(&self, image: &RgbImage) -> Result<Vec<Region>> {
        if !self.available {
            return Err(VisionError::CapabilityUnavailable(
                "region detection is disabled".to_string(),
            ));
        }

        let start = Instant::now();

        let gray = to_grayscale(image);
        let edges = canny(&gray, self.settings.canny_low, self.settings.canny_high);
        let contours = external_contours(&edges);

        let regions: Vec<Region> = contours
            .iter()
            .filter_map(|points| {
                let region = bounding_rect(points)?;
                let area = contour_area(points);
                if self.accepts(region, area) {
                    Some(region)
                } else {
                    None
                }
            })
            .collect();

        debug!(
            "Region detection complete in {:?}: {} of {} external contours kept",
            start.elapsed(),
            regions.len(),
            contours.len()
        );

        Ok(regions)
    }

    /// Area and aspect-ratio filter for one contour
    ///
    /// The area bound is strict, the aspect-ratio bounds are inclusive.
    pub fn accepts(&self, region: Region, area: f64) -> bool {
        if area <= self.settings.min_area {
            return false;
        }

        let ratio = region.aspect_ratio();
        ratio >= self.settings.min_aspect_ratio && ratio <= self.settings.max_aspect_ratio
    }
}

impl Default for RegionDetector {
    fn default() -> Self {
        Self {
            settings: DetectionSettings::default(),
            available: true,
        }
    }
}

/// Reject settings Canny or the ratio filter cannot work with
///
/// Canny requires `0 <= low <= high`; NaN thresholds fail the same check.
pub fn validate_settings(settings: &DetectionSettings) -> Result<()> {
    let (low, high) = (settings.canny_low, settings.canny_high);
    let ordered = low >= 0.0 && low <= high;
    if !ordered {
        return Err(VisionError::InvalidConfig(format!(
            "canny thresholds must satisfy 0 <= low <= high, got {} / {}",
            low, high
        )));
    }

    let (min_ratio, max_ratio) = (settings.min_aspect_ratio, settings.max_aspect_ratio);
    let non_empty = min_ratio > 0.0 && min_ratio <= max_ratio;
    if !non_empty {
        return Err(VisionError::InvalidConfig(format!(
            "aspect ratio range [{}, {}] is empty",
            min_ratio, max_ratio
        )));
    }

    if !settings.min_area.is_finite() {
        return Err(VisionError::InvalidConfig(format!(
            "min_area must be finite, got {}",
            settings.min_area
        )));
    }

    Ok(())
}

/// Outermost contours of a binary image, chain-compressed, in discovery order
pub fn external_contours(binary: &GrayImage) -> Vec<Vec<Point<i32>>> {
    let contours: Vec<Contour<i32>> = find_contours(binary);

    contours
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| compress_chain(&c.points))
        .collect()
}

/// Drop points lying in the middle of straight horizontal, vertical or
/// diagonal runs, keeping only segment end points
pub fn compress_chain(points: &[Point<i32>]) -> Vec<Point<i32>> {
    let n = points.len();
    if n < 3 {
        return points.to_vec();
    }

    let step = |a: Point<i32>, b: Point<i32>| ((b.x - a.x).signum(), (b.y - a.y).signum());

    points
        .iter()
        .enumerate()
        .filter(|&(i, &p)| {
            let prev = points[(i + n - 1) % n];
            let next = points[(i + 1) % n];
            step(prev, p) != step(p, next)
        })
        .map(|(_, &p)| p)
        .collect()
}

/// Enclosing axis-aligned box, counting pixels inclusively
pub fn bounding_rect(points: &[Point<i32>]) -> Option<Region> {
    let min_x = points.iter().map(|p| p.x).min()?;
    let min_y = points.iter().map(|p| p.y).min()?;
    let max_x = points.iter().map(|p| p.x).max()?;
    let max_y = points.iter().map(|p| p.y).max()?;

    if min_x < 0 || min_y < 0 {
        return None;
    }

    Region::new(
        min_x as u32,
        min_y as u32,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    )
}

/// Polygon area of a closed contour (shoelace formula)
pub fn contour_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }

    let twice_area: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();

    (twice_area as f64 / 2.0).abs()
}
