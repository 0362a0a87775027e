//! Debug rendering of detected plate regions
//!
//! Boxes are always drawn; `Region N` labels only when a font could be loaded.

use ab_glyph::FontVec;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Result, VisionError};
use crate::vision::Region;

/// Box outline color
pub const REGION_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Box outline thickness in pixels
pub const REGION_THICKNESS: u32 = 2;

/// Label height in pixels
pub const LABEL_SCALE: f32 = 14.0;

/// Gap between a label's baseline and the box top
const LABEL_GAP: i32 = 10;

const FONT_PATHS: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Load a label font from a font file
pub fn load_font(path: &Path) -> Result<FontVec> {
    let data = std::fs::read(path)?;
    FontVec::try_from_vec(data)
        .map_err(|_| VisionError::InvalidConfig(format!("{:?} is not a usable font", path)))
}

/// First usable font from the usual system locations
pub fn system_font() -> Option<FontVec> {
    for path in FONT_PATHS {
        if let Ok(font) = load_font(Path::new(path)) {
            debug!("Loaded label font {}", path);
            return Some(font);
        }
    }

    debug!("No system font found, region labels will be skipped");
    None
}

/// Top-left corner of the label for `region`, kept inside the image
pub fn label_origin(region: Region) -> (i32, i32) {
    let top = region.y as i32 - LABEL_GAP - LABEL_SCALE as i32;
    (region.x as i32, top.max(0))
}

/// Copy of `image` with every region outlined and, given a font, labeled `Region 1..n`
pub fn render_regions(image: &RgbImage, regions: &[Region], font: Option<&FontVec>) -> RgbImage {
    let mut canvas = image.clone();

    for (i, region) in regions.iter().enumerate() {
        // Nested 1px outlines, growing inward
        for inset in 0..REGION_THICKNESS {
            let width = region.width.saturating_sub(2 * inset);
            let height = region.height.saturating_sub(2 * inset);
            if width == 0 || height == 0 {
                break;
            }

            let rect = Rect::at((region.x + inset) as i32, (region.y + inset) as i32).of_size(width, height);
            draw_hollow_rect_mut(&mut canvas, rect, REGION_COLOR);
        }

        if let Some(font) = font {
            let (x, y) = label_origin(*region);
            let label = format!("Region {}", i + 1);
            draw_text_mut(&mut canvas, REGION_COLOR, x, y, LABEL_SCALE, font, &label);
        }
    }

    canvas
}

/// Render regions and write the result; the format follows the file extension
pub fn save_debug_image(image: &RgbImage, regions: &[Region], path: &Path) -> Result<()> {
    let font = system_font();
    let rendered = render_regions(image, regions, font.as_ref());
    rendered.save(path)?;

    info!("Saved debug image with {} regions to {:?}", regions.len(), path);
    Ok(())
}
