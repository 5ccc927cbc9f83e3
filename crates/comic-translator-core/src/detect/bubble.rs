//! Speech-bubble candidates found directly in the page image.
//!
//! The image is binarized with Otsu's threshold, cleaned with a morphological
//! close and open, and every outermost connected shape of plausible size and
//! aspect becomes a candidate rectangle. OCR lines whose centers fall inside
//! the same candidate are later merged into one region.

use image::{imageops, GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use tracing::debug;

use crate::geometry::BoundingBox;

/// Below this share of foreground pixels the binary image is inverted.
const MIN_WHITE_RATIO: f64 = 0.35;
/// Candidate area bounds as fractions of the page area.
const MIN_AREA_RATIO: f64 = 0.002;
const MAX_AREA_RATIO: f64 = 0.60;
/// Candidate width/height bounds.
const MIN_ASPECT: f64 = 0.08;
const MAX_ASPECT: f64 = 12.0;

fn kernel_radius(size: u32) -> u8 {
    u8::try_from(size / 2).unwrap_or(u8::MAX)
}

/// Otsu-binarize `gray`, inverting when light pixels are a minority.
#[allow(clippy::cast_precision_loss)]
fn binarize(gray: &GrayImage) -> GrayImage {
    let level = otsu_level(gray);
    let mut binary = threshold(gray, level, ThresholdType::Binary);
    let total = u64::from(binary.width()) * u64::from(binary.height());
    let white = binary.pixels().filter(|p| p.0[0] > 0).count() as f64;
    if total > 0 && white / (total as f64) < MIN_WHITE_RATIO {
        imageops::invert(&mut binary);
    }
    binary
}

/// Rectangles that plausibly enclose a speech bubble, ordered top to bottom
/// then left to right.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn find_bubbles(image: &RgbImage) -> Vec<BoundingBox> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let binary = binarize(&imageops::grayscale(image));

    let short_side = width.min(height);
    let k = 3.max((f64::from(short_side) * 0.01) as u32);
    let k2 = 3.max(k / 2);
    // A kernel of size k closed twice reaches as far as one of twice the radius.
    let closed = close(&binary, Norm::L1, kernel_radius(k).saturating_mul(2));
    let cleaned = open(&closed, Norm::L1, kernel_radius(k2));

    let page_area = f64::from(width) * f64::from(height);
    let pad = (f64::from(short_side) * 0.005).floor();

    let mut rects: Vec<BoundingBox> = find_contours::<i32>(&cleaned)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter_map(|c| {
            let xs = c.points.iter().map(|p| p.x);
            let ys = c.points.iter().map(|p| p.y);
            let (x0, x1) = (xs.clone().min()?, xs.max()?);
            let (y0, y1) = (ys.clone().min()?, ys.max()?);
            let w = f64::from(x1 - x0 + 1);
            let h = f64::from(y1 - y0 + 1);

            let area = w * h;
            if area < page_area * MIN_AREA_RATIO || area > page_area * MAX_AREA_RATIO {
                return None;
            }
            let aspect = w / h.max(1.0);
            if !(MIN_ASPECT..=MAX_ASPECT).contains(&aspect) {
                return None;
            }

            Some(BoundingBox::new(
                (f64::from(x0) - pad).max(0.0),
                (f64::from(y0) - pad).max(0.0),
                (f64::from(x1) + 1.0 + pad).min(f64::from(width - 1)),
                (f64::from(y1) + 1.0 + pad).min(f64::from(height - 1)),
            ))
        })
        .collect();

    rects.sort_by(|a, b| a.y0.total_cmp(&b.y0).then(a.x0.total_cmp(&b.x0)));
    debug!("Found {} bubble candidates", rects.len());
    rects
}
