use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::drawing::draw_polygon_mut;
use imageproc::morphology::dilate;
use imageproc::point::Point as PixelPoint;

use super::Eraser;
use crate::error::{Error, Result};
use crate::geometry::Polygon;

/// Width of the sampling ring around the erased area, in pixels.
const RING_WIDTH: u8 = 2;

/// Erases a region by filling it with the surrounding background color.
///
/// The polygon (grown by `padding` pixels) is filled with the per-channel
/// median of a thin ring of pixels just outside it. Speech bubbles are
/// usually a flat color, so the median recovers the bubble fill even when
/// the ring touches some line art.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundFillEraser {
    pub padding: u32,
}

impl BackgroundFillEraser {
    pub const fn new(padding: u32) -> Self {
        Self { padding }
    }
}

impl Default for BackgroundFillEraser {
    fn default() -> Self {
        Self::new(2)
    }
}

impl Eraser for BackgroundFillEraser {
    fn erase(&self, image: &mut RgbImage, polygon: &Polygon) -> Result<()> {
        let bbox = polygon
            .bounding_box()
            .ok_or_else(|| Error::Erasure("region has no vertices".to_string()))?;
        let padding = u8::try_from(self.padding).unwrap_or(u8::MAX);
        let Some((x0, y0, w, h)) =
            bbox.pixel_window(u32::from(padding) + u32::from(RING_WIDTH), image.width(), image.height())
        else {
            return Ok(());
        };

        let Some(mask) = polygon_mask(polygon, x0, y0, w, h) else {
            return Ok(());
        };
        let mask = if padding > 0 { dilate(&mask, Norm::LInf, padding) } else { mask };
        let outer = dilate(&mask, Norm::LInf, RING_WIDTH);

        let ring: Vec<[u8; 3]> = outer
            .enumerate_pixels()
            .filter(|(x, y, o)| o[0] > 0 && mask.get_pixel(*x, *y)[0] == 0)
            .map(|(x, y, _)| image.get_pixel(x0 + x, y0 + y).0)
            .collect();
        let fill = Rgb(median_color(&ring));

        for (x, y, m) in mask.enumerate_pixels() {
            if m[0] > 0 {
                image.put_pixel(x0 + x, y0 + y, fill);
            }
        }
        Ok(())
    }
}

/// Filled polygon mask over the `w`x`h` window at (`x0`, `y0`); `None` when
/// the polygon collapses to fewer than three distinct corners.
#[allow(clippy::cast_possible_truncation)]
fn polygon_mask(polygon: &Polygon, x0: u32, y0: u32, w: u32, h: u32) -> Option<GrayImage> {
    let mut points: Vec<PixelPoint<i32>> = polygon
        .points()
        .iter()
        .map(|p| {
            PixelPoint::new(
                (p.x - f64::from(x0)).round() as i32,
                (p.y - f64::from(y0)).round() as i32,
            )
        })
        .collect();
    points.dedup();
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    if points.len() < 3 {
        return None;
    }

    let mut mask = GrayImage::new(w, h);
    draw_polygon_mut(&mut mask, &points, Luma([255u8]));
    Some(mask)
}

/// Per-channel median; white when there is nothing to sample.
fn median_color(samples: &[[u8; 3]]) -> [u8; 3] {
    if samples.is_empty() {
        return [255, 255, 255];
    }
    let mut out = [0u8; 3];
    for (channel, slot) in out.iter_mut().enumerate() {
        let mut values: Vec<u8> = samples.iter().map(|s| s[channel]).collect();
        let mid = values.len() / 2;
        *slot = *values.select_nth_unstable(mid).1;
    }
    out
}
