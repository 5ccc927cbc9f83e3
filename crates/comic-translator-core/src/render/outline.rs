use image::{Rgb, RgbImage};
use tiny_skia::{FillRule, Paint, PathBuilder, Pixmap, Transform};
use tracing::debug;
use ttf_parser::{Face, OutlineBuilder};

use super::font::FontResource;
use super::layout::fit_text;
use super::{TextRenderer, TextStyle};
use crate::error::{Error, Result};
use crate::geometry::Polygon;

/// Letters text by filling glyph outlines with tiny-skia.
///
/// Glyphs are rasterized onto a transparent pixmap covering the region's box
/// and alpha-composited over the frame image.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutlineRenderer;

/// Feeds ttf-parser outlines (font units, Y up) into a tiny-skia path in
/// pixmap pixels (Y down).
struct GlyphPath<'a> {
    builder: &'a mut PathBuilder,
    origin_x: f32,
    baseline: f32,
    scale: f32,
}

impl GlyphPath<'_> {
    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.baseline - y * self.scale)
    }
}

impl OutlineBuilder for GlyphPath<'_> {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

fn append_line(builder: &mut PathBuilder, face: &Face<'_>, text: &str, origin_x: f32, baseline: f32, scale: f32) {
    let mut pen = origin_x;
    for c in text.chars() {
        let Some(glyph) = face.glyph_index(c) else {
            continue;
        };
        let mut sink = GlyphPath {
            builder: &mut *builder,
            origin_x: pen,
            baseline,
            scale,
        };
        let _ = face.outline_glyph(glyph, &mut sink);
        pen += face.glyph_hor_advance(glyph).map_or(0.0, f32::from) * scale;
    }
}

impl TextRenderer for OutlineRenderer {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn draw_text(
        &self,
        image: &mut RgbImage,
        polygon: &Polygon,
        text: &str,
        font: Option<&FontResource>,
        style: &TextStyle,
    ) -> Result<()> {
        let font = font.ok_or_else(|| Error::ResourceMissing("no font available for lettering".to_string()))?;
        let bbox = polygon
            .bounding_box()
            .ok_or_else(|| Error::Render("region has no vertices".to_string()))?;

        let Some(layout) = fit_text(text, &bbox, style, font) else {
            debug!("No room to letter {:?} in region", crate::util::truncate_for_log(text, 40));
            return Ok(());
        };

        // Text at the minimum size may spill past the box; give it room.
        let pad = layout.font_size.ceil() as u32;
        let Some((win_x, win_y, win_w, win_h)) = bbox.pixel_window(pad, image.width(), image.height()) else {
            return Ok(());
        };

        let face = font.face()?;
        let scale = font.scale(layout.font_size);
        let ascent = font.ascent_px(layout.font_size);

        let mut builder = PathBuilder::new();
        for line in &layout.lines {
            append_line(
                &mut builder,
                &face,
                &line.text,
                line.x - win_x as f32,
                line.y - win_y as f32 + ascent,
                scale,
            );
        }
        let Some(path) = builder.finish() else {
            return Ok(());
        };

        let mut pixmap = Pixmap::new(win_w, win_h)
            .ok_or_else(|| Error::Render(format!("cannot allocate {win_w}x{win_h} canvas")))?;
        let (r, g, b) = style.color.to_rgb_bytes();
        let mut paint = Paint::default();
        paint.set_color_rgba8(r, g, b, 255);
        paint.anti_alias = true;
        pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);

        // Source-over with premultiplied source pixels.
        for (i, px) in pixmap.pixels().iter().enumerate() {
            let alpha = px.alpha();
            if alpha == 0 {
                continue;
            }
            let x = win_x + (i as u32 % win_w);
            let y = win_y + (i as u32 / win_w);
            let inv = 255 - u16::from(alpha);
            let dst = image.get_pixel(x, y).0;
            let blend = |src: u8, dst: u8| -> u8 {
                (u16::from(src) + (u16::from(dst) * inv + 127) / 255).min(255) as u8
            };
            image.put_pixel(
                x,
                y,
                Rgb([blend(px.red(), dst[0]), blend(px.green(), dst[1]), blend(px.blue(), dst[2])]),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::TextColor;

    fn region() -> Polygon {
        Polygon::from_pairs(&[(10.0, 10.0), (190.0, 10.0), (190.0, 90.0), (10.0, 90.0)])
    }

    #[test]
    fn test_missing_font_is_reported() {
        let mut image = RgbImage::from_pixel(200, 100, Rgb([255, 255, 255]));
        let err = OutlineRenderer
            .draw_text(&mut image, &region(), "Bonjour", None, &TextStyle::default())
            .unwrap_err();
        assert!(matches!(err, Error::ResourceMissing(_)));
    }

    #[test]
    fn test_draws_inside_region_only() {
        let Some(font) = FontResource::system_default() else {
            return;
        };
        let mut image = RgbImage::from_pixel(200, 100, Rgb([255, 255, 255]));
        let style = TextStyle { color: TextColor::black(), ..TextStyle::default() };
        OutlineRenderer
            .draw_text(&mut image, &region(), "Bonjour", Some(&font), &style)
            .unwrap();

        let mut inked = 0;
        for (x, y, px) in image.enumerate_pixels() {
            if px.0 != [255, 255, 255] {
                inked += 1;
                assert!((10..190).contains(&x) && (10..90).contains(&y), "ink at {x},{y}");
            }
        }
        assert!(inked > 0);
    }

    #[test]
    fn test_letters_without_a_selected_font() {
        // Hosts with no fonts installed at all skip this check.
        let Some(font) = FontResource::resolve(None) else {
            return;
        };
        let mut image = RgbImage::from_pixel(200, 100, Rgb([255, 255, 255]));
        let style = TextStyle { color: TextColor::blue(), ..TextStyle::default() };
        OutlineRenderer
            .draw_text(&mut image, &region(), "Bonjour", Some(&font), &style)
            .unwrap();
        assert!(image.pixels().any(|px| px.0 != [255, 255, 255]));
    }
}
