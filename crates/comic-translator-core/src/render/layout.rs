//! Font-agnostic text layout: auto-size, greedy word wrap and centering
//! inside a region's box.

use crate::geometry::BoundingBox;

use super::TextStyle;

/// Font metrics needed for layout.
pub trait TextMeasure {
    /// Advance width of `text` in pixels at `font_size`.
    fn text_width(&self, text: &str, font_size: f32) -> f32;

    /// Natural line height in pixels at `font_size`.
    fn line_height(&self, font_size: f32) -> f32;
}

/// One positioned line; `y` is the top of the line box.
#[derive(Debug, Clone, PartialEq)]
pub struct LaidOutLine {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextLayout {
    pub font_size: f32,
    /// Distance between consecutive line tops
    pub line_advance: f32,
    pub lines: Vec<LaidOutLine>,
}

/// Lay out `text` inside `bbox` shrunk by the style's margins.
///
/// Without a fixed size, sizes are tried from `max_font_size` down to
/// `min_font_size` in one-pixel steps and the first size whose wrapped block
/// fits is used; if none fits the minimum size is used anyway. Each line is
/// centered horizontally and the block vertically. Returns `None` for blank
/// text or a box with no room left inside the margins.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn fit_text(
    text: &str,
    bbox: &BoundingBox,
    style: &TextStyle,
    measure: &dyn TextMeasure,
) -> Option<TextLayout> {
    if text.trim().is_empty() {
        return None;
    }

    let box_w = bbox.width() as f32;
    let box_h = bbox.height() as f32;
    let margin_x = (box_w * style.margins.horizontal).floor();
    let margin_y = (box_h * style.margins.vertical).floor();
    let inner_w = box_w - 2.0 * margin_x;
    let inner_h = box_h - 2.0 * margin_y;
    if inner_w <= 0.0 || inner_h <= 0.0 {
        return None;
    }

    let fits = |size: f32, lines: &[String]| {
        let block_h = measure.line_height(size) * lines.len() as f32 * style.line_spacing;
        block_h <= inner_h && lines.iter().all(|l| measure.text_width(l, size) <= inner_w)
    };

    let (font_size, lines) = if let Some(size) = style.font_size {
        (size, wrap_words(text, size, inner_w, measure))
    } else {
        let min = style.min_font_size.max(1.0);
        let max = style.max_font_size.max(min);
        let steps = (max - min).floor() as u32;
        (0..=steps)
            .map(|i| max - i as f32)
            .map(|size| (size, wrap_words(text, size, inner_w, measure)))
            .find(|(size, lines)| fits(*size, lines))
            .unwrap_or_else(|| (min, wrap_words(text, min, inner_w, measure)))
    };

    let line_advance = measure.line_height(font_size) * style.line_spacing;
    let block_h = line_advance * lines.len() as f32;
    let inner_x0 = bbox.x0 as f32 + margin_x;
    let top = bbox.y0 as f32 + margin_y + (inner_h - block_h) / 2.0;

    let lines = lines
        .into_iter()
        .enumerate()
        .map(|(i, line)| {
            let width = measure.text_width(&line, font_size);
            LaidOutLine {
                x: inner_x0 + (inner_w - width) / 2.0,
                y: top + i as f32 * line_advance,
                width,
                text: line,
            }
        })
        .collect();

    Some(TextLayout {
        font_size,
        line_advance,
        lines,
    })
}

/// Greedy word wrap: a word joins the current line while the joined line
/// still fits `max_width`. A single word wider than the box gets its own line.
fn wrap_words(text: &str, font_size: f32, max_width: f32, measure: &dyn TextMeasure) -> Vec<String> {
    let mut words = text.split_whitespace();
    let Some(first) = words.next() else {
        return Vec::new();
    };

    let mut lines = Vec::new();
    let mut current = first.to_string();
    for word in words {
        let candidate = format!("{current} {word}");
        if measure.text_width(&candidate, font_size) <= max_width {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        }
    }
    lines.push(current);
    lines
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Every character is `0.5 * size` wide, lines are `size` tall.
    struct Fixed;

    impl TextMeasure for Fixed {
        #[allow(clippy::cast_precision_loss)]
        fn text_width(&self, text: &str, font_size: f32) -> f32 {
            text.chars().count() as f32 * font_size * 0.5
        }

        fn line_height(&self, font_size: f32) -> f32 {
            font_size
        }
    }

    fn bbox() -> BoundingBox {
        BoundingBox::new(10.0, 10.0, 110.0, 60.0)
    }

    #[test]
    fn test_text_stays_inside_margins() {
        let style = TextStyle::default();
        let layout = fit_text("Bonjour tout le monde", &bbox(), &style, &Fixed).unwrap();

        // 10% margins of 100x50
        for line in &layout.lines {
            assert!(line.x >= 20.0 - 1e-3);
            assert!(line.x + line.width <= 100.0 + 1e-3);
            assert!(line.y >= 15.0 - 1e-3);
            assert!(line.y + layout.line_advance <= 55.0 + 1e-3);
        }
    }

    #[test]
    fn test_picks_largest_fitting_size() {
        let style = TextStyle::default();
        // inner box 80x40; "Hi" at size s is s wide and 1.2*s tall -> 33 fits, 34 doesn't
        let layout = fit_text("Hi", &bbox(), &style, &Fixed).unwrap();
        assert!((layout.font_size - 33.0).abs() < f32::EPSILON);
        assert_eq!(layout.lines.len(), 1);
    }

    #[test]
    fn test_lines_are_centered() {
        let style = TextStyle { font_size: Some(10.0), ..TextStyle::default() };
        let layout = fit_text("ab", &bbox(), &style, &Fixed).unwrap();
        let line = &layout.lines[0];
        // inner x from 20 to 100, width 10
        assert!((line.x - 55.0).abs() < 1e-3);
        // inner y from 15 to 55, block 12 tall
        assert!((line.y - 29.0).abs() < 1e-3);
    }

    #[test]
    fn test_wraps_when_too_wide() {
        let style = TextStyle { font_size: Some(10.0), ..TextStyle::default() };
        let layout = fit_text("one two three four five six", &bbox(), &style, &Fixed).unwrap();
        assert!(layout.lines.len() > 1);
        let joined: Vec<&str> = layout.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(joined.join(" "), "one two three four five six");
    }

    #[test]
    fn test_falls_back_to_min_size() {
        let style = TextStyle::default();
        let long = "word ".repeat(200);
        let layout = fit_text(&long, &bbox(), &style, &Fixed).unwrap();
        assert!((layout.font_size - style.min_font_size).abs() < f32::EPSILON);
    }

    #[test]
    fn test_blank_or_tiny_box() {
        let style = TextStyle::default();
        assert!(fit_text("   ", &bbox(), &style, &Fixed).is_none());
        let flat = BoundingBox::new(0.0, 0.0, 100.0, 0.0);
        assert!(fit_text("hello", &flat, &style, &Fixed).is_none());
    }
}
