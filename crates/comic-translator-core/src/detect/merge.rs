//! Grouping of OCR lines into one detection per speech block, either by
//! speech-bubble membership or by vertical proximity.

use crate::geometry::{BoundingBox, Point};

use super::Detection;

/// Minimum vertical reach when grouping lines, in pixels.
const MIN_LINE_GAP: f64 = 10.0;
/// Vertical reach as a multiple of the first line's height.
const LINE_GAP_FACTOR: f64 = 1.6;
/// Minimum horizontal overlap, as a fraction of the narrower box.
const MIN_HORIZONTAL_OVERLAP: f64 = 0.15;
/// Slack around a bubble rectangle when testing line centers, in pixels.
const BUBBLE_PAD: f64 = 8.0;

/// One detection for a group: the bounding rectangle, texts joined with spaces
/// and the mean confidence.
#[allow(clippy::cast_precision_loss)]
fn combine(bbox: BoundingBox, texts: &[String], confidences: &[f32]) -> Detection {
    let confidence = confidences.iter().sum::<f32>() / confidences.len().max(1) as f32;
    Detection::new(bbox.to_polygon(), texts.join(" ").trim(), confidence)
}

fn sort_reading_order(items: &mut [(BoundingBox, Detection)]) {
    items.sort_by(|(a, _), (b, _)| a.y0.total_cmp(&b.y0).then(a.x0.total_cmp(&b.x0)));
}

fn inside(rect: &BoundingBox, p: Point, pad: f64) -> bool {
    p.x >= rect.x0 - pad && p.x <= rect.x1 + pad && p.y >= rect.y0 - pad && p.y <= rect.y1 + pad
}

/// Merge lines whose box centers fall in the same bubble rectangle.
///
/// A line belongs to the first rectangle (in the given order) containing its
/// center. Lines outside every rectangle, or every line when no rectangles
/// were found, are grouped with [`merge_lines`].
pub fn merge_by_bubbles(detections: Vec<Detection>, bubbles: &[BoundingBox]) -> Vec<Detection> {
    if bubbles.is_empty() {
        return merge_lines(detections);
    }

    let mut groups: Vec<Vec<(BoundingBox, Detection)>> = vec![Vec::new(); bubbles.len()];
    let mut loose = Vec::new();
    for detection in detections {
        let Some(bbox) = detection.polygon.bounding_box() else {
            continue;
        };
        match bubbles.iter().position(|r| inside(r, bbox.center(), BUBBLE_PAD)) {
            Some(i) => groups[i].push((bbox, detection)),
            None => loose.push(detection),
        }
    }

    let mut merged: Vec<(BoundingBox, Detection)> = groups
        .into_iter()
        .filter_map(|mut group| {
            group.sort_by(|(a, _), (b, _)| a.y0.total_cmp(&b.y0));
            let bbox = group.iter().map(|(b, _)| *b).reduce(BoundingBox::union)?;
            let texts: Vec<String> = group.iter().map(|(_, d)| d.text.clone()).collect();
            let confidences: Vec<f32> = group.iter().map(|(_, d)| d.confidence).collect();
            Some((bbox, combine(bbox, &texts, &confidences)))
        })
        .collect();

    merged.extend(
        merge_lines(loose)
            .into_iter()
            .filter_map(|d| d.polygon.bounding_box().map(|b| (b, d))),
    );
    sort_reading_order(&mut merged);
    merged.into_iter().map(|(_, d)| d).collect()
}

/// Greedily cluster OCR lines that stack vertically into one detection per
/// speech block.
///
/// Lines are visited top-to-bottom; each unvisited line seeds a group and
/// absorbs later lines that start near the group's top or bottom edge and
/// overlap it horizontally. The merged polygon is the group's bounding
/// rectangle, texts are joined with spaces and confidences averaged.
pub fn merge_lines(detections: Vec<Detection>) -> Vec<Detection> {
    let mut items: Vec<(BoundingBox, Detection)> = detections
        .into_iter()
        .filter_map(|d| d.polygon.bounding_box().map(|b| (b, d)))
        .collect();
    sort_reading_order(&mut items);

    let mut used = vec![false; items.len()];
    let mut merged = Vec::new();

    for i in 0..items.len() {
        if used[i] {
            continue;
        }
        used[i] = true;

        let (seed_box, seed) = &items[i];
        let mut group = *seed_box;
        let mut texts = vec![seed.text.clone()];
        let mut confidences = vec![seed.confidence];
        let max_dy = MIN_LINE_GAP.max((seed_box.height() * LINE_GAP_FACTOR).floor());

        for j in (i + 1)..items.len() {
            if used[j] {
                continue;
            }
            let (candidate, detection) = &items[j];

            if (candidate.y0 - group.y1).abs() > max_dy && (candidate.y0 - group.y0).abs() > max_dy {
                continue;
            }

            let overlap = (group.x1.min(candidate.x1) - group.x0.max(candidate.x0)).max(0.0);
            let narrower = group.width().min(candidate.width()).max(1.0);
            if overlap / narrower < MIN_HORIZONTAL_OVERLAP {
                continue;
            }

            used[j] = true;
            texts.push(detection.text.clone());
            confidences.push(detection.confidence);
            group = group.union(*candidate);
        }

        merged.push((group, combine(group, &texts, &confidences)));
    }

    sort_reading_order(&mut merged);
    merged.into_iter().map(|(_, d)| d).collect()
}
