//! Text detection: the [`Detector`] seam, geometry validation and OCR
//! post-processing (filtering and grouping lines into speech blocks).
//!
//! Detectors always run on the processing-frame image, so every polygon they
//! return is already in frame coordinates. Anything that falls outside the
//! frame is a malformed result and fails the page rather than being clamped.

mod bubble;
mod http;
mod merge;

pub use bubble::find_bubbles;
pub use http::HttpDetector;
pub use merge::{merge_by_bubbles, merge_lines};

use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{DetectionConfig, MergeMode};
use crate::error::{Error, Result};
use crate::frame::CoordinateFrame;
use crate::geometry::Polygon;

/// One OCR result in frame coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub polygon: Polygon,
    pub text: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(polygon: Polygon, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            polygon,
            text: text.into(),
            confidence,
        }
    }
}

/// Trait for detection (OCR) backends
#[async_trait]
pub trait Detector: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Detect text regions on a processing-frame image.
    async fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>>;
}

/// Post-processing applied to raw detector output.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DetectionOptions {
    pub min_confidence: f32,
    pub merge: MergeMode,
}

impl From<&DetectionConfig> for DetectionOptions {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            min_confidence: config.min_confidence,
            merge: config.merge,
        }
    }
}

/// Check that every detection has at least three finite vertices inside the
/// frame bounds (edges inclusive).
pub fn validate_detections(frame: &CoordinateFrame, detections: &[Detection]) -> Result<()> {
    for (index, detection) in detections.iter().enumerate() {
        let polygon = &detection.polygon;
        if polygon.len() < 3 {
            return Err(Error::MalformedDetection {
                region: index,
                reason: format!("polygon has {} vertices, need at least 3", polygon.len()),
            });
        }
        if let Some(p) = polygon.points().iter().find(|p| !frame.contains(**p)) {
            return Err(Error::MalformedDetection {
                region: index,
                reason: format!(
                    "vertex ({}, {}) outside frame {}x{}",
                    p.x, p.y, frame.frame_width, frame.frame_height
                ),
            });
        }
    }
    Ok(())
}

/// Drop empty and low-confidence results, then group lines into speech
/// blocks as `options.merge` asks. `image` is the frame the detections were
/// made on; only bubble grouping looks at it.
pub fn postprocess(
    detections: Vec<Detection>,
    options: &DetectionOptions,
    image: &RgbImage,
) -> Vec<Detection> {
    let before = detections.len();
    let kept: Vec<Detection> = detections
        .into_iter()
        .filter(|d| !d.text.trim().is_empty() && d.confidence >= options.min_confidence)
        .map(|d| Detection {
            text: d.text.trim().to_string(),
            ..d
        })
        .collect();

    let kept = match options.merge {
        MergeMode::Off => kept,
        MergeMode::Lines => merge_lines(kept),
        MergeMode::Bubbles if kept.is_empty() => kept,
        MergeMode::Bubbles => merge_by_bubbles(kept, &find_bubbles(image)),
    };
    debug!("Post-processed {} detections into {}", before, kept.len());
    kept
}

/// Run `detector` on a frame image, validate and post-process the result.
pub async fn detect_regions(
    detector: &dyn Detector,
    image: &RgbImage,
    frame: &CoordinateFrame,
    options: &DetectionOptions,
) -> Result<Vec<Detection>> {
    let raw = detector.detect(image).await?;
    validate_detections(frame, &raw)?;
    if options.merge != MergeMode::Bubbles || raw.is_empty() {
        return Ok(postprocess(raw, options, image));
    }

    // Bubble search runs morphology over the whole frame.
    let image = image.clone();
    let options = *options;
    tokio::task::spawn_blocking(move || postprocess(raw, &options, &image))
        .await
        .map_err(|e| Error::Worker(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::frame::FitPolicy;

    fn frame() -> CoordinateFrame {
        CoordinateFrame::compute((200, 100), &FitPolicy::identity()).unwrap()
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon {
        Polygon::from_pairs(&[(x0, y0), (x1, y0), (x1, y1), (x0, y1)])
    }

    #[test]
    fn test_valid_detections_pass() {
        let detections = vec![
            Detection::new(rect(0.0, 0.0, 200.0, 100.0), "edge", 0.9),
            Detection::new(rect(10.0, 10.0, 50.0, 30.0), "inside", 0.9),
        ];
        assert!(validate_detections(&frame(), &detections).is_ok());
    }

    #[test]
    fn test_out_of_frame_vertex_is_malformed() {
        let detections = vec![
            Detection::new(rect(10.0, 10.0, 50.0, 30.0), "ok", 0.9),
            Detection::new(rect(150.0, 10.0, 201.0, 30.0), "bad", 0.9),
        ];
        let err = validate_detections(&frame(), &detections).unwrap_err();
        assert!(matches!(err, Error::MalformedDetection { region: 1, .. }));
    }

    #[test]
    fn test_degenerate_and_nan_polygons_are_malformed() {
        let line = Detection::new(Polygon::from_pairs(&[(0.0, 0.0), (10.0, 0.0)]), "x", 1.0);
        assert!(validate_detections(&frame(), &[line]).is_err());

        let nan = Detection::new(Polygon::from_pairs(&[(0.0, 0.0), (f64::NAN, 0.0), (5.0, 5.0)]), "x", 1.0);
        assert!(validate_detections(&frame(), &[nan]).is_err());
    }

    #[test]
    fn test_postprocess_filters_empty_and_low_confidence() {
        let detections = vec![
            Detection::new(rect(0.0, 0.0, 10.0, 10.0), "  ", 0.99),
            Detection::new(rect(0.0, 20.0, 10.0, 30.0), "low", 0.1),
            Detection::new(rect(0.0, 40.0, 10.0, 50.0), " keep ", 0.8),
        ];
        let options = DetectionOptions { min_confidence: 0.5, merge: MergeMode::Off };
        let kept = postprocess(detections, &options, &RgbImage::new(200, 100));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, "keep");
    }

    #[test]
    fn test_bubble_mode_groups_lines_by_bubble() {
        let mut image = RgbImage::from_pixel(400, 300, image::Rgb([60, 60, 60]));
        for (x0, y0, x1, y1) in [(20, 20, 200, 160), (220, 120, 390, 290)] {
            for y in y0..y1 {
                for x in x0..x1 {
                    image.put_pixel(x, y, image::Rgb([250, 250, 250]));
                }
            }
        }
        // The two lines in the left bubble are too far apart for line clustering.
        let detections = vec![
            Detection::new(rect(30.0, 30.0, 190.0, 50.0), "Hello", 0.9),
            Detection::new(rect(30.0, 100.0, 190.0, 120.0), "there", 0.9),
            Detection::new(rect(230.0, 200.0, 380.0, 220.0), "other", 0.9),
        ];

        let lines = DetectionOptions { min_confidence: 0.0, merge: MergeMode::Lines };
        assert_eq!(postprocess(detections.clone(), &lines, &image).len(), 3);

        let bubbles = DetectionOptions { min_confidence: 0.0, merge: MergeMode::Bubbles };
        let kept = postprocess(detections, &bubbles, &image);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].text, "Hello there");
        assert_eq!(kept[1].text, "other");
    }
}
