//! Points, polygons and axis-aligned boxes in pixel space.
//!
//! Region geometry is always expressed in processing-frame pixels with a
//! top-left origin: X grows to the right, Y grows downward.

use serde::{Deserialize, Serialize};

/// A point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding box: (x0, y0) top-left, (x1, y1) bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BoundingBox {
    pub const fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn center(&self) -> Point {
        Point::new((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    /// Smallest box containing both boxes.
    pub fn union(self, other: Self) -> Self {
        Self {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Rectangle polygon, clockwise from the top-left corner.
    pub fn to_polygon(self) -> Polygon {
        Polygon::new(vec![
            Point::new(self.x0, self.y0),
            Point::new(self.x1, self.y0),
            Point::new(self.x1, self.y1),
            Point::new(self.x0, self.y1),
        ])
    }

    /// Integer pixel window `(x, y, width, height)` covering this box, grown by
    /// `pad` pixels and clamped to an image of `width` x `height`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn pixel_window(&self, pad: u32, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let pad = f64::from(pad);
        let x0 = (self.x0 - pad).floor().max(0.0);
        let y0 = (self.y0 - pad).floor().max(0.0);
        let x1 = (self.x1 + pad).ceil().min(f64::from(width));
        let y1 = (self.y1 + pad).ceil().min(f64::from(height));
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        // Clamped to [0, dimension] above, so the casts cannot wrap.
        let (x0, y0, x1, y1) = (x0 as u32, y0 as u32, x1 as u32, y1 as u32);
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// A closed polygon given by its vertices in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Polygon(pub Vec<Point>);

impl Polygon {
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Build a polygon from `(x, y)` pairs.
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Self {
        Self(pairs.iter().copied().map(Point::from).collect())
    }

    pub fn points(&self) -> &[Point] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply `f` to every vertex.
    pub fn map(&self, f: impl Fn(Point) -> Point) -> Self {
        Self(self.0.iter().copied().map(f).collect())
    }

    /// Axis-aligned bounds, or `None` for an empty polygon.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let first = self.0.first()?;
        let init = BoundingBox::new(first.x, first.y, first.x, first.y);
        Some(self.0.iter().skip(1).fold(init, |b, p| BoundingBox {
            x0: b.x0.min(p.x),
            y0: b.y0.min(p.y),
            x1: b.x1.max(p.x),
            y1: b.y1.max(p.y),
        }))
    }

    /// Even-odd point-in-polygon test.
    pub fn contains(&self, p: Point) -> bool {
        let pts = &self.0;
        if pts.len() < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = pts.len() - 1;
        for i in 0..pts.len() {
            let (a, b) = (pts[i], pts[j]);
            if (a.y > p.y) != (b.y > p.y) {
                let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
                if p.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}
