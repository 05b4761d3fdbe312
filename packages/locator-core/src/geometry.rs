use serde::{Deserialize, Serialize};

/// 2D point in the room frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn dist(&self, other: &Point2) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Anchor layout plus the room rectangle `[0, width] × [0, height]`.
/// Loaded once from configuration and read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomGeometry {
    pub anchors: Vec<Point2>,
    pub width: f64,
    pub height: f64,
    /// Extra band searched around the room by the grid fallback
    pub margin: f64,
}

impl RoomGeometry {
    pub fn new(anchors: Vec<Point2>, width: f64, height: f64, margin: f64) -> Self {
        Self { anchors, width, height, margin }
    }

    /// Length of the room diagonal, `‖(width, height)‖`.
    pub fn diagonal(&self) -> f64 {
        (self.width * self.width + self.height * self.height).sqrt()
    }

    /// Fallback search rectangle `(xmin, xmax, ymin, ymax)`.
    pub fn search_bounds(&self) -> (f64, f64, f64, f64) {
        (-self.margin, self.width + self.margin, -self.margin, self.height + self.margin)
    }

    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }
}
