// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! Geometry value types for annotated objects.
//!
//! Boxes and polygons are expressed in pixel coordinates of the frame
//! image. Normalized coordinates only appear on disk (see
//! [`crate::util::geometry`]).

use serde::{Deserialize, Serialize};

/// A 2D point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned bounding box stored as top-left corner plus size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bbox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a box from its center point and `(width, height)`.
    pub fn from_center_size(center: Point, size: (f64, f64)) -> Self {
        let (width, height) = size;
        Self {
            x: center.x - width / 2.0,
            y: center.y - height / 2.0,
            width,
            height,
        }
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn size(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    /// Check if a point lies inside the box (edges included).
    pub fn contains(&self, point: &Point) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Corners in clockwise order starting at the top-left.
    pub fn corners(&self) -> [Point; 4] {
        let right = self.x + self.width;
        let bottom = self.y + self.height;
        [
            Point::new(self.x, self.y),
            Point::new(right, self.y),
            Point::new(right, bottom),
            Point::new(self.x, bottom),
        ]
    }

    /// The `[x, y, width, height]` representation used by the wire protocol
    /// and the generic annotation layout.
    pub fn to_xywh(&self) -> [f64; 4] {
        [self.x, self.y, self.width, self.height]
    }

    /// Clip the box to an image of the given size. Returns `None` when
    /// nothing of the box remains.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<Bbox> {
        let left = self.x.max(0.0);
        let top = self.y.max(0.0);
        let right = (self.x + self.width).min(image_width as f64);
        let bottom = (self.y + self.height).min(image_height as f64);

        if right <= left || bottom <= top {
            None
        } else {
            Some(Bbox::new(left, top, right - left, bottom - top))
        }
    }
}

/// An ordered polygon stored as a flattened `[x0, y0, x1, y1, ...]` list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Polygon {
    coords: Vec<f64>,
}

impl Polygon {
    /// Build a polygon from a flattened coordinate list. A trailing odd
    /// coordinate is dropped.
    pub fn new(mut coords: Vec<f64>) -> Self {
        if coords.len() % 2 == 1 {
            coords.pop();
        }
        Self { coords }
    }

    /// The four corners of a box, for trackers that do not produce masks.
    pub fn from_bbox(bbox: &Bbox) -> Self {
        let coords = bbox
            .corners()
            .iter()
            .flat_map(|p| [p.x, p.y])
            .collect();
        Self { coords }
    }

    pub fn coords(&self) -> &[f64] {
        &self.coords
    }

    pub fn points(&self) -> impl Iterator<Item = Point> + '_ {
        self.coords.chunks_exact(2).map(|c| Point::new(c[0], c[1]))
    }

    pub fn vertex_count(&self) -> usize {
        self.coords.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Smallest axis-aligned box enclosing every vertex.
    pub fn bounding_box(&self) -> Option<Bbox> {
        let mut points = self.points();
        let first = points.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Bbox::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_size_roundtrip() {
        let bbox = Bbox::new(10.5, 20.25, 31.0, 7.5);
        let rebuilt = Bbox::from_center_size(bbox.center(), bbox.size());
        assert_eq!(rebuilt, bbox);
    }

    #[test]
    fn test_contains() {
        let bbox = Bbox::new(0.0, 0.0, 10.0, 5.0);
        assert!(bbox.contains(&Point::new(5.0, 2.0)));
        assert!(bbox.contains(&Point::new(10.0, 5.0)));
        assert!(!bbox.contains(&Point::new(10.1, 2.0)));
        assert!(!bbox.contains(&Point::new(-0.1, 2.0)));
    }

    #[test]
    fn test_polygon_from_bbox() {
        let bbox = Bbox::new(1.0, 2.0, 3.0, 4.0);
        let polygon = Polygon::from_bbox(&bbox);
        assert_eq!(polygon.vertex_count(), 4);
        assert_eq!(polygon.coords(), &[1.0, 2.0, 4.0, 2.0, 4.0, 6.0, 1.0, 6.0]);
        assert_eq!(polygon.bounding_box(), Some(bbox));
    }

    #[test]
    fn test_polygon_drops_odd_coordinate() {
        let polygon = Polygon::new(vec![1.0, 2.0, 3.0]);
        assert_eq!(polygon.vertex_count(), 1);
        assert!(Polygon::default().bounding_box().is_none());
    }

    #[test]
    fn test_clamp_to_image() {
        let bbox = Bbox::new(-5.0, 90.0, 20.0, 20.0);
        assert_eq!(bbox.clamp_to(100, 100), Some(Bbox::new(0.0, 90.0, 15.0, 10.0)));
        assert_eq!(Bbox::new(200.0, 0.0, 5.0, 5.0).clamp_to(100, 100), None);
    }
}
