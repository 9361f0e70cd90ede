// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! Geometric utility functions.
//!
//! This module provides utilities for coordinate transformations between
//! pixel coordinates and the normalized coordinates of the YOLO layout.

use crate::models::geometry::{Bbox, Point};

/// Convert pixel coordinates to normalized coordinates (0.0 to 1.0).
pub fn normalize_coordinates(pixel_x: f64, pixel_y: f64, width: u32, height: u32) -> Point {
    Point {
        x: pixel_x / width as f64,
        y: pixel_y / height as f64,
    }
}

/// Convert normalized coordinates to pixel coordinates.
pub fn denormalize_coordinates(point: &Point, width: u32, height: u32) -> (f64, f64) {
    (point.x * width as f64, point.y * height as f64)
}

/// Normalized `[cx, cy, w, h]` of a pixel box.
pub fn normalize_bbox(bbox: &Bbox, width: u32, height: u32) -> [f64; 4] {
    let center = bbox.center();
    let center = normalize_coordinates(center.x, center.y, width, height);
    let size = normalize_coordinates(bbox.width, bbox.height, width, height);
    [center.x, center.y, size.x, size.y]
}

/// Pixel box from normalized `[cx, cy, w, h]`.
pub fn denormalize_bbox(cxcywh: [f64; 4], width: u32, height: u32) -> Bbox {
    let (cx, cy) = denormalize_coordinates(&Point::new(cxcywh[0], cxcywh[1]), width, height);
    let (w, h) = denormalize_coordinates(&Point::new(cxcywh[2], cxcywh[3]), width, height);
    Bbox::from_center_size(Point::new(cx, cy), (w, h))
}
