// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! One annotated object instance on one frame.

use super::geometry::{Bbox, Polygon};
use serde::{Deserialize, Serialize};

/// A detection: class, persistent track identity and geometry.
///
/// Detections are plain values. Every frame owns its own copies, so an
/// edit on one frame never leaks into another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub track_id: u32,
    pub bbox: Bbox,
    pub polygon: Polygon,
}

impl Detection {
    pub fn new(class_id: u32, track_id: u32, bbox: Bbox, polygon: Polygon) -> Self {
        Self {
            class_id,
            track_id,
            bbox,
            polygon,
        }
    }

    /// A detection whose polygon is the four corners of its box.
    pub fn from_bbox(class_id: u32, track_id: u32, bbox: Bbox) -> Self {
        let polygon = Polygon::from_bbox(&bbox);
        Self::new(class_id, track_id, bbox, polygon)
    }

    /// Identity comparison used by removals and replacements.
    pub fn is_same_track(&self, other: &Detection) -> bool {
        self.track_id == other.track_id
    }
}
