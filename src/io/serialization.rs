// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! Annotation and settings serialization.
//!
//! Per-frame detections are stored in two mirrored text layouts:
//!
//! - the generic layout, one line per detection:
//!   `class_id track_id x y width height px1 py1 px2 py2 ...` in pixels;
//! - the YOLO layout, one line per detection: `class_id cx cy w h`
//!   normalized by the frame size.
//!
//! Session snapshots and configuration go through the JSON and YAML
//! helpers at the bottom of this module.

use crate::error::{AnnotationError, Result};
use crate::models::{Bbox, Detection, Polygon};
use crate::util::geometry::{denormalize_bbox, normalize_bbox};
use serde::{de::DeserializeOwned, Serialize};
use std::io::Write;
use std::path::Path;

/// Replace `path` with `contents` in one step: write a temporary file in
/// the same directory, then rename it over the destination.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| AnnotationError::persist(dir, e))?;

    let mut file =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| AnnotationError::persist(path, e))?;
    file.write_all(contents)
        .and_then(|_| file.flush())
        .map_err(|e| AnnotationError::persist(path, e))?;
    file.persist(path)
        .map_err(|e| AnnotationError::persist(path, e.error))?;
    Ok(())
}

/// Read a text file, mapping "not found" to `None`.
fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Render detections in the generic layout.
pub fn format_generic(detections: &[Detection]) -> String {
    let mut out = String::new();
    for d in detections {
        let mut fields = vec![d.class_id.to_string(), d.track_id.to_string()];
        fields.extend(d.bbox.to_xywh().iter().map(|v| v.to_string()));
        fields.extend(d.polygon.coords().iter().map(|v| v.to_string()));
        out.push_str(&fields.join(" "));
        out.push('\n');
    }
    out
}

fn parse_generic_line(line: &str) -> Option<Detection> {
    let mut fields = line.split_whitespace();
    let class_id = fields.next()?.parse().ok()?;
    let track_id = fields.next()?.parse().ok()?;
    let numbers: Vec<f64> = fields.map(|f| f.parse().ok()).collect::<Option<_>>()?;
    if numbers.len() < 4 {
        return None;
    }
    let bbox = Bbox::new(numbers[0], numbers[1], numbers[2], numbers[3]);
    let polygon = if numbers.len() > 4 {
        Polygon::new(numbers[4..].to_vec())
    } else {
        Polygon::from_bbox(&bbox)
    };
    Some(Detection::new(class_id, track_id, bbox, polygon))
}

/// Parse the generic layout, skipping malformed lines.
pub fn parse_generic(text: &str) -> Vec<Detection> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| {
            let parsed = parse_generic_line(line);
            if parsed.is_none() {
                log::warn!("Skipping malformed annotation line {}: {:?}", index + 1, line);
            }
            parsed
        })
        .collect()
}

/// Render detections in the YOLO layout.
pub fn format_yolo(detections: &[Detection], image_size: (u32, u32)) -> String {
    let (width, height) = image_size;
    let mut out = String::new();
    for d in detections {
        let [cx, cy, w, h] = normalize_bbox(&d.bbox, width, height);
        out.push_str(&format!(
            "{} {:.6} {:.6} {:.6} {:.6}\n",
            d.class_id, cx, cy, w, h
        ));
    }
    out
}

/// Parse the YOLO layout. The layout carries no track identity, so tracks
/// are numbered by line position.
pub fn parse_yolo(text: &str, image_size: (u32, u32)) -> Vec<Detection> {
    let (width, height) = image_size;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .filter_map(|(index, line)| {
            let fields: Option<Vec<f64>> = line
                .split_whitespace()
                .map(|f| f.parse::<f64>().ok())
                .collect();
            match fields.as_deref() {
                Some([class_id, cx, cy, w, h, ..]) if *class_id >= 0.0 => {
                    let bbox = denormalize_bbox([*cx, *cy, *w, *h], width, height);
                    Some(Detection::from_bbox(*class_id as u32, index as u32, bbox))
                }
                _ => {
                    log::warn!("Skipping malformed YOLO line: {:?}", line);
                    None
                }
            }
        })
        .collect()
}

/// Write a frame in the generic layout.
pub fn write_generic(path: &Path, detections: &[Detection]) -> Result<()> {
    write_atomic(path, format_generic(detections).as_bytes())
}

/// Read a frame in the generic layout; `None` when the file is absent.
pub fn read_generic(path: &Path) -> Result<Option<Vec<Detection>>> {
    Ok(read_optional(path)?.map(|text| parse_generic(&text)))
}

/// Write a frame in the YOLO layout.
pub fn write_yolo(path: &Path, detections: &[Detection], image_size: (u32, u32)) -> Result<()> {
    write_atomic(path, format_yolo(detections, image_size).as_bytes())
}

/// Read a frame in the YOLO layout; `None` when the file is absent.
pub fn read_yolo(path: &Path, image_size: (u32, u32)) -> Result<Option<Vec<Detection>>> {
    Ok(read_optional(path)?.map(|text| parse_yolo(&text, image_size)))
}

/// Export any serializable value to YAML.
pub fn export_yaml<T: Serialize>(data: &T, path: &Path) -> Result<()> {
    let yaml = serde_yaml::to_string(data)?;
    write_atomic(path, yaml.as_bytes())
}

/// Export any serializable value to pretty JSON.
pub fn export_json<T: Serialize>(data: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    write_atomic(path, json.as_bytes())
}

/// Import a value from YAML.
pub fn import_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let yaml = std::fs::read_to_string(path)?;
    let data = serde_yaml::from_str(&yaml)?;
    Ok(data)
}

/// Import a value from JSON.
pub fn import_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = std::fs::read_to_string(path)?;
    let data = serde_json::from_str(&json)?;
    Ok(data)
}
