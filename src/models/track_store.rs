// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! Per-video detection storage.
//!
//! A `TrackStore` maps frame keys (frame basenames) to the detections on
//! that frame and mirrors them to disk. Frames are loaded lazily; edits are
//! kept in memory and marked dirty until [`TrackStore::flush`] writes them.

use super::detection::Detection;
use crate::error::Result;
use crate::io::serialization;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Sub-directory holding the YOLO mirror.
const YOLO_DIR: &str = "yolo";

/// Suffix given to annotation files of frames removed from a video.
const RETIRED_SUFFIX: &str = "not";

/// Detections of one video, keyed by frame.
#[derive(Debug)]
pub struct TrackStore {
    video: String,
    root: PathBuf,
    image_size: (u32, u32),
    focused: Option<String>,
    frames: HashMap<String, Vec<Detection>>,
    dirty: HashSet<String>,
    max_track_id: Option<u32>,
    scanned_track_ids: bool,
}

impl TrackStore {
    /// Create the store for `video`, persisting under `output_dir/video`.
    pub fn new(output_dir: &Path, video: &str) -> Self {
        Self {
            video: video.to_string(),
            root: output_dir.join(video),
            image_size: (0, 0),
            focused: None,
            frames: HashMap::new(),
            dirty: HashSet::new(),
            max_track_id: None,
            scanned_track_ids: false,
        }
    }

    pub fn video(&self) -> &str {
        &self.video
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Frame size used to normalize the YOLO mirror.
    pub fn image_size(&self) -> (u32, u32) {
        self.image_size
    }

    pub fn set_image_size(&mut self, size: (u32, u32)) {
        self.image_size = size;
    }

    pub fn generic_path(&self, frame_key: &str) -> PathBuf {
        self.root.join(format!("{frame_key}.txt"))
    }

    pub fn yolo_path(&self, frame_key: &str) -> PathBuf {
        self.root.join(YOLO_DIR).join(format!("{frame_key}.txt"))
    }

    fn has_image_size(&self) -> bool {
        self.image_size.0 > 0 && self.image_size.1 > 0
    }

    /// Read a frame from disk. Absent or unreadable files yield no
    /// detections.
    fn read_frame(&self, frame_key: &str) -> Vec<Detection> {
        let generic = self.generic_path(frame_key);
        match serialization::read_generic(&generic) {
            Ok(Some(detections)) => return detections,
            Ok(None) => {}
            Err(e) => {
                log::warn!("Could not read {}: {}", generic.display(), e);
                return Vec::new();
            }
        }

        if !self.has_image_size() {
            return Vec::new();
        }
        let yolo = self.yolo_path(frame_key);
        match serialization::read_yolo(&yolo, self.image_size) {
            Ok(found) => found.unwrap_or_default(),
            Err(e) => {
                log::warn!("Could not read {}: {}", yolo.display(), e);
                Vec::new()
            }
        }
    }

    fn frame_mut(&mut self, frame_key: &str) -> &mut Vec<Detection> {
        if !self.frames.contains_key(frame_key) {
            let detections = self.read_frame(frame_key);
            self.frames.insert(frame_key.to_string(), detections);
        }
        self.frames.entry(frame_key.to_string()).or_default()
    }

    /// Detections of a frame, reading them from disk on first access.
    pub fn load(&mut self, frame_key: &str) -> &[Detection] {
        self.frame_mut(frame_key)
    }

    /// Make `frame_key` the displayed frame and load it.
    pub fn focus(&mut self, frame_key: &str) {
        self.focused = Some(frame_key.to_string());
        self.frame_mut(frame_key);
    }

    pub fn focused(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    /// Detections of the displayed frame.
    pub fn detections(&self) -> &[Detection] {
        self.focused
            .as_ref()
            .and_then(|key| self.frames.get(key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn note_track_id(&mut self, track_id: u32) {
        self.max_track_id = Some(self.max_track_id.map_or(track_id, |m| m.max(track_id)));
    }

    /// Insert a detection, replacing the one with the same track on that
    /// frame.
    pub fn add_or_replace(&mut self, detection: Detection, frame_key: &str) {
        self.note_track_id(detection.track_id);
        let frame = self.frame_mut(frame_key);
        match frame.iter_mut().find(|d| d.is_same_track(&detection)) {
            Some(existing) => *existing = detection,
            None => frame.push(detection),
        }
        self.dirty.insert(frame_key.to_string());
    }

    /// Overwrite a frame. If a track appears twice, the last one wins.
    pub fn replace_all(&mut self, detections: Vec<Detection>, frame_key: &str) {
        let mut unique: Vec<Detection> = Vec::with_capacity(detections.len());
        for detection in detections {
            self.note_track_id(detection.track_id);
            match unique.iter_mut().find(|d| d.is_same_track(&detection)) {
                Some(existing) => *existing = detection,
                None => unique.push(detection),
            }
        }
        self.frames.insert(frame_key.to_string(), unique);
        self.dirty.insert(frame_key.to_string());
    }

    /// Remove a track from a frame. Returns whether it was present.
    pub fn remove(&mut self, track_id: u32, frame_key: &str) -> bool {
        let frame = self.frame_mut(frame_key);
        let before = frame.len();
        frame.retain(|d| d.track_id != track_id);
        let removed = frame.len() != before;
        if removed {
            self.dirty.insert(frame_key.to_string());
        }
        removed
    }

    /// Reclassify a track on a frame. Returns whether it was present.
    pub fn set_class(&mut self, track_id: u32, class_id: u32, frame_key: &str) -> bool {
        let frame = self.frame_mut(frame_key);
        let Some(detection) = frame.iter_mut().find(|d| d.track_id == track_id) else {
            return false;
        };
        detection.class_id = class_id;
        self.dirty.insert(frame_key.to_string());
        true
    }

    /// Track ids present on a frame.
    pub fn track_ids(&mut self, frame_key: &str) -> BTreeSet<u32> {
        self.load(frame_key).iter().map(|d| d.track_id).collect()
    }

    /// Whether a frame has edits not yet written to disk.
    pub fn is_dirty(&self, frame_key: &str) -> bool {
        self.dirty.contains(frame_key)
    }

    /// A track id not used anywhere in this video.
    pub fn new_track_id(&mut self) -> u32 {
        if !self.scanned_track_ids {
            self.max_track_id = self.max_track_id.max(self.scan_max_track_id());
            self.scanned_track_ids = true;
        }
        let next = self.max_track_id.map_or(0, |m| m + 1);
        self.max_track_id = Some(next);
        next
    }

    fn scan_max_track_id(&self) -> Option<u32> {
        let mut max = self
            .frames
            .values()
            .flatten()
            .map(|d| d.track_id)
            .max();

        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return max;
        };
        for path in entries.flatten().map(|e| e.path()) {
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            if let Ok(Some(detections)) = serialization::read_generic(&path) {
                let file_max = detections.iter().map(|d| d.track_id).max();
                max = max.max(file_max);
            }
        }
        max
    }

    fn write_frame(&self, frame_key: &str, detections: &[Detection]) -> Result<()> {
        serialization::write_generic(&self.generic_path(frame_key), detections)?;
        if self.has_image_size() {
            serialization::write_yolo(&self.yolo_path(frame_key), detections, self.image_size)?;
        } else {
            log::warn!(
                "Image size unknown for {}; YOLO mirror of {} not written",
                self.video,
                frame_key
            );
        }
        Ok(())
    }

    /// Persist every edited frame in both layouts, then drop cached frames
    /// other than the displayed one. A frame whose write fails stays dirty
    /// and the error is returned.
    pub fn flush(&mut self) -> Result<()> {
        let mut pending: Vec<String> = self.dirty.iter().cloned().collect();
        pending.sort();

        for key in pending {
            let detections = self.frames.get(&key).map(Vec::as_slice).unwrap_or(&[]);
            self.write_frame(&key, detections)?;
            self.dirty.remove(&key);
            log::debug!("Saved {} detections for {}/{}", detections.len(), self.video, key);
        }

        let focused = self.focused.clone();
        self.frames.retain(|key, _| Some(key) == focused.as_ref());
        Ok(())
    }

    /// Rename the annotation files of a frame so they are ignored from now
    /// on, and forget the frame in memory.
    pub fn retire_frame(&mut self, frame_key: &str) -> Result<()> {
        self.frames.remove(frame_key);
        self.dirty.remove(frame_key);
        if self.focused.as_deref() == Some(frame_key) {
            self.focused = None;
        }

        for path in [self.generic_path(frame_key), self.yolo_path(frame_key)] {
            let mut retired = path.clone().into_os_string();
            retired.push(".");
            retired.push(RETIRED_SUFFIX);
            match std::fs::rename(&path, &retired) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Bbox;

    fn det(track_id: u32, x: f64) -> Detection {
        Detection::from_bbox(1, track_id, Bbox::new(x, 0.0, 10.0, 10.0))
    }

    fn store() -> (TrackStore, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let mut store = TrackStore::new(dir.path(), "clip");
        store.set_image_size((100, 100));
        (store, dir)
    }

    #[test]
    fn test_last_writer_wins_per_track() {
        let (mut store, _dir) = store();
        for (i, track) in [1, 2, 1, 3, 2, 1].into_iter().enumerate() {
            store.add_or_replace(det(track, i as f64), "f0");
        }

        let frame = store.load("f0");
        assert_eq!(frame.len(), 3);
        let one = frame.iter().find(|d| d.track_id == 1).unwrap();
        assert_eq!(one.bbox.x, 5.0);
        let two = frame.iter().find(|d| d.track_id == 2).unwrap();
        assert_eq!(two.bbox.x, 4.0);
    }

    #[test]
    fn test_replace_all_dedups_tracks() {
        let (mut store, _dir) = store();
        store.replace_all(vec![det(1, 0.0), det(2, 1.0), det(1, 2.0)], "f0");
        let frame = store.load("f0");
        assert_eq!(frame.len(), 2);
        assert_eq!(frame[0].bbox.x, 2.0);
    }

    #[test]
    fn test_missing_frame_is_empty() {
        let (mut store, _dir) = store();
        assert!(store.load("never-written").is_empty());
        assert!(!store.remove(4, "never-written"));
        assert!(!store.set_class(4, 2, "never-written"));
    }

    #[test]
    fn test_flush_roundtrip() {
        let (mut store, dir) = store();
        let original = Detection::new(
            4,
            11,
            Bbox::new(12.5, 7.25, 30.0, 20.0),
            crate::models::Polygon::new(vec![12.5, 7.25, 42.5, 7.25, 30.0, 27.25]),
        );
        store.focus("f0");
        store.add_or_replace(original.clone(), "f0");
        store.flush().unwrap();
        assert!(!store.is_dirty("f0"));
        assert!(store.yolo_path("f0").exists());

        let mut reopened = TrackStore::new(dir.path(), "clip");
        assert_eq!(reopened.load("f0").to_vec(), vec![original]);
    }

    #[test]
    fn test_yolo_fallback_when_generic_missing() {
        let (mut store, dir) = store();
        store.add_or_replace(det(3, 20.0), "f1");
        store.flush().unwrap();
        std::fs::remove_file(store.generic_path("f1")).unwrap();

        let mut reopened = TrackStore::new(dir.path(), "clip");
        reopened.set_image_size((100, 100));
        let frame = reopened.load("f1");
        assert_eq!(frame.len(), 1);
        assert!((frame[0].bbox.x - 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_flush_evicts_unfocused_frames() {
        let (mut store, _dir) = store();
        store.focus("f0");
        store.add_or_replace(det(1, 0.0), "f5");
        assert!(store.is_dirty("f5"));
        store.flush().unwrap();
        assert!(!store.frames.contains_key("f5"));
        assert_eq!(store.load("f5").len(), 1);
    }

    #[test]
    fn test_flush_failure_keeps_frame_dirty() {
        let dir = tempfile::TempDir::new().unwrap();
        // A regular file where the video directory should be.
        std::fs::write(dir.path().join("clip"), "blocker").unwrap();
        let mut store = TrackStore::new(dir.path(), "clip");
        store.add_or_replace(det(1, 0.0), "f0");

        let err = store.flush().unwrap_err();
        assert!(matches!(err, crate::error::AnnotationError::Persist { .. }));
        assert!(store.is_dirty("f0"));
    }

    #[test]
    fn test_new_track_id_scans_disk() {
        let (mut store, dir) = store();
        store.add_or_replace(det(41, 0.0), "f0");
        store.flush().unwrap();

        let mut reopened = TrackStore::new(dir.path(), "clip");
        assert_eq!(reopened.new_track_id(), 42);
        assert_eq!(reopened.new_track_id(), 43);
    }

    #[test]
    fn test_retire_frame_renames_files() {
        let (mut store, _dir) = store();
        store.add_or_replace(det(1, 0.0), "f0");
        store.flush().unwrap();
        let generic = store.generic_path("f0");

        store.retire_frame("f0").unwrap();
        assert!(!generic.exists());
        assert!(generic.with_extension("txt.not").exists());
        assert!(store.load("f0").is_empty());
    }
}
