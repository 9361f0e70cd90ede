// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! Session state and the frame-control state machine.
//!
//! `SessionState` is the single source of truth for the current video, the
//! current frame, the frame-control mode and the selected detection. Every
//! mutation goes through its methods so that the outgoing frame is always
//! persisted before navigation and listeners are told afterwards.
//!
//! Background engines share the session as a [`SharedSession`]; the mutex
//! serializes them with the primary thread.

use super::detection::Detection;
use super::geometry::Bbox;
use super::track_store::TrackStore;
use crate::error::{AnnotationError, Result};
use crate::io::{media, serialization};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Which actor currently owns advancing the displayed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameMode {
    /// The user steps or types frame numbers.
    #[default]
    Manual,
    /// A tracker or sequence detector drives navigation.
    Controlled,
    /// The user is scrubbing the slider.
    Slider,
}

/// How far a track deletion reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    #[default]
    CurrentFrame,
    Following,
    Previous,
}

/// Events delivered to listeners after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    CurrentFrameChanged,
    VideoChanged,
    DetectionsChanged,
    FrameModeChanged,
}

/// Receives session events.
///
/// Listeners run synchronously while the session is borrowed: they may read
/// the state passed to them but must not try to lock the shared session or
/// register listeners.
pub trait StateListener: Send + Sync {
    fn on_event(&self, event: StateEvent, state: &SessionState);
}

/// Handle returned by [`SessionState::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The persisted part of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSnapshot {
    pub current_video: Option<String>,
    pub current_frame: usize,
    pub crop_region: Option<Bbox>,
    pub use_cropping_area: bool,
    pub delete_scope: DeleteScope,
    pub copy_annotations: bool,
}

/// Session shared between the primary thread and background engines.
pub type SharedSession = Arc<Mutex<SessionState>>;

/// Lock a shared session, recovering the state if a thread panicked while
/// holding it.
pub fn lock_session(session: &SharedSession) -> MutexGuard<'_, SessionState> {
    session.lock().unwrap_or_else(|poisoned| {
        log::warn!("Session lock was poisoned; continuing with the last state");
        poisoned.into_inner()
    })
}

/// The annotation session.
pub struct SessionState {
    data_dir: PathBuf,
    output_dir: PathBuf,
    video_list: Vec<String>,
    current_video: Option<String>,
    current_frame: usize,
    file_names: Vec<PathBuf>,
    track_store: Option<TrackStore>,
    current_detection: Option<Detection>,
    frame_mode: FrameMode,
    crop_region: Option<Bbox>,
    use_cropping_area: bool,
    delete_scope: DeleteScope,
    copy_annotations: bool,
    player_step: isize,
    listeners: Vec<(ListenerId, Arc<dyn StateListener>)>,
    next_listener_id: u64,
}

impl SessionState {
    /// Open a session over `data_dir`, writing annotations to `output_dir`.
    /// The first video (if any) becomes current.
    pub fn new(data_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        let video_list = media::find_videos(&data_dir)?;

        let mut state = Self {
            data_dir,
            output_dir: output_dir.into(),
            video_list,
            current_video: None,
            current_frame: 0,
            file_names: Vec::new(),
            track_store: None,
            current_detection: None,
            frame_mode: FrameMode::Manual,
            crop_region: None,
            use_cropping_area: false,
            delete_scope: DeleteScope::default(),
            copy_annotations: false,
            player_step: 1,
            listeners: Vec::new(),
            next_listener_id: 0,
        };

        if let Some(first) = state.video_list.first().cloned() {
            state.open_video(&first)?;
        }
        Ok(state)
    }

    /// Wrap the session for sharing with engines.
    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    /// Point the session at `video`: frame list, fresh store, frame 0.
    fn open_video(&mut self, video: &str) -> Result<()> {
        let file_names = media::list_frames(&self.data_dir.join(video))?;
        let mut store = TrackStore::new(&self.output_dir, video);

        if let Some(first) = file_names.first() {
            match media::frame_size(first) {
                Ok(size) => store.set_image_size(size),
                Err(e) => log::warn!("Could not read frame size of {}: {}", first.display(), e),
            }
            store.focus(&media::frame_key(first));
        }

        log::debug!("Opened video {} ({} frames)", video, file_names.len());
        self.current_video = Some(video.to_string());
        self.file_names = file_names;
        self.current_frame = 0;
        self.track_store = Some(store);
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn video_list(&self) -> &[String] {
        &self.video_list
    }

    pub fn current_video(&self) -> Option<&str> {
        self.current_video.as_deref()
    }

    /// Directory holding the frames of the current video.
    pub fn video_dir(&self) -> Option<PathBuf> {
        self.current_video.as_ref().map(|v| self.data_dir.join(v))
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn frame_count(&self) -> usize {
        self.file_names.len()
    }

    pub fn frame_paths(&self) -> &[PathBuf] {
        &self.file_names
    }

    pub fn frame_path(&self, frame: usize) -> Option<&Path> {
        self.file_names.get(frame).map(PathBuf::as_path)
    }

    /// Storage key of a frame.
    pub fn frame_key(&self, frame: usize) -> Result<String> {
        self.frame_path(frame)
            .map(media::frame_key)
            .ok_or(AnnotationError::FrameOutOfRange {
                frame,
                count: self.frame_count(),
            })
    }

    pub fn frame_mode(&self) -> FrameMode {
        self.frame_mode
    }

    pub fn current_detection(&self) -> Option<&Detection> {
        self.current_detection.as_ref()
    }

    pub fn track_store(&self) -> Option<&TrackStore> {
        self.track_store.as_ref()
    }

    /// Detections on the displayed frame.
    pub fn detections(&self) -> &[Detection] {
        self.track_store
            .as_ref()
            .map(TrackStore::detections)
            .unwrap_or(&[])
    }

    /// Detections on any frame of the current video.
    pub fn detections_on(&mut self, frame: usize) -> Result<Vec<Detection>> {
        let key = self.frame_key(frame)?;
        Ok(self.store_mut()?.load(&key).to_vec())
    }

    fn store_mut(&mut self) -> Result<&mut TrackStore> {
        self.track_store
            .as_mut()
            .ok_or_else(|| AnnotationError::UnknownVideo("no video is open".to_string()))
    }

    fn clamp_frame(&self, frame: i64) -> usize {
        let last = self.frame_count().saturating_sub(1) as i64;
        frame.clamp(0, last) as usize
    }

    /// Navigate to `frame`, optionally changing the frame-control mode.
    ///
    /// Persists the outgoing frame first, then loads the incoming one and
    /// notifies listeners. Out-of-range requests are clamped. If the flush
    /// fails nothing changes and the error is returned.
    pub fn set_current_frame(&mut self, frame: usize, mode: Option<FrameMode>) -> Result<()> {
        let frame = self.clamp_frame(frame.min(i64::MAX as usize) as i64);
        if let Some(store) = self.track_store.as_mut() {
            store.flush()?;
        }

        self.current_frame = frame;
        if let Some(mode) = mode {
            self.frame_mode = mode;
        }

        if let Ok(key) = self.frame_key(frame) {
            if let Some(store) = self.track_store.as_mut() {
                store.focus(&key);
            }
        }

        log::debug!("Current frame {} ({:?})", frame, self.frame_mode);
        self.notify(StateEvent::CurrentFrameChanged);
        Ok(())
    }

    /// Move by `step` frames (the player step when `None`), clamped to the
    /// video.
    pub fn increase_current_frame(&mut self, mode: Option<FrameMode>, step: Option<isize>) -> Result<()> {
        let step = step.unwrap_or(self.player_step) as i64;
        let target = self.clamp_frame((self.current_frame as i64).saturating_add(step));
        self.set_current_frame(target, mode)
    }

    /// Manual stepping. With "copy annotations" on, the selected detection
    /// follows onto the new frame unless its track is already there.
    pub fn step_frame(&mut self, step: isize) -> Result<()> {
        let carried = self.current_detection.clone();
        self.increase_current_frame(Some(FrameMode::Manual), Some(step))?;

        if let Some(detection) = carried.filter(|_| self.copy_annotations) {
            let present = self.detections().iter().any(|d| d.is_same_track(&detection));
            if !present {
                self.set_current_detection(detection)?;
            }
        }
        Ok(())
    }

    /// Switch videos. Does nothing if `video` is already current.
    pub fn set_current_video(&mut self, video: &str) -> Result<()> {
        if self.current_video.as_deref() == Some(video) {
            return Ok(());
        }
        if !self.video_list.iter().any(|v| v == video) {
            return Err(AnnotationError::UnknownVideo(video.to_string()));
        }

        if let Some(store) = self.track_store.as_mut() {
            store.flush()?;
        }
        self.track_store = None;

        self.open_video(video)?;
        self.current_detection = None;
        self.frame_mode = FrameMode::Manual;

        log::info!("Switched to video {}", video);
        self.notify(StateEvent::VideoChanged);
        Ok(())
    }

    /// Re-scan the data directory for videos.
    pub fn refresh_videos(&mut self) -> Result<()> {
        self.video_list = media::find_videos(&self.data_dir)?;
        Ok(())
    }

    /// Change the frame-control mode and tell listeners.
    pub fn set_frame_mode(&mut self, mode: FrameMode) {
        self.frame_mode = mode;
        self.notify(StateEvent::FrameModeChanged);
    }

    /// Write a detection to `frame`. It becomes the selection when `frame`
    /// is displayed.
    pub fn add_detection(&mut self, detection: Detection, frame: usize) -> Result<()> {
        let key = self.frame_key(frame)?;
        let is_current = frame == self.current_frame;
        let store = self.store_mut()?;
        if is_current {
            store.add_or_replace(detection.clone(), &key);
            self.current_detection = Some(detection);
        } else {
            store.add_or_replace(detection, &key);
        }
        Ok(())
    }

    /// Replace all detections of `frame`.
    ///
    /// Listeners hear about it only when `frame` is displayed; other frames
    /// are picked up when navigated to.
    pub fn set_detections(&mut self, detections: Vec<Detection>, frame: usize) -> Result<()> {
        let key = self.frame_key(frame)?;
        self.store_mut()?.replace_all(detections, &key);

        if frame == self.current_frame {
            self.notify(StateEvent::DetectionsChanged);
        }
        Ok(())
    }

    /// Select `detection` on the displayed frame, writing it through.
    pub fn set_current_detection(&mut self, detection: Detection) -> Result<()> {
        let key = self.frame_key(self.current_frame)?;
        self.store_mut()?.add_or_replace(detection.clone(), &key);
        self.current_detection = Some(detection);
        self.notify(StateEvent::DetectionsChanged);
        Ok(())
    }

    /// Select the detection of `track_id` on the displayed frame.
    pub fn select_track(&mut self, track_id: u32) -> Option<&Detection> {
        self.current_detection = self
            .detections()
            .iter()
            .find(|d| d.track_id == track_id)
            .cloned();
        self.current_detection.as_ref()
    }

    pub fn clear_selection(&mut self) {
        self.current_detection = None;
    }

    fn deselect_track(&mut self, track_id: u32) {
        if self
            .current_detection
            .as_ref()
            .is_some_and(|d| d.track_id == track_id)
        {
            self.current_detection = None;
        }
    }

    /// Remove a track from the displayed frame.
    ///
    /// No notification: the viewer keeps showing the previous box rather
    /// than waiting on a redraw.
    pub fn remove_detection(&mut self, track_id: u32) -> Result<bool> {
        let key = self.frame_key(self.current_frame)?;
        let removed = self.store_mut()?.remove(track_id, &key);
        self.deselect_track(track_id);
        Ok(removed)
    }

    /// Delete a track from the displayed frame and, depending on `scope`,
    /// from the contiguous run of following or preceding frames holding it.
    /// `None` uses the session's delete scope. Returns the number of frames
    /// edited.
    pub fn remove_detection_and_propagate(
        &mut self,
        track_id: u32,
        scope: Option<DeleteScope>,
    ) -> Result<usize> {
        let scope = scope.unwrap_or(self.delete_scope);
        let current = self.current_frame;
        let frames: Vec<usize> = match scope {
            DeleteScope::CurrentFrame => vec![current],
            DeleteScope::Following => (current..self.frame_count()).collect(),
            DeleteScope::Previous => (0..=current).rev().collect(),
        };

        let mut removed = 0;
        for frame in frames {
            let key = self.frame_key(frame)?;
            if !self.store_mut()?.remove(track_id, &key) {
                break;
            }
            removed += 1;
        }

        self.deselect_track(track_id);
        log::debug!("Removed track {} from {} frames ({:?})", track_id, removed, scope);
        self.notify(StateEvent::DetectionsChanged);
        Ok(removed)
    }

    /// Reclassify a track from the displayed frame onwards, stopping at the
    /// first frame without it. Returns the number of frames edited.
    pub fn modify_class_and_propagate_forward(&mut self, track_id: u32, class_id: u32) -> Result<usize> {
        let mut modified = 0;
        for frame in self.current_frame..self.frame_count() {
            let key = self.frame_key(frame)?;
            if !self.store_mut()?.set_class(track_id, class_id, &key) {
                break;
            }
            modified += 1;
        }

        if let Some(selected) = self
            .current_detection
            .as_mut()
            .filter(|d| d.track_id == track_id)
        {
            selected.class_id = class_id;
        }
        self.notify(StateEvent::DetectionsChanged);
        Ok(modified)
    }

    /// Track ids present on a frame.
    pub fn track_ids(&mut self, frame: usize) -> Result<BTreeSet<u32>> {
        let key = self.frame_key(frame)?;
        Ok(self.store_mut()?.track_ids(&key))
    }

    /// Whether two frames hold exactly the same tracks.
    pub fn frames_have_same_tracks(&mut self, a: usize, b: usize) -> Result<bool> {
        Ok(self.track_ids(a)? == self.track_ids(b)?)
    }

    /// A track id unused in the current video.
    pub fn new_track_id(&mut self) -> Result<u32> {
        Ok(self.store_mut()?.new_track_id())
    }

    /// Drop the displayed frame from the video: the image and its
    /// annotation files are renamed with a `.not` suffix.
    pub fn remove_current_frame(&mut self) -> Result<()> {
        let frame = self.current_frame;
        let Some(path) = self.file_names.get(frame).cloned() else {
            return Ok(());
        };
        let key = media::frame_key(&path);

        log::info!("Removing frame {}", path.display());
        let mut retired = path.clone().into_os_string();
        retired.push(".not");
        if let Err(e) = std::fs::rename(&path, &retired) {
            log::warn!("Could not rename {}: {}", path.display(), e);
        }
        self.store_mut()?.retire_frame(&key)?;
        self.file_names.remove(frame);
        self.current_detection = None;

        self.set_current_frame(frame, Some(FrameMode::Manual))
    }

    pub fn crop_region(&self) -> Option<Bbox> {
        self.crop_region
    }

    pub fn use_cropping_area(&self) -> bool {
        self.use_cropping_area
    }

    /// The region detectors should be restricted to, if cropping is on.
    pub fn detection_crop(&self) -> Option<Bbox> {
        self.crop_region.filter(|_| self.use_cropping_area)
    }

    /// Store a cropping region and enable cropping. The viewer redraws.
    pub fn set_crop_region(&mut self, region: Option<Bbox>) {
        self.use_cropping_area = region.is_some();
        self.crop_region = region;
        self.notify(StateEvent::CurrentFrameChanged);
    }

    pub fn set_use_cropping_area(&mut self, enabled: bool) {
        self.use_cropping_area = enabled;
        self.notify(StateEvent::CurrentFrameChanged);
    }

    pub fn delete_scope(&self) -> DeleteScope {
        self.delete_scope
    }

    pub fn set_delete_scope(&mut self, scope: DeleteScope) {
        self.delete_scope = scope;
    }

    pub fn copy_annotations(&self) -> bool {
        self.copy_annotations
    }

    pub fn set_copy_annotations(&mut self, enabled: bool) {
        self.copy_annotations = enabled;
    }

    pub fn player_step(&self) -> isize {
        self.player_step
    }

    pub fn set_player_step(&mut self, step: isize) {
        self.player_step = step;
    }

    /// Persist pending edits of the current video.
    pub fn flush(&mut self) -> Result<()> {
        match self.track_store.as_mut() {
            Some(store) => store.flush(),
            None => Ok(()),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            current_video: self.current_video.clone(),
            current_frame: self.current_frame,
            crop_region: self.crop_region,
            use_cropping_area: self.use_cropping_area,
            delete_scope: self.delete_scope,
            copy_annotations: self.copy_annotations,
        }
    }

    /// Restore a snapshot. A video that no longer exists falls back to the
    /// current one; the frame is clamped and the mode is always manual.
    pub fn restore(&mut self, snapshot: &SessionSnapshot) -> Result<()> {
        if let Some(video) = snapshot.current_video.as_deref() {
            if self.video_list.iter().any(|v| v == video) {
                self.set_current_video(video)?;
            } else {
                log::warn!("Saved video {} not found; keeping current video", video);
            }
        }

        self.crop_region = snapshot.crop_region;
        self.use_cropping_area = snapshot.use_cropping_area && snapshot.crop_region.is_some();
        self.delete_scope = snapshot.delete_scope;
        self.copy_annotations = snapshot.copy_annotations;
        self.set_current_frame(snapshot.current_frame, Some(FrameMode::Manual))
    }

    /// Flush and write the snapshot to `path`.
    pub fn save_snapshot(&mut self, path: &Path) -> Result<()> {
        self.flush()?;
        serialization::export_json(&self.snapshot(), path)
    }

    /// Restore from `path` if it exists. Returns whether a snapshot was
    /// applied.
    pub fn load_snapshot(&mut self, path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        let snapshot: SessionSnapshot = serialization::import_json(path)?;
        self.restore(&snapshot)?;
        Ok(true)
    }

    pub fn add_listener(&mut self, listener: Arc<dyn StateListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    /// Deliver `event` to every listener.
    pub fn notify(&self, event: StateEvent) {
        for (_, listener) in &self.listeners {
            listener.on_event(event, self);
        }
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("current_video", &self.current_video)
            .field("current_frame", &self.current_frame)
            .field("frame_count", &self.frame_count())
            .field("frame_mode", &self.frame_mode)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, track_det, RecordingListener};

    #[test]
    fn test_opens_first_video() {
        let fx = fixture(&[("clip_b", 3), ("clip_a", 5)]);
        let state = fx.session();
        assert_eq!(state.video_list().to_vec(), vec!["clip_a".to_string(), "clip_b".to_string()]);
        assert_eq!(state.current_video(), Some("clip_a"));
        assert_eq!(state.frame_count(), 5);
        assert_eq!(state.frame_mode(), FrameMode::Manual);
    }

    #[test]
    fn test_navigation_flushes_outgoing_frame() {
        let fx = fixture(&[("clip", 4)]);
        let mut state = fx.session();
        state.add_detection(track_det(1, 10.0), 0).unwrap();
        let path = state.track_store().unwrap().generic_path("frame0");
        assert!(!path.exists());

        state.set_current_frame(1, None).unwrap();
        assert!(path.exists());

        let mut reopened = TrackStore::new(fx.output_dir(), "clip");
        assert_eq!(reopened.load("frame0").to_vec(), vec![track_det(1, 10.0)]);
    }

    #[test]
    fn test_increase_current_frame_clamps() {
        let fx = fixture(&[("clip", 5)]);
        let mut state = fx.session();
        for step in [-100, -3, -1, 0, 1, 2, 7, 1000, isize::MIN / 2, isize::MAX / 2] {
            state.increase_current_frame(None, Some(step)).unwrap();
            assert!(state.current_frame() < 5, "step {step}");
        }
        state.set_current_frame(2, None).unwrap();
        state.increase_current_frame(Some(FrameMode::Manual), Some(10)).unwrap();
        assert_eq!(state.current_frame(), 4);
        state.increase_current_frame(None, Some(-10)).unwrap();
        assert_eq!(state.current_frame(), 0);

        state.set_current_frame(2, None).unwrap();
        state.increase_current_frame(None, Some(isize::MAX)).unwrap();
        assert_eq!(state.current_frame(), 4);
        state.set_current_frame(2, None).unwrap();
        state.increase_current_frame(None, Some(isize::MIN)).unwrap();
        assert_eq!(state.current_frame(), 0);

        state.set_current_frame(99, Some(FrameMode::Slider)).unwrap();
        assert_eq!(state.current_frame(), 4);
        assert_eq!(state.frame_mode(), FrameMode::Slider);
    }

    #[test]
    fn test_frame_change_notifies_and_mode_is_advisory() {
        let fx = fixture(&[("clip", 3)]);
        let mut state = fx.session();
        let listener = RecordingListener::new();
        state.add_listener(listener.clone());

        state.set_frame_mode(FrameMode::Controlled);
        state.set_current_frame(2, None).unwrap();
        assert_eq!(state.current_frame(), 2);
        assert_eq!(state.frame_mode(), FrameMode::Controlled);
        assert_eq!(
            listener.events(),
            vec![StateEvent::FrameModeChanged, StateEvent::CurrentFrameChanged]
        );
    }

    #[test]
    fn test_delete_following_stops_at_gap() {
        let fx = fixture(&[("clip", 6)]);
        let mut state = fx.session();
        for frame in [0, 1, 2, 4, 5] {
            state.add_detection(track_det(7, frame as f64), frame).unwrap();
        }
        state.add_detection(track_det(8, 0.0), 1).unwrap();

        let removed = state
            .remove_detection_and_propagate(7, Some(DeleteScope::Following))
            .unwrap();
        assert_eq!(removed, 3);
        for frame in 0..3 {
            assert!(!state.track_ids(frame).unwrap().contains(&7));
        }
        assert!(state.track_ids(1).unwrap().contains(&8));
        assert!(state.track_ids(4).unwrap().contains(&7));
        assert!(state.track_ids(5).unwrap().contains(&7));
    }

    #[test]
    fn test_delete_previous_stops_at_gap() {
        let fx = fixture(&[("clip", 6)]);
        let mut state = fx.session();
        for frame in [0, 2, 3, 4] {
            state.add_detection(track_det(3, 0.0), frame).unwrap();
        }
        state.set_current_frame(4, None).unwrap();
        state.set_delete_scope(DeleteScope::Previous);

        assert_eq!(state.remove_detection_and_propagate(3, None).unwrap(), 3);
        assert!(state.track_ids(0).unwrap().contains(&3));
        assert!(state.track_ids(2).unwrap().is_empty());
    }

    #[test]
    fn test_delete_current_only() {
        let fx = fixture(&[("clip", 3)]);
        let mut state = fx.session();
        state.add_detection(track_det(1, 0.0), 0).unwrap();
        state.add_detection(track_det(1, 0.0), 1).unwrap();
        assert_eq!(state.current_detection().map(|d| d.track_id), Some(1));

        assert_eq!(state.remove_detection_and_propagate(1, None).unwrap(), 1);
        assert!(state.current_detection().is_none());
        assert!(state.track_ids(1).unwrap().contains(&1));
    }

    #[test]
    fn test_reclassify_forward() {
        let fx = fixture(&[("clip", 5)]);
        let mut state = fx.session();
        for frame in [1, 2, 4] {
            state.add_detection(track_det(2, 0.0), frame).unwrap();
        }
        state.set_current_frame(1, None).unwrap();
        state.select_track(2);

        assert_eq!(state.modify_class_and_propagate_forward(2, 9).unwrap(), 2);
        assert_eq!(state.current_detection().map(|d| d.class_id), Some(9));
        assert_eq!(state.detections_on(2).unwrap()[0].class_id, 9);
        assert_eq!(state.detections_on(4).unwrap()[0].class_id, 1);
    }

    #[test]
    fn test_set_detections_notifies_only_displayed_frame() {
        let fx = fixture(&[("clip", 3)]);
        let mut state = fx.session();
        let listener = RecordingListener::new();
        state.add_listener(listener.clone());

        state.set_detections(vec![track_det(1, 0.0)], 2).unwrap();
        assert!(listener.events().is_empty());

        state.set_detections(vec![track_det(1, 0.0)], 0).unwrap();
        assert_eq!(listener.events(), vec![StateEvent::DetectionsChanged]);
        assert_eq!(state.detections().len(), 1);
    }

    #[test]
    fn test_remove_detection_is_silent() {
        let fx = fixture(&[("clip", 2)]);
        let mut state = fx.session();
        state.add_detection(track_det(4, 0.0), 0).unwrap();
        let listener = RecordingListener::new();
        state.add_listener(listener.clone());

        assert!(state.remove_detection(4).unwrap());
        assert!(!state.remove_detection(4).unwrap());
        assert!(listener.events().is_empty());
    }

    #[test]
    fn test_video_switch_resets_session() {
        let fx = fixture(&[("a", 3), ("b", 2)]);
        let mut state = fx.session();
        let listener = RecordingListener::new();
        state.add_listener(listener.clone());

        state.set_current_frame(2, Some(FrameMode::Controlled)).unwrap();
        state.add_detection(track_det(5, 0.0), 2).unwrap();
        listener.clear();

        state.set_current_video("a").unwrap();
        assert!(listener.events().is_empty());

        state.set_current_video("b").unwrap();
        assert_eq!(state.current_video(), Some("b"));
        assert_eq!(state.current_frame(), 0);
        assert_eq!(state.frame_count(), 2);
        assert_eq!(state.frame_mode(), FrameMode::Manual);
        assert!(state.current_detection().is_none());
        assert_eq!(listener.events(), vec![StateEvent::VideoChanged]);

        assert!(fx.output_dir().join("a").join("frame2.txt").exists());
        assert!(matches!(
            state.set_current_video("missing"),
            Err(AnnotationError::UnknownVideo(_))
        ));
    }

    #[test]
    fn test_frames_have_same_tracks() {
        let fx = fixture(&[("clip", 3)]);
        let mut state = fx.session();
        state.add_detection(track_det(1, 0.0), 0).unwrap();
        state.add_detection(track_det(1, 5.0), 1).unwrap();
        assert!(state.frames_have_same_tracks(0, 1).unwrap());
        assert!(!state.frames_have_same_tracks(0, 2).unwrap());
        assert!(state.frames_have_same_tracks(0, 7).is_err());
    }

    #[test]
    fn test_step_copies_selection_when_enabled() {
        let fx = fixture(&[("clip", 3)]);
        let mut state = fx.session();
        state.set_current_detection(track_det(6, 1.0)).unwrap();

        state.step_frame(1).unwrap();
        assert!(state.detections().is_empty());

        state.step_frame(-1).unwrap();
        state.select_track(6);
        state.set_copy_annotations(true);
        state.step_frame(1).unwrap();
        assert_eq!(state.current_frame(), 1);
        assert_eq!(state.detections().to_vec(), vec![track_det(6, 1.0)]);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let fx = fixture(&[("a", 3), ("b", 4)]);
        let mut state = fx.session();
        state.set_current_video("b").unwrap();
        state.set_current_frame(3, None).unwrap();
        state.set_crop_region(Some(Bbox::new(1.0, 2.0, 3.0, 4.0)));
        state.set_delete_scope(DeleteScope::Following);
        let path = fx.output_dir().join("session.json");
        state.save_snapshot(&path).unwrap();

        let mut restored = fx.session();
        assert!(restored.load_snapshot(&path).unwrap());
        assert_eq!(restored.current_video(), Some("b"));
        assert_eq!(restored.current_frame(), 3);
        assert_eq!(restored.detection_crop(), Some(Bbox::new(1.0, 2.0, 3.0, 4.0)));
        assert_eq!(restored.delete_scope(), DeleteScope::Following);
        assert_eq!(restored.frame_mode(), FrameMode::Manual);

        let stale = SessionSnapshot {
            current_video: Some("gone".into()),
            current_frame: 50,
            ..Default::default()
        };
        restored.restore(&stale).unwrap();
        assert_eq!(restored.current_video(), Some("b"));
        assert_eq!(restored.current_frame(), 3);
    }

    #[test]
    fn test_remove_current_frame() {
        let fx = fixture(&[("clip", 3)]);
        let mut state = fx.session();
        state.set_current_frame(2, None).unwrap();
        state.add_detection(track_det(1, 0.0), 2).unwrap();
        state.flush().unwrap();

        state.remove_current_frame().unwrap();
        assert_eq!(state.frame_count(), 2);
        assert_eq!(state.current_frame(), 1);
        assert!(fx.data_dir().join("clip").join("frame2.png.not").exists());
        assert!(fx.output_dir().join("clip").join("frame2.txt.not").exists());
    }

    #[test]
    fn test_listener_removal() {
        let fx = fixture(&[("clip", 2)]);
        let mut state = fx.session();
        let listener = RecordingListener::new();
        let id = state.add_listener(listener.clone());
        assert!(state.remove_listener(id));
        assert!(!state.remove_listener(id));
        state.set_current_frame(1, None).unwrap();
        assert!(listener.events().is_empty());
    }

    #[test]
    fn test_out_of_range_writes_are_rejected() {
        let fx = fixture(&[("clip", 2)]);
        let mut state = fx.session();
        let err = state.add_detection(track_det(1, 0.0), 2).unwrap_err();
        assert!(matches!(err, AnnotationError::FrameOutOfRange { frame: 2, count: 2 }));
    }
}
