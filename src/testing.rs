// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! Shared test fixtures: scratch data/output directories with generated
//! frames, and a listener that records events.

use crate::models::{Bbox, Detection, SessionState, StateEvent, StateListener};
use image::{GrayImage, ImageBuffer, Luma};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Frame size used by generated videos.
pub const FRAME_SIZE: (u32, u32) = (32, 24);

pub struct Fixture {
    _dir: tempfile::TempDir,
    data: PathBuf,
    output: PathBuf,
}

impl Fixture {
    pub fn data_dir(&self) -> &Path {
        &self.data
    }

    pub fn output_dir(&self) -> &Path {
        &self.output
    }

    pub fn session(&self) -> SessionState {
        SessionState::new(&self.data, &self.output).unwrap()
    }
}

/// Textured background so frames are not uniform.
fn background(x: u32, y: u32) -> u8 {
    ((x * 7 + y * 13) % 50) as u8
}

/// Create `videos`, each a directory of `frameN.png` images.
pub fn fixture(videos: &[(&str, usize)]) -> Fixture {
    let dir = tempfile::TempDir::new().unwrap();
    let data = dir.path().join("data");
    let output = dir.path().join("output");
    for (name, frames) in videos {
        let video_dir = data.join(name);
        std::fs::create_dir_all(&video_dir).unwrap();
        let (w, h) = FRAME_SIZE;
        let img: GrayImage = ImageBuffer::from_fn(w, h, |x, y| Luma([background(x, y)]));
        for frame in 0..*frames {
            img.save(video_dir.join(format!("frame{frame}.png"))).unwrap();
        }
    }
    Fixture {
        _dir: dir,
        data,
        output,
    }
}

pub fn track_det(track_id: u32, x: f64) -> Detection {
    Detection::from_bbox(1, track_id, Bbox::new(x, 0.0, 4.0, 4.0))
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<StateEvent>>,
    frames: Mutex<Vec<usize>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<StateEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Current frame observed at every frame-change event.
    pub fn frames(&self) -> Vec<usize> {
        self.frames.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
        self.frames.lock().unwrap().clear();
    }
}

impl StateListener for RecordingListener {
    fn on_event(&self, event: StateEvent, state: &SessionState) {
        self.events.lock().unwrap().push(event);
        if event == StateEvent::CurrentFrameChanged {
            self.frames.lock().unwrap().push(state.current_frame());
        }
    }
}
