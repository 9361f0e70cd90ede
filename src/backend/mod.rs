// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! Tracker and detector contracts and their backends.
//!
//! Engines only see the [`Tracker`] and [`Detector`] traits. Backends are
//! either in-process ([`template::TemplateTracker`]) or reached over the
//! socket protocol in [`rpc`] ([`remote::RemoteTracker`],
//! [`remote::RemoteDetector`]). Inference server processes are managed by
//! [`server::InferenceServer`].

pub mod remote;
pub mod rpc;
pub mod server;
pub mod template;

use crate::error::Result;
use crate::models::{Bbox, Detection, Polygon};
use std::path::Path;

/// Result of advancing a tracker by one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    Tracked { bbox: Bbox, polygon: Polygon },
    /// The target was lost; ends the run without an error.
    Lost,
}

/// Single-object tracker.
pub trait Tracker: Send {
    /// Start tracking `bbox` on the given frame.
    fn init(&mut self, frame: &Path, bbox: &Bbox) -> Result<()>;

    /// Advance to the next frame.
    fn track(&mut self, frame: &Path) -> Result<TrackOutcome>;

    /// Release model memory or the remote session. Called exactly once per
    /// run, on every exit path.
    fn terminate(&mut self);

    /// Name for logging.
    fn name(&self) -> &str;
}

/// Lazily produced `(frame_index, detections)` pairs of a sequence run.
pub type SequenceIter<'a> = Box<dyn Iterator<Item = Result<(usize, Vec<Detection>)>> + 'a>;

/// Object detector.
pub trait Detector: Send {
    /// Detect objects on one frame.
    fn detect(&mut self, frame: &Path, crop: Option<&Bbox>, model: &str) -> Result<Vec<Detection>>;

    /// Detect objects on every frame of a video directory, one element per
    /// frame as results become available.
    fn detect_sequence<'a>(
        &'a mut self,
        directory: &Path,
        frame_count: usize,
        crop: Option<&Bbox>,
        model: &str,
    ) -> Result<SequenceIter<'a>>;

    fn terminate(&mut self);

    fn name(&self) -> &str;
}

/// Builds a fresh tracker for every engine run.
pub type TrackerFactory = Box<dyn Fn() -> Result<Box<dyn Tracker>> + Send + Sync>;

/// Builds a fresh detector for every engine run.
pub type DetectorFactory = Box<dyn Fn() -> Result<Box<dyn Detector>> + Send + Sync>;
