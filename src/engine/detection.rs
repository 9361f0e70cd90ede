// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! Object detection on the displayed frame or over a whole video.

use super::{report, EngineEvent, EventSink, Worker};
use crate::backend::{Detector, DetectorFactory};
use crate::error::{AnnotationError, Result};
use crate::models::state::lock_session;
use crate::models::{FrameMode, SharedSession};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};

/// What a detection run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionKind {
    /// Only the displayed frame.
    Frame,
    /// Every frame of the current video.
    Sequence,
}

/// How a detection run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionOutcome {
    Frame { frame: usize, count: usize },
    Sequence { frames: usize },
    /// Stopped after writing `frames` frames.
    Cancelled { frames: usize },
}

/// Runs the object detector in the background.
pub struct DetectionEngine {
    name: String,
    session: SharedSession,
    factory: DetectorFactory,
    worker: Worker<DetectionOutcome>,
    events: EventSink<DetectionOutcome>,
}

impl DetectionEngine {
    pub fn new(name: impl Into<String>, session: SharedSession, factory: DetectorFactory) -> Self {
        let name = name.into();
        Self {
            worker: Worker::new(&name),
            name,
            session,
            factory,
            events: EventSink::new(None),
        }
    }

    pub fn with_events(mut self, sender: Sender<EngineEvent<DetectionOutcome>>) -> Self {
        self.events = EventSink::new(Some(sender));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&mut self, kind: DetectionKind, model: &str) -> Result<()> {
        if self.worker.is_running() {
            return Err(AnnotationError::EngineBusy(self.name.clone()));
        }
        let mut detector = (self.factory)()?;
        let session = SharedSession::clone(&self.session);
        let events = self.events.clone();
        let name = self.name.clone();
        let model = model.to_string();
        self.worker.spawn(move |stop| {
            events.send(EngineEvent::Started);
            let result = run_detection(&session, detector.as_mut(), kind, &model, &stop, &|frame| {
                events.send(EngineEvent::Progress { frame })
            });
            report(&name, &events, result)
        })
    }

    pub fn run_blocking(&mut self, kind: DetectionKind, model: &str) -> Result<DetectionOutcome> {
        if self.worker.is_running() {
            return Err(AnnotationError::EngineBusy(self.name.clone()));
        }
        let mut detector = (self.factory)()?;
        let stop = AtomicBool::new(false);
        self.events.send(EngineEvent::Started);
        let result = run_detection(&self.session, detector.as_mut(), kind, model, &stop, &|frame| {
            self.events.send(EngineEvent::Progress { frame })
        });
        report(&self.name, &self.events, result)
    }

    pub fn stop(&self) {
        self.worker.stop();
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    pub fn join(&mut self) -> Option<Result<DetectionOutcome>> {
        self.worker.join()
    }
}

/// Run `detector` once. The detector is terminated on every exit path and
/// a sequence run always hands frame control back to the user.
pub fn run_detection(
    session: &SharedSession,
    detector: &mut dyn Detector,
    kind: DetectionKind,
    model: &str,
    stop: &AtomicBool,
    progress: &dyn Fn(usize),
) -> Result<DetectionOutcome> {
    log::info!("{}: {:?} detection with {}", detector.name(), kind, model);
    let result = match kind {
        DetectionKind::Frame => detect_frame(session, detector, model, progress),
        DetectionKind::Sequence => detect_sequence(session, detector, model, stop, progress),
    };

    detector.terminate();
    if kind == DetectionKind::Sequence {
        lock_session(session).set_frame_mode(FrameMode::Manual);
    }
    result
}

fn detect_frame(
    session: &SharedSession,
    detector: &mut dyn Detector,
    model: &str,
    progress: &dyn Fn(usize),
) -> Result<DetectionOutcome> {
    let (video, frame, path, crop) = {
        let state = lock_session(session);
        let frame = state.current_frame();
        let path = state
            .frame_path(frame)
            .map(|p| p.to_path_buf())
            .ok_or(AnnotationError::FrameOutOfRange {
                frame,
                count: state.frame_count(),
            })?;
        (
            state.current_video().map(str::to_string),
            frame,
            path,
            state.detection_crop(),
        )
    };

    let detections = detector.detect(&path, crop.as_ref(), model)?;
    let count = detections.len();

    let mut state = lock_session(session);
    if state.current_video().map(str::to_string) != video {
        log::info!("Video changed during detection; discarding result");
        return Ok(DetectionOutcome::Cancelled { frames: 0 });
    }
    state.set_detections(detections, frame)?;
    // Re-navigate so viewers redraw even when the frame is already shown.
    state.set_current_frame(frame, None)?;
    drop(state);

    progress(frame);
    Ok(DetectionOutcome::Frame { frame, count })
}

fn detect_sequence(
    session: &SharedSession,
    detector: &mut dyn Detector,
    model: &str,
    stop: &AtomicBool,
    progress: &dyn Fn(usize),
) -> Result<DetectionOutcome> {
    let (video, directory, frame_count, crop) = {
        let mut state = lock_session(session);
        let (video, directory) = match (state.current_video(), state.video_dir()) {
            (Some(video), Some(directory)) => (video.to_string(), directory),
            _ => return Err(AnnotationError::UnknownVideo("no video is open".to_string())),
        };
        let frame_count = state.frame_count();
        let crop = state.detection_crop();
        state.set_frame_mode(FrameMode::Controlled);
        (video, directory, frame_count, crop)
    };

    let mut frames = 0;
    if stop.load(Ordering::SeqCst) {
        return Ok(DetectionOutcome::Cancelled { frames });
    }
    for item in detector.detect_sequence(&directory, frame_count, crop.as_ref(), model)? {
        let (frame, detections) = item?;

        {
            let mut state = lock_session(session);
            if state.current_video() != Some(video.as_str()) {
                log::info!("Video changed during sequence detection; stopping");
                return Ok(DetectionOutcome::Cancelled { frames });
            }
            state.set_detections(detections, frame)?;
            if state.frame_mode() == FrameMode::Controlled || state.current_frame() == frame {
                state.set_current_frame(frame, None)?;
            }
        }

        frames += 1;
        progress(frame);
        // The frame that was in flight is kept.
        if stop.load(Ordering::SeqCst) && frames < frame_count {
            return Ok(DetectionOutcome::Cancelled { frames });
        }
    }
    Ok(DetectionOutcome::Sequence { frames })
}
