// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! Follow the selected detection through the following frames.

use super::{report, EngineEvent, EventSink, Worker};
use crate::backend::{TrackOutcome, Tracker, TrackerFactory};
use crate::error::{AnnotationError, Result};
use crate::models::state::lock_session;
use crate::models::{Detection, FrameMode, SharedSession};
use crossbeam_channel::Sender;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// How a tracking run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingOutcome {
    /// Nothing was selected, so nothing was tracked.
    NoSelection,
    /// Reached the end of the video.
    Completed { last_frame: usize },
    /// The tracker lost the target on `frame`.
    Lost { frame: usize },
    /// Stopped by the user (or a video switch) after `frame`.
    Cancelled { frame: usize },
}

/// Everything captured from the session when a run starts.
struct Seed {
    detection: Detection,
    video: String,
    start: usize,
    frames: Vec<PathBuf>,
}

/// Runs one tracker algorithm in the background.
pub struct TrackingEngine {
    name: String,
    session: SharedSession,
    factory: TrackerFactory,
    worker: Worker<TrackingOutcome>,
    events: EventSink<TrackingOutcome>,
}

impl TrackingEngine {
    pub fn new(name: impl Into<String>, session: SharedSession, factory: TrackerFactory) -> Self {
        let name = name.into();
        Self {
            worker: Worker::new(&name),
            name,
            session,
            factory,
            events: EventSink::new(None),
        }
    }

    /// Publish run events on `sender`.
    pub fn with_events(mut self, sender: Sender<EngineEvent<TrackingOutcome>>) -> Self {
        self.events = EventSink::new(Some(sender));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Track the current selection on a background thread.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_running() {
            return Err(AnnotationError::EngineBusy(self.name.clone()));
        }
        let mut tracker = (self.factory)()?;
        let session = SharedSession::clone(&self.session);
        let events = self.events.clone();
        let name = self.name.clone();
        self.worker.spawn(move |stop| {
            events.send(EngineEvent::Started);
            let result = run_tracking(&session, tracker.as_mut(), &stop, &|frame| {
                events.send(EngineEvent::Progress { frame })
            });
            report(&name, &events, result)
        })
    }

    /// Track the current selection on the calling thread.
    pub fn run_blocking(&mut self) -> Result<TrackingOutcome> {
        if self.worker.is_running() {
            return Err(AnnotationError::EngineBusy(self.name.clone()));
        }
        let mut tracker = (self.factory)()?;
        let stop = AtomicBool::new(false);
        self.events.send(EngineEvent::Started);
        let result = run_tracking(&self.session, tracker.as_mut(), &stop, &|frame| {
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

    /// Wait for the background run started last.
    pub fn join(&mut self) -> Option<Result<TrackingOutcome>> {
        self.worker.join()
    }
}

/// Track the session's selected detection from the current frame onwards.
///
/// Each tracked box is written to its frame. Navigation follows the tracker
/// while the session stays in controlled mode, or when the user happens to
/// be on the frame just written. The tracker is terminated exactly once and
/// the mode is handed back to the user on every exit path.
pub fn run_tracking(
    session: &SharedSession,
    tracker: &mut dyn Tracker,
    stop: &AtomicBool,
    progress: &dyn Fn(usize),
) -> Result<TrackingOutcome> {
    let seed = {
        let mut state = lock_session(session);
        let detection = state.current_detection().cloned();
        let video = state.current_video().map(str::to_string);
        match (detection, video) {
            (Some(detection), Some(video)) => {
                let seed = Seed {
                    detection,
                    video,
                    start: state.current_frame(),
                    frames: state.frame_paths().to_vec(),
                };
                state.set_frame_mode(FrameMode::Controlled);
                seed
            }
            _ => {
                tracker.terminate();
                log::info!("{}: no detection selected", tracker.name());
                return Ok(TrackingOutcome::NoSelection);
            }
        }
    };

    log::info!(
        "{}: tracking track {} from frame {}",
        tracker.name(),
        seed.detection.track_id,
        seed.start
    );
    let result = follow(session, tracker, &seed, stop, progress);

    tracker.terminate();
    lock_session(session).set_frame_mode(FrameMode::Manual);

    if let Ok(outcome) = &result {
        log::info!("{}: {:?}", tracker.name(), outcome);
    }
    result
}

fn follow(
    session: &SharedSession,
    tracker: &mut dyn Tracker,
    seed: &Seed,
    stop: &AtomicBool,
    progress: &dyn Fn(usize),
) -> Result<TrackingOutcome> {
    let first = seed
        .frames
        .get(seed.start)
        .ok_or(AnnotationError::FrameOutOfRange {
            frame: seed.start,
            count: seed.frames.len(),
        })?;
    tracker.init(first, &seed.detection.bbox)?;

    let mut last_frame = seed.start;
    for frame in seed.start + 1..seed.frames.len() {
        if stop.load(Ordering::SeqCst) {
            return Ok(TrackingOutcome::Cancelled { frame: last_frame });
        }

        let (bbox, polygon) = match tracker.track(&seed.frames[frame])? {
            TrackOutcome::Tracked { bbox, polygon } => (bbox, polygon),
            TrackOutcome::Lost => return Ok(TrackingOutcome::Lost { frame }),
        };
        let detection = Detection::new(
            seed.detection.class_id,
            seed.detection.track_id,
            bbox,
            polygon,
        );

        {
            let mut state = lock_session(session);
            if state.current_video() != Some(seed.video.as_str()) {
                log::info!("Video changed during tracking; stopping");
                return Ok(TrackingOutcome::Cancelled { frame: last_frame });
            }
            state.add_detection(detection, frame)?;
            if state.frame_mode() == FrameMode::Controlled || state.current_frame() == frame {
                state.set_current_frame(frame, None)?;
                state.select_track(seed.detection.track_id);
            }
        }

        last_frame = frame;
        progress(frame);
    }
    Ok(TrackingOutcome::Completed { last_frame })
}
