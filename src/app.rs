// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! Application controller.
//!
//! `AnnotationApp` wires the configuration, the shared session, one
//! tracking engine per configured tracker, the detection engine and any
//! inference servers the configuration says how to launch. Front ends (the
//! CLI, or a viewer) drive annotation through it.

use crate::backend::remote::{RemoteDetector, RemoteTracker};
use crate::backend::server::InferenceServer;
use crate::backend::template::TemplateTracker;
use crate::backend::{Detector, DetectorFactory, Tracker, TrackerFactory};
use crate::config::{Config, ServerConfig, TrackerEntry, TrackerKind};
use crate::engine::{DetectionEngine, DetectionKind, DetectionOutcome, TrackingEngine, TrackingOutcome};
use crate::error::{AnnotationError, Result};
use crate::models::state::lock_session;
use crate::models::{Bbox, Detection, SessionState, SharedSession, StateEvent};
use std::collections::HashMap;

/// Server key of the detector.
const DETECTOR_KEY: &str = "detector";

fn tracker_factory(entry: &TrackerEntry, config: &Config) -> TrackerFactory {
    match &entry.kind {
        TrackerKind::Template => {
            let tuning = config.template.clone();
            Box::new(move || Ok(Box::new(TemplateTracker::new(tuning.clone())) as Box<dyn Tracker>))
        }
        TrackerKind::Remote { address } => {
            let name = entry.name.clone();
            let address = address.clone();
            let rpc = config.rpc.clone();
            Box::new(move || {
                Ok(Box::new(RemoteTracker::new(name.clone(), address.clone(), rpc.clone()))
                    as Box<dyn Tracker>)
            })
        }
    }
}

fn detector_factory(config: &Config) -> DetectorFactory {
    let address = config.detector.address.clone();
    let rpc = config.rpc.clone();
    Box::new(move || {
        Ok(Box::new(RemoteDetector::new(DETECTOR_KEY, address.clone(), rpc.clone())) as Box<dyn Detector>)
    })
}

/// Main application state.
pub struct AnnotationApp {
    config: Config,
    session: SharedSession,
    trackers: Vec<TrackingEngine>,
    enabled_tracker: usize,
    auto_track: bool,
    detector: DetectionEngine,
    servers: HashMap<String, InferenceServer>,
}

impl AnnotationApp {
    /// Open a session over the configured directories.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let mut state = SessionState::new(&config.data_dir, &config.output_dir)?;
        state.set_player_step(config.player_step);
        let session = state.into_shared();

        let trackers = config
            .trackers
            .iter()
            .map(|entry| {
                TrackingEngine::new(
                    entry.name.clone(),
                    SharedSession::clone(&session),
                    tracker_factory(entry, &config),
                )
            })
            .collect();
        let detector = DetectionEngine::new(
            DETECTOR_KEY,
            SharedSession::clone(&session),
            detector_factory(&config),
        );

        Ok(Self {
            config,
            session,
            trackers,
            enabled_tracker: 0,
            auto_track: false,
            detector,
            servers: HashMap::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    /// Apply the saved session snapshot, if there is one.
    pub fn restore_session(&mut self) -> Result<bool> {
        let restored = lock_session(&self.session).load_snapshot(&self.config.session_file)?;
        if restored {
            log::info!("Restored session from {}", self.config.session_file.display());
        }
        Ok(restored)
    }

    pub fn tracker_names(&self) -> Vec<&str> {
        self.trackers.iter().map(TrackingEngine::name).collect()
    }

    pub fn enabled_tracker(&self) -> Option<&str> {
        self.trackers.get(self.enabled_tracker).map(TrackingEngine::name)
    }

    /// Choose the tracker used by [`Self::start_tracking`] (case-insensitive).
    pub fn enable_tracker(&mut self, name: &str) -> Result<()> {
        self.enabled_tracker = self
            .trackers
            .iter()
            .position(|t| t.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| AnnotationError::config(format!("no tracker named {}", name)))?;
        Ok(())
    }

    /// Start tracking automatically whenever a new box is added.
    pub fn set_auto_track(&mut self, enabled: bool) {
        self.auto_track = enabled;
    }

    /// Annotate a new object on the displayed frame under a fresh track id.
    pub fn add_box(&mut self, bbox: Bbox, class_id: u32) -> Result<Detection> {
        let detection = {
            let mut state = lock_session(&self.session);
            let track_id = state.new_track_id()?;
            let detection = Detection::from_bbox(class_id, track_id, bbox);
            let frame = state.current_frame();
            state.add_detection(detection.clone(), frame)?;
            state.notify(StateEvent::DetectionsChanged);
            detection
        };
        log::debug!("Added track {} (class {})", detection.track_id, detection.class_id);

        if self.auto_track {
            self.start_tracking()?;
        }
        Ok(detection)
    }

    fn tracker_index(&self) -> Result<usize> {
        if self.enabled_tracker < self.trackers.len() {
            Ok(self.enabled_tracker)
        } else {
            Err(AnnotationError::config("no tracker configured"))
        }
    }

    /// Track the selection with the enabled tracker on a background thread.
    pub fn start_tracking(&mut self) -> Result<()> {
        let index = self.tracker_index()?;
        let key = self.trackers[index].name().to_string();
        self.ensure_server(&key, None)?;
        self.trackers[index].start()
    }

    /// Wait for the enabled tracker's background run and stop its server.
    pub fn join_tracking(&mut self) -> Option<Result<TrackingOutcome>> {
        let index = self.tracker_index().ok()?;
        let result = self.trackers[index].join();
        let key = self.trackers[index].name().to_string();
        self.release_server(&key);
        result
    }

    /// Track the selection with the enabled tracker on this thread.
    pub fn track_blocking(&mut self) -> Result<TrackingOutcome> {
        let index = self.tracker_index()?;
        let key = self.trackers[index].name().to_string();
        self.ensure_server(&key, None)?;
        let result = self.trackers[index].run_blocking();
        self.release_server(&key);
        result
    }

    pub fn start_detection(&mut self, kind: DetectionKind, model: Option<&str>) -> Result<()> {
        let model = self.model_or_default(model);
        self.ensure_server(DETECTOR_KEY, Some(&model))?;
        self.detector.start(kind, &model)
    }

    pub fn join_detection(&mut self) -> Option<Result<DetectionOutcome>> {
        let result = self.detector.join();
        self.release_server(DETECTOR_KEY);
        result
    }

    pub fn detect_blocking(&mut self, kind: DetectionKind, model: Option<&str>) -> Result<DetectionOutcome> {
        let model = self.model_or_default(model);
        self.ensure_server(DETECTOR_KEY, Some(&model))?;
        let result = self.detector.run_blocking(kind, &model);
        self.release_server(DETECTOR_KEY);
        result
    }

    fn model_or_default(&self, model: Option<&str>) -> String {
        model
            .unwrap_or_else(|| self.config.detector.default_model())
            .to_string()
    }

    /// Ask every running engine to stop after its current frame.
    pub fn stop_all(&self) {
        for engine in &self.trackers {
            engine.stop();
        }
        self.detector.stop();
    }

    pub fn is_busy(&self) -> bool {
        self.detector.is_running() || self.trackers.iter().any(TrackingEngine::is_running)
    }

    fn server_config(&self, key: &str) -> Option<&ServerConfig> {
        if key == DETECTOR_KEY {
            self.config.detector.server.as_ref()
        } else {
            self.config
                .trackers
                .iter()
                .find(|t| t.name == key)
                .and_then(|t| t.server.as_ref())
        }
    }

    /// Launch the server behind `key` and wait until it accepts connections.
    /// Backends without a launch command are assumed to be running already.
    pub fn start_server(&mut self, key: &str, model: Option<&str>) -> Result<()> {
        let Some(config) = self.server_config(key).cloned() else {
            return Err(AnnotationError::server(format!("no server configured for {}", key)));
        };
        let mut server = InferenceServer::new(key, config);
        if let Some(model) = model {
            server = server.with_model(model);
        }
        server.start()?;
        server.wait_ready()?;
        self.servers.insert(key.to_string(), server);
        Ok(())
    }

    pub fn stop_server(&mut self, key: &str) -> Result<()> {
        match self.servers.remove(key) {
            Some(mut server) => server.stop(),
            None => Ok(()),
        }
    }

    pub fn server_running(&mut self, key: &str) -> bool {
        self.servers
            .get_mut(key)
            .is_some_and(InferenceServer::is_running)
    }

    fn ensure_server(&mut self, key: &str, model: Option<&str>) -> Result<()> {
        if self.server_config(key).is_none() || self.server_running(key) {
            return Ok(());
        }
        self.start_server(key, model)
    }

    fn release_server(&mut self, key: &str) {
        if let Err(e) = self.stop_server(key) {
            log::warn!("{}", e);
        }
    }

    /// Stop engines and servers, then persist annotations and the session.
    pub fn shutdown(&mut self) -> Result<()> {
        self.stop_all();
        for engine in &mut self.trackers {
            if let Some(Err(e)) = engine.join() {
                log::warn!("{}: {}", engine.name(), e);
            }
        }
        if let Some(Err(e)) = self.detector.join() {
            log::warn!("{}: {}", self.detector.name(), e);
        }
        let keys: Vec<String> = self.servers.keys().cloned().collect();
        for key in keys {
            self.release_server(&key);
        }
        lock_session(&self.session).save_snapshot(&self.config.session_file)
    }
}
