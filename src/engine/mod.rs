// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! Cancellable background runs of trackers and detectors.
//!
//! An engine owns a backend factory and a worker thread. Each run builds a
//! fresh backend, drives it frame by frame against the shared session and
//! always terminates it and hands frame control back to the user, whatever
//! the outcome.

pub mod detection;
pub mod tracking;

pub use detection::{DetectionEngine, DetectionKind, DetectionOutcome};
pub use tracking::{TrackingEngine, TrackingOutcome};

use crate::error::{AnnotationError, Result};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Progress reported by a running engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent<O> {
    Started,
    /// Annotations for `frame` were written.
    Progress { frame: usize },
    Finished(O),
    Failed(String),
}

/// Optional event sink; a disconnected receiver is ignored.
#[derive(Clone)]
pub(crate) struct EventSink<O>(Option<Sender<EngineEvent<O>>>);

impl<O> EventSink<O> {
    pub(crate) fn new(sender: Option<Sender<EngineEvent<O>>>) -> Self {
        Self(sender)
    }

    pub(crate) fn send(&self, event: EngineEvent<O>) {
        if let Some(sender) = &self.0 {
            let _ = sender.send(event);
        }
    }
}

/// One background thread at a time plus its stop flag.
pub(crate) struct Worker<O> {
    name: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<O>>>,
}

impl<O: Send + 'static> Worker<O> {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Run `job` on a new thread. Fails with `EngineBusy` while a previous
    /// run is still going.
    pub(crate) fn spawn<F>(&mut self, job: F) -> Result<()>
    where
        F: FnOnce(Arc<AtomicBool>) -> Result<O> + Send + 'static,
    {
        if self.is_running() {
            return Err(AnnotationError::EngineBusy(self.name.clone()));
        }
        // Reap a finished run nobody joined.
        if let Some(previous) = self.handle.take() {
            let _ = previous.join();
        }

        self.stop.store(false, Ordering::SeqCst);
        let stop = Arc::clone(&self.stop);
        let handle = thread::Builder::new()
            .name(format!("engine-{}", self.name))
            .spawn(move || job(stop))?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Ask the running job to stop after its current frame.
    pub(crate) fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Wait for the last run. `None` if nothing was started since the last
    /// join.
    pub(crate) fn join(&mut self) -> Option<Result<O>> {
        let handle = self.handle.take()?;
        Some(
            handle
                .join()
                .unwrap_or_else(|_| Err(AnnotationError::EnginePanicked(self.name.clone()))),
        )
    }
}

impl<O> Drop for Worker<O> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Engine {} panicked", self.name);
            }
        }
    }
}

/// Report the end of a run on `events` and pass the result through.
pub(crate) fn report<O: Clone>(name: &str, events: &EventSink<O>, result: Result<O>) -> Result<O> {
    match &result {
        Ok(outcome) => events.send(EngineEvent::Finished(outcome.clone())),
        Err(e) => {
            log::error!("{} run failed: {}", name, e);
            events.send(EngineEvent::Failed(e.to_string()));
        }
    }
    result
}
