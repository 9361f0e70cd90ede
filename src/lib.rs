// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! Frame-by-frame video annotation.
//!
//! Videos are directories of extracted frames. Annotations (class, track
//! identity, box and polygon per object) are kept per frame by a
//! [`models::TrackStore`] and mirrored to disk in a generic and a YOLO
//! layout. [`models::SessionState`] owns navigation and the frame-control
//! mode; trackers and detectors run as cancellable background engines
//! ([`engine`]) against the shared session, either in process or through an
//! inference server reached over a socket ([`backend`]).

pub mod app;
pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod io;
pub mod models;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{AnnotationError, Result};
