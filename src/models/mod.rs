// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! Annotation data model: geometry, detections, per-video storage and
//! the session state machine.

pub mod detection;
pub mod geometry;
pub mod state;
pub mod track_store;

pub use detection::Detection;
pub use geometry::{Bbox, Point, Polygon};
pub use state::{
    DeleteScope, FrameMode, ListenerId, SessionSnapshot, SessionState, SharedSession,
    StateEvent, StateListener,
};
pub use track_store::TrackStore;
