// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! Error types for the annotation library.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for the annotation library
pub type Result<T> = std::result::Result<T, AnnotationError>;

/// Errors that can occur while annotating, tracking or detecting.
#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error("Connection to inference backend at {address} failed: {source}")]
    Connection {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Inference backend error: {0}")]
    Remote(String),

    #[error("Malformed backend response: {0}")]
    Protocol(String),

    #[error("Tracker failed: {0}")]
    Tracker(String),

    #[error("Detector failed: {0}")]
    Detector(String),

    #[error("Failed to persist annotations to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown video: {0}")]
    UnknownVideo(String),

    #[error("Frame {frame} out of range (video has {count} frames)")]
    FrameOutOfRange { frame: usize, count: usize },

    #[error("Engine {0} is already running")]
    EngineBusy(String),

    #[error("Engine {0} panicked")]
    EnginePanicked(String),

    #[error("Inference server error: {0}")]
    Server(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl AnnotationError {
    pub fn connection<S: Into<String>>(address: S, source: std::io::Error) -> Self {
        Self::Connection {
            address: address.into(),
            source,
        }
    }

    pub fn persist<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::Persist {
            path: path.into(),
            source,
        }
    }

    pub fn remote<S: Into<String>>(msg: S) -> Self {
        Self::Remote(msg.into())
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn tracker<S: Into<String>>(msg: S) -> Self {
        Self::Tracker(msg.into())
    }

    pub fn detector<S: Into<String>>(msg: S) -> Self {
        Self::Detector(msg.into())
    }

    pub fn server<S: Into<String>>(msg: S) -> Self {
        Self::Server(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error came from talking to an inference backend.
    ///
    /// Backend errors end the current engine run but never invalidate
    /// annotations written earlier in that run.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Remote(_) | Self::Protocol(_)
        )
    }
}
