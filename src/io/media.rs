// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! Frame source for extracted videos.
//!
//! Every video lives in its own sub-directory of the data directory as a
//! sequence of still images. This module lists videos and frames, orders
//! frames naturally (`frame2` before `frame10`) and loads frame pixels for
//! the in-process tracker.

use crate::error::Result;
use image::GrayImage;
use regex::Regex;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// File extensions recognised as frames.
const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// One piece of a natural sort key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum KeyChunk {
    Number(u64),
    Text(String),
}

fn chunk_regex() -> Option<&'static Regex> {
    static CHUNKS: OnceLock<Option<Regex>> = OnceLock::new();
    CHUNKS
        .get_or_init(|| Regex::new(r"\d+|\D+").ok())
        .as_ref()
}

/// Split a name into alternating text and number chunks.
fn natural_key(name: &str) -> Vec<KeyChunk> {
    let Some(chunks) = chunk_regex() else {
        return vec![KeyChunk::Text(name.to_lowercase())];
    };
    chunks
        .find_iter(name)
        .map(|m| {
            let text = m.as_str();
            match text.parse::<u64>() {
                Ok(number) => KeyChunk::Number(number),
                Err(_) => KeyChunk::Text(text.to_lowercase()),
            }
        })
        .collect()
}

/// Numeric-aware comparison of two file names.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_key(a).cmp(&natural_key(b)).then_with(|| a.cmp(b))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The name under which a frame's annotations are stored: the basename
/// without extension.
pub fn frame_key(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// List the videos available under `data_dir`, one per sub-directory.
pub fn find_videos(data_dir: &Path) -> Result<Vec<String>> {
    if !data_dir.is_dir() {
        log::warn!("Data directory {} does not exist", data_dir.display());
        return Ok(Vec::new());
    }

    let mut videos = Vec::new();
    for entry in std::fs::read_dir(data_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            videos.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    videos.sort_by(|a, b| natural_cmp(a, b));
    Ok(videos)
}

/// Collect the frame images of a video, naturally sorted.
pub fn list_frames(video_dir: &Path) -> Result<Vec<PathBuf>> {
    if !video_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut frames = Vec::new();
    for entry in std::fs::read_dir(video_dir)? {
        let path = entry?.path();
        let is_frame = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_frame && path.is_file() {
            frames.push(path);
        }
    }

    frames.sort_by(|a, b| natural_cmp(&file_name(a), &file_name(b)));
    Ok(frames)
}

/// Read the dimensions of a frame without decoding all of its pixels.
pub fn frame_size(path: &Path) -> Result<(u32, u32)> {
    Ok(image::image_dimensions(path)?)
}

/// Decode a frame into 8-bit grayscale.
pub fn load_gray(path: &Path) -> Result<GrayImage> {
    Ok(image::open(path)?.to_luma8())
}
