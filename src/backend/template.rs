// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! In-process tracker based on normalized cross-correlation.
//!
//! The initial box is cut out as a grayscale template. On every following
//! frame the template is matched inside a search window centred on the
//! previous position; the best match becomes the new box. A best score below
//! `min_score`, or a window that no longer fits the template, counts as
//! losing the target.

use super::{TrackOutcome, Tracker};
use crate::config::TemplateConfig;
use crate::error::{AnnotationError, Result};
use crate::io::media;
use crate::models::{Bbox, Polygon};
use image::{imageops, GrayImage};
use imageproc::template_matching::{find_extremes, match_template, MatchTemplateMethod};
use std::path::Path;

/// Pixel rectangle `(x, y, width, height)`.
type Rect = (u32, u32, u32, u32);

pub struct TemplateTracker {
    config: TemplateConfig,
    template: Option<GrayImage>,
    position: Option<Rect>,
}

impl TemplateTracker {
    pub fn new(config: TemplateConfig) -> Self {
        Self {
            config,
            template: None,
            position: None,
        }
    }

    /// Round a box to whole pixels inside an image.
    fn pixel_rect(bbox: &Bbox, width: u32, height: u32) -> Option<Rect> {
        let clamped = bbox.clamp_to(width, height)?;
        let left = clamped.x.floor() as u32;
        let top = clamped.y.floor() as u32;
        let right = ((clamped.x + clamped.width).ceil() as u32).min(width);
        let bottom = ((clamped.y + clamped.height).ceil() as u32).min(height);
        Some((left, top, right.saturating_sub(left), bottom.saturating_sub(top)))
    }

    fn rect_to_bbox(rect: Rect) -> Bbox {
        let (x, y, w, h) = rect;
        Bbox::new(x as f64, y as f64, w as f64, h as f64)
    }
}

impl Tracker for TemplateTracker {
    fn init(&mut self, frame: &Path, bbox: &Bbox) -> Result<()> {
        let image = media::load_gray(frame)?;
        let rect = Self::pixel_rect(bbox, image.width(), image.height())
            .ok_or_else(|| AnnotationError::tracker("initial box lies outside the frame"))?;
        let (x, y, w, h) = rect;
        if w < 2 || h < 2 {
            return Err(AnnotationError::tracker("initial box is too small to track"));
        }
        self.template = Some(imageops::crop_imm(&image, x, y, w, h).to_image());
        self.position = Some(rect);
        log::debug!("Template tracker initialised with {}x{} template", w, h);
        Ok(())
    }

    fn track(&mut self, frame: &Path) -> Result<TrackOutcome> {
        let (template, position) = match (&self.template, self.position) {
            (Some(template), Some(position)) => (template, position),
            _ => return Err(AnnotationError::tracker("track called before init")),
        };
        let image = media::load_gray(frame)?;
        let (tw, th) = template.dimensions();

        let previous = Self::rect_to_bbox(position);
        let scale = self.config.search_scale.max(1.0);
        let search = Bbox::from_center_size(
            previous.center(),
            (tw as f64 * scale, th as f64 * scale),
        );
        let (wx, wy, ww, wh) = match Self::pixel_rect(&search, image.width(), image.height()) {
            Some(window) => window,
            None => return Ok(TrackOutcome::Lost),
        };
        if ww < tw || wh < th {
            log::debug!("Search window {}x{} smaller than template", ww, wh);
            return Ok(TrackOutcome::Lost);
        }

        let window = imageops::crop_imm(&image, wx, wy, ww, wh).to_image();
        let scores = match_template(&window, template, MatchTemplateMethod::CrossCorrelationNormalized);
        let extremes = find_extremes(&scores);

        // NaN scores (flat patches) compare false and count as loss.
        if !(extremes.max_value >= self.config.min_score) {
            log::debug!("Best match score {} below threshold", extremes.max_value);
            return Ok(TrackOutcome::Lost);
        }

        let (mx, my) = extremes.max_value_location;
        let rect = (wx + mx, wy + my, tw, th);
        if self.config.update_template {
            self.template = Some(imageops::crop_imm(&image, rect.0, rect.1, tw, th).to_image());
        }
        self.position = Some(rect);

        let bbox = Self::rect_to_bbox(rect);
        Ok(TrackOutcome::Tracked {
            bbox,
            polygon: Polygon::from_bbox(&bbox),
        })
    }

    fn terminate(&mut self) {
        self.template = None;
        self.position = None;
    }

    fn name(&self) -> &str {
        "template"
    }
}
