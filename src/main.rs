// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! vidlabel - frame-by-frame video annotation
//!
//! Command-line front end: inspect annotations, add boxes, and run trackers
//! and detectors over videos stored as frame directories.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use vidlabel::app::AnnotationApp;
use vidlabel::config::{Config, DEFAULT_CONFIG_FILE};
use vidlabel::engine::DetectionKind;
use vidlabel::io::serialization;
use vidlabel::models::state::lock_session;
use vidlabel::models::{Bbox, DeleteScope, FrameMode};

#[derive(Parser)]
#[command(name = "vidlabel")]
#[command(about = "Annotate videos frame by frame with tracked boxes")]
struct Cli {
    /// Configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List videos and their frame counts
    Videos,
    /// Print the detections of one frame
    Show {
        #[arg(long)]
        video: String,
        #[arg(long)]
        frame: usize,
    },
    /// Add a box under a new track id
    Add {
        #[arg(long)]
        video: String,
        #[arg(long)]
        frame: usize,
        /// Box as x,y,width,height in pixels
        #[arg(long, value_parser = parse_bbox)]
        bbox: Bbox,
        #[arg(long, default_value_t = 0)]
        class: u32,
    },
    /// Track an existing detection through the following frames
    Track {
        #[arg(long)]
        video: String,
        #[arg(long)]
        frame: usize,
        #[arg(long)]
        track_id: u32,
        /// Tracker name from the configuration
        #[arg(long)]
        tracker: Option<String>,
    },
    /// Run the detector on one frame or the whole video
    Detect {
        #[arg(long)]
        video: String,
        #[arg(long, default_value_t = 0)]
        frame: usize,
        /// Detect every frame instead of one
        #[arg(long)]
        sequence: bool,
        #[arg(long)]
        model: Option<String>,
    },
    /// Delete a track from a frame and optionally its neighbours
    Delete {
        #[arg(long)]
        video: String,
        #[arg(long)]
        frame: usize,
        #[arg(long)]
        track_id: u32,
        #[arg(long, value_enum, default_value_t = Scope::CurrentFrame)]
        scope: Scope,
    },
    /// Change the class of a track from a frame onwards
    Reclass {
        #[arg(long)]
        video: String,
        #[arg(long)]
        frame: usize,
        #[arg(long)]
        track_id: u32,
        #[arg(long)]
        class: u32,
    },
    /// Write the default configuration
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Scope {
    CurrentFrame,
    Following,
    Previous,
}

impl From<Scope> for DeleteScope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::CurrentFrame => DeleteScope::CurrentFrame,
            Scope::Following => DeleteScope::Following,
            Scope::Previous => DeleteScope::Previous,
        }
    }
}

fn parse_bbox(value: &str) -> std::result::Result<Bbox, String> {
    let parts: Vec<f64> = value
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| format!("invalid number in box: {}", e))?;
    match parts.as_slice() {
        [x, y, w, h] if *w > 0.0 && *h > 0.0 => Ok(Bbox::new(*x, *y, *w, *h)),
        [_, _, _, _] => Err("box width and height must be positive".to_string()),
        _ => Err("expected x,y,width,height".to_string()),
    }
}

/// Make `video`/`frame` current.
fn open(app: &AnnotationApp, video: &str, frame: usize) -> Result<()> {
    let mut state = lock_session(app.session());
    state
        .set_current_video(video)
        .with_context(|| format!("cannot open video {}", video))?;
    if frame >= state.frame_count() {
        return Err(anyhow!(
            "frame {} out of range ({} has {} frames)",
            frame,
            video,
            state.frame_count()
        ));
    }
    state.set_current_frame(frame, Some(FrameMode::Manual))?;
    Ok(())
}

fn select(app: &AnnotationApp, track_id: u32) -> Result<()> {
    let mut state = lock_session(app.session());
    let frame = state.current_frame();
    state
        .select_track(track_id)
        .map(|_| ())
        .ok_or_else(|| anyhow!("track {} not found on frame {}", track_id, frame))
}

fn init_config(path: &std::path::Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(anyhow!("{} exists; pass --force to overwrite", path.display()));
    }
    Config::default().save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let command = match cli.command {
        Command::InitConfig { force } => return init_config(&cli.config, force),
        command => command,
    };

    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let mut app = AnnotationApp::new(config)?;

    match command {
        Command::Videos => {
            let videos = lock_session(app.session()).video_list().to_vec();
            for video in videos {
                let mut state = lock_session(app.session());
                state.set_current_video(&video)?;
                println!("{}\t{} frames", video, state.frame_count());
            }
        }
        Command::Show { video, frame } => {
            open(&app, &video, frame)?;
            let state = lock_session(app.session());
            print!("{}", serialization::format_generic(state.detections()));
        }
        Command::Add {
            video,
            frame,
            bbox,
            class,
        } => {
            open(&app, &video, frame)?;
            let detection = app.add_box(bbox, class)?;
            println!("Added track {}", detection.track_id);
            app.shutdown()?;
        }
        Command::Track {
            video,
            frame,
            track_id,
            tracker,
        } => {
            if let Some(name) = tracker.as_deref() {
                app.enable_tracker(name)?;
            }
            open(&app, &video, frame)?;
            select(&app, track_id)?;
            let outcome = app.track_blocking()?;
            println!("{:?}", outcome);
            app.shutdown()?;
        }
        Command::Detect {
            video,
            frame,
            sequence,
            model,
        } => {
            open(&app, &video, frame)?;
            let kind = if sequence {
                DetectionKind::Sequence
            } else {
                DetectionKind::Frame
            };
            let outcome = app.detect_blocking(kind, model.as_deref())?;
            println!("{:?}", outcome);
            app.shutdown()?;
        }
        Command::Delete {
            video,
            frame,
            track_id,
            scope,
        } => {
            open(&app, &video, frame)?;
            let edited = lock_session(app.session())
                .remove_detection_and_propagate(track_id, Some(scope.into()))?;
            println!("Removed track {} from {} frame(s)", track_id, edited);
            app.shutdown()?;
        }
        Command::Reclass {
            video,
            frame,
            track_id,
            class,
        } => {
            open(&app, &video, frame)?;
            let edited = lock_session(app.session())
                .modify_class_and_propagate_forward(track_id, class)?;
            println!("Set class {} on {} frame(s)", class, edited);
            app.shutdown()?;
        }
        Command::InitConfig { .. } => {}
    }

    Ok(())
}
