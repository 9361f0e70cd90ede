// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! Application configuration.
//!
//! Loaded from YAML; every field has a default so a partial file (or no
//! file at all) is valid.

use crate::error::{AnnotationError, Result};
use crate::io::serialization;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "vidlabel.yaml";

/// Socket settings shared by every remote backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Give up connecting after this long.
    pub connect_timeout_ms: u64,
    /// Give up waiting for a response after this long; 0 waits forever.
    pub read_timeout_ms: u64,
    /// Send frame pixels instead of paths (for servers that do not share
    /// the file system).
    pub send_image_bytes: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3000,
            read_timeout_ms: 60_000,
            send_image_bytes: false,
        }
    }
}

impl RpcConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }
}

/// How to launch an inference server process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Shell command; `{address}` and `{model}` are substituted.
    pub command: String,
    /// Address the server listens on.
    pub address: String,
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

fn default_startup_timeout_ms() -> u64 {
    30_000
}

impl ServerConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

/// Tuning of the in-process template tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Search window size relative to the box.
    pub search_scale: f64,
    /// Lowest normalized correlation still counted as a match.
    pub min_score: f32,
    /// Refresh the template from every tracked frame.
    pub update_template: bool,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            search_scale: 2.0,
            min_score: 0.8,
            update_template: true,
        }
    }
}

/// Which backend a configured tracker uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackerKind {
    Template,
    Remote { address: String },
}

/// One tracker offered to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerEntry {
    pub name: String,
    #[serde(flatten)]
    pub kind: TrackerKind,
    #[serde(default)]
    pub server: Option<ServerConfig>,
}

/// The detection backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub address: String,
    pub models: Vec<String>,
    pub server: Option<ServerConfig>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8786".to_string(),
            models: vec!["YOLO".to_string(), "OpenPifPaf".to_string()],
            server: None,
        }
    }
}

impl DetectorConfig {
    /// The model used when none is requested.
    pub fn default_model(&self) -> &str {
        self.models.first().map(String::as_str).unwrap_or("YOLO")
    }
}

/// Complete configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub session_file: PathBuf,
    pub player_step: isize,
    pub rpc: RpcConfig,
    pub template: TemplateConfig,
    pub trackers: Vec<TrackerEntry>,
    pub detector: DetectorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output"),
            session_file: PathBuf::from("output/session.json"),
            player_step: 1,
            rpc: RpcConfig::default(),
            template: TemplateConfig::default(),
            trackers: vec![
                TrackerEntry {
                    name: "Template".to_string(),
                    kind: TrackerKind::Template,
                    server: None,
                },
                TrackerEntry {
                    name: "SiamMask".to_string(),
                    kind: TrackerKind::Remote {
                        address: "127.0.0.1:8787".to_string(),
                    },
                    server: None,
                },
            ],
            detector: DetectorConfig::default(),
        }
    }
}

impl Config {
    /// Load `path`, or the defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("No configuration at {}; using defaults", path.display());
            return Ok(Self::default());
        }
        let config: Config = serialization::import_yaml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        serialization::export_yaml(self, path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.template.search_scale < 1.0 {
            return Err(AnnotationError::config("template.search_scale must be at least 1.0"));
        }
        if self.detector.models.is_empty() {
            return Err(AnnotationError::config("detector.models must not be empty"));
        }
        for (i, entry) in self.trackers.iter().enumerate() {
            if self.trackers[..i].iter().any(|other| other.name == entry.name) {
                return Err(AnnotationError::config(format!(
                    "duplicate tracker name {}",
                    entry.name
                )));
            }
        }
        Ok(())
    }

    pub fn tracker(&self, name: &str) -> Option<&TrackerEntry> {
        self.trackers
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_yaml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("vidlabel.yaml");
        std::fs::write(
            &path,
            "data_dir: /videos\n\
             rpc:\n  connect_timeout_ms: 500\n\
             trackers:\n\
             \x20 - name: KCF\n    kind: template\n\
             \x20 - name: Siam\n    kind: remote\n    address: 10.0.0.2:8787\n\
             \x20   server:\n      command: python -m tracker -p 8787\n      address: 10.0.0.2:8787\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/videos"));
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.rpc.connect_timeout_ms, 500);
        assert_eq!(config.rpc.read_timeout_ms, 60_000);
        assert_eq!(config.trackers.len(), 2);
        assert_eq!(config.tracker("siam").unwrap().kind, TrackerKind::Remote {
            address: "10.0.0.2:8787".to_string()
        });
        let server = config.trackers[1].server.as_ref().unwrap();
        assert_eq!(server.startup_timeout_ms, 30_000);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("vidlabel.yaml");
        let config = Config::default();
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_duplicate_tracker_rejected() {
        let mut config = Config::default();
        config.trackers.push(config.trackers[0].clone());
        assert!(matches!(config.validate(), Err(AnnotationError::Config(_))));
    }

    #[test]
    fn test_zero_read_timeout_waits_forever() {
        let rpc = RpcConfig {
            read_timeout_ms: 0,
            ..Default::default()
        };
        assert!(rpc.read_timeout().is_none());
    }
}
