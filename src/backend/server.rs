// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! Lifecycle of inference server processes.
//!
//! A server is started from a shell command line, polled until its socket
//! accepts connections, and killed when stopped or dropped.

use crate::config::ServerConfig;
use crate::error::{AnnotationError, Result};
use std::net::{TcpStream, ToSocketAddrs};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct InferenceServer {
    name: String,
    config: ServerConfig,
    model: Option<String>,
    child: Option<Child>,
}

impl InferenceServer {
    pub fn new(name: impl Into<String>, config: ServerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            model: None,
            child: None,
        }
    }

    /// Model substituted for `{model}` in the command line.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    pub fn command_line(&self) -> String {
        self.config
            .command
            .replace("{address}", &self.config.address)
            .replace("{model}", self.model.as_deref().unwrap_or(""))
    }

    /// Launch the process. Does nothing if it is already running.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let command = self.command_line();
        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| AnnotationError::server(format!("failed to start {}: {}", self.name, e)))?;
        log::info!("Started {} server (pid {}): {}", self.name, child.id(), command);
        self.child = Some(child);
        Ok(())
    }

    /// Kill the process and reap it.
    pub fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        match child.kill() {
            Ok(()) => {}
            // Already exited.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => {
                return Err(AnnotationError::server(format!(
                    "failed to kill {}: {}",
                    self.name, e
                )))
            }
        }
        let status = child.wait()?;
        log::info!("Stopped {} server ({})", self.name, status);
        Ok(())
    }

    pub fn is_running(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                log::warn!("{} server exited ({})", self.name, status);
                self.child = None;
                false
            }
            Err(e) => {
                log::warn!("Could not poll {} server: {}", self.name, e);
                false
            }
        }
    }

    /// Block until the server accepts connections, it exits, or the startup
    /// timeout passes.
    pub fn wait_ready(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.config.startup_timeout();
        loop {
            if !self.is_running() {
                return Err(AnnotationError::server(format!(
                    "{} server is not running",
                    self.name
                )));
            }
            if self.accepts_connections() {
                log::info!("{} server ready at {}", self.name, self.config.address);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AnnotationError::server(format!(
                    "{} server did not come up at {} in time",
                    self.name, self.config.address
                )));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn accepts_connections(&self) -> bool {
        let Ok(addrs) = self.config.address.to_socket_addrs() else {
            return false;
        };
        addrs
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, POLL_INTERVAL).is_ok())
    }
}

impl Drop for InferenceServer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("{}", e);
        }
    }
}
