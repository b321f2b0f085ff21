//! Container supervisor
//!
//! Brings the MCP daemon container up and keeps an eye on it. Readiness is
//! checked in two bounded phases (running, then connected) and every
//! observation goes through [`ContainerState::next`].
//!
//! Startup steps take the shared [`StopSignal`]: once it fires nothing new is
//! launched and pending waits return [`Error::Interrupted`].

use crate::container::{ContainerExecutor, ContainerLogs, ContainerSpec};
use crate::process::{StopSignal, SupervisedProcess};
use crate::state::{ContainerState, ProbeEvent};
use keeper_foundation::{Error, Result};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Log line the daemon prints once its upstream connection is established
pub const CONNECTED_MARKER: &str = "discord: connected as";

/// Grace period handed to the runtime's `stop`
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Readiness polling bounds
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Delay between checks
    pub interval: Duration,
    /// Checks per phase
    pub max_attempts: u32,
    /// Connectivity marker searched in the container output
    pub marker: String,
    /// Lines of output surfaced when the container fails
    pub tail_lines: usize,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 30,
            marker: CONNECTED_MARKER.to_string(),
            tail_lines: 20,
        }
    }
}

/// Owns the lifecycle of one named container
pub struct ContainerSupervisor {
    executor: Arc<dyn ContainerExecutor>,
    spec: ContainerSpec,
    readiness: ReadinessConfig,
    state: Mutex<ContainerState>,
}

impl ContainerSupervisor {
    pub fn new(executor: Arc<dyn ContainerExecutor>, spec: ContainerSpec) -> Self {
        Self {
            executor,
            spec,
            readiness: ReadinessConfig::default(),
            state: Mutex::new(ContainerState::Absent),
        }
    }

    pub fn with_readiness(mut self, readiness: ReadinessConfig) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    pub fn state(&self) -> ContainerState {
        *self.state.lock()
    }

    fn advance(&self, event: ProbeEvent, attempt: u32) -> ContainerState {
        let mut state = self.state.lock();
        let next = state.next(event, attempt, self.readiness.max_attempts);
        if next != *state {
            debug!(container = %self.spec.name, from = %*state, to = %next, "Container state changed");
        }
        *state = next;
        next
    }

    /// Pre-pull images before launch.
    ///
    /// Auxiliary images only warn on failure; the daemon image is required.
    /// A stop request abandons the pull (the runtime client is killed).
    pub async fn pull_images(&self, extra_images: &[String], stop: &StopSignal) -> Result<()> {
        interrupted(stop, "image pull")?;
        tokio::select! {
            result = self.pull_all(extra_images) => result,
            _ = stop.triggered() => {
                info!(image = %self.spec.image, "Image pull abandoned, shutting down");
                Err(Error::Interrupted("image pull".to_string()))
            }
        }
    }

    async fn pull_all(&self, extra_images: &[String]) -> Result<()> {
        let platform = self.spec.platform.as_deref();

        for image in extra_images {
            if let Err(e) = self.executor.pull_image(image, platform).await {
                warn!(image = %image, error = %e, "Failed to pull auxiliary image");
            }
        }

        match self.executor.pull_image(&self.spec.image, platform).await {
            Ok(output) => {
                let status = output.lines().last().unwrap_or("").trim().to_string();
                info!(image = %self.spec.image, status = %status, "Image ready");
                Ok(())
            }
            Err(e) => {
                error!(image = %self.spec.image, error = %e, "Failed to pull MCP daemon image");
                Err(e.into())
            }
        }
    }

    /// Replace any stale instance, launch, and wait for the running state.
    pub async fn start(&self, stop: &StopSignal) -> Result<()> {
        let name = self.spec.name.clone();
        interrupted(stop, "container start")?;
        *self.state.lock() = ContainerState::Absent;

        // A leftover from a previous run may or may not exist
        if let Err(e) = self.executor.remove_container(&name, true).await {
            debug!(container = %name, error = %e, "No stale container removed");
        }
        self.advance(ProbeEvent::Cleaned, 0);

        interrupted(stop, "container start")?;
        info!(
            container = %name,
            image = %self.spec.image,
            ports = ?self.spec.ports.iter().map(|p| format!("{}:{}", p.host, p.container)).collect::<Vec<_>>(),
            "Starting MCP daemon container"
        );
        if let Err(e) = self.executor.run_detached(&self.spec).await {
            *self.state.lock() = ContainerState::Dead;
            error!(container = %name, error = %e, "Failed to start container");
            return Err(e.into());
        }
        self.advance(ProbeEvent::Launched, 0);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let running = self.executor.is_running(&name).await;

            match self.advance(ProbeEvent::RunningCheck { running }, attempt) {
                ContainerState::WaitingConnected => {
                    info!(container = %name, checks = attempt, "Container is running");
                    return Ok(());
                }
                ContainerState::Dead => {
                    error!(container = %name, checks = attempt, "Container failed to start");
                    self.surface_tail_per_stream().await;
                    return Err(Error::ContainerNotRunning {
                        name,
                        attempts: attempt,
                    });
                }
                _ => {
                    if stop.sleep(self.readiness.interval).await {
                        return Err(Error::Interrupted("waiting for container".to_string()));
                    }
                }
            }
        }
    }

    /// Wait for the connectivity marker.
    ///
    /// Returns `Connected`, or `Degraded` when the bound is exhausted while the
    /// container is still alive. A container that exits meanwhile is fatal.
    pub async fn await_connectivity(&self, stop: &StopSignal) -> Result<ContainerState> {
        let name = self.spec.name.clone();
        info!(container = %name, "Waiting for Discord connection");

        let mut attempt = 0;
        loop {
            attempt += 1;

            let logs = match self.executor.logs(&name).await {
                Ok(logs) => logs,
                Err(e) => {
                    debug!(container = %name, error = %e, "Log read failed");
                    ContainerLogs::default()
                }
            };
            let marker_seen = logs.contains(&self.readiness.marker);
            let alive = marker_seen || self.executor.is_running(&name).await;

            match self.advance(ProbeEvent::LogCheck { marker_seen, alive }, attempt) {
                ContainerState::Connected => {
                    info!(container = %name, checks = attempt, "MCP daemon connected to Discord");
                    return Ok(ContainerState::Connected);
                }
                ContainerState::Degraded => {
                    warn!(
                        container = %name,
                        checks = attempt,
                        "Timed out waiting for Discord connection, proceeding anyway"
                    );
                    return Ok(ContainerState::Degraded);
                }
                ContainerState::Dead => {
                    error!(container = %name, "MCP daemon container exited unexpectedly");
                    for line in logs.tail_combined(self.readiness.tail_lines) {
                        error!(container = %name, "  {}", line);
                    }
                    return Err(Error::ContainerExited(name));
                }
                _ => {
                    if stop.sleep(self.readiness.interval).await {
                        return Err(Error::Interrupted("waiting for connection".to_string()));
                    }
                }
            }
        }
    }

    /// Single liveness check
    pub async fn is_running(&self) -> bool {
        let running = self.executor.is_running(&self.spec.name).await;
        if !running && self.state().is_ready() {
            *self.state.lock() = ContainerState::Dead;
        }
        running
    }

    /// Start following the container's output into `dest`
    pub fn tail_logs(&self, dest: &Path) -> Result<SupervisedProcess> {
        let stream = self.executor.follow_logs(&self.spec.name, dest)?;
        info!(
            container = %self.spec.name,
            file = %dest.display(),
            pid = ?stream.pid(),
            "Streaming container logs"
        );
        Ok(stream)
    }

    /// Stop then force-remove. Failures are logged and swallowed.
    pub async fn stop(&self, timeout: Duration) {
        let name = &self.spec.name;

        if let Err(e) = self.executor.stop_container(name, timeout).await {
            debug!(container = %name, error = %e, "Stop failed");
        }
        if let Err(e) = self.executor.remove_container(name, true).await {
            debug!(container = %name, error = %e, "Remove failed");
        }

        *self.state.lock() = ContainerState::Absent;
    }

    async fn surface_tail_per_stream(&self) {
        let name = &self.spec.name;
        match self.executor.logs(name).await {
            Ok(logs) => {
                for (stream, line) in logs.tail_per_stream(self.readiness.tail_lines) {
                    error!(container = %name, stream, "  {}", line);
                }
            }
            Err(e) => error!(container = %name, error = %e, "Could not read container logs"),
        }
    }
}

fn interrupted(stop: &StopSignal, step: &str) -> Result<()> {
    if stop.is_triggered() {
        debug!(step, "Skipping startup step, shutting down");
        return Err(Error::Interrupted(step.to_string()));
    }
    Ok(())
}
