//! Container runtime access
//!
//! Drives Docker/Podman through their CLI:
//! - Detached daemon launch with port and env pass-through
//! - Running-state inspection and log capture
//! - Log following into a file (as a supervised process)
//! - Best-effort stop and forced removal

use crate::process::SupervisedProcess;
use async_trait::async_trait;
use keeper_foundation::ContainerRuntime;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Host to container port mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

impl PortMapping {
    pub fn new(host: u16, container: u16) -> Self {
        Self { host, container }
    }
}

/// Environment passed into the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerEnv {
    /// `-e NAME`: value inherited from this process
    Inherit(String),
    /// `-e NAME=value`
    Set(String, String),
}

/// Container launch specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container image
    pub image: String,
    /// Logical container name (unique on the host)
    pub name: String,
    /// Image platform, e.g. `linux/arm64`
    pub platform: Option<String>,
    /// Published ports
    pub ports: Vec<PortMapping>,
    /// Environment variables
    pub env: Vec<ContainerEnv>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: name.into(),
            platform: None,
            ports: vec![],
            env: vec![],
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_port(mut self, host: u16, container: u16) -> Self {
        self.ports.push(PortMapping::new(host, container));
        self
    }

    pub fn with_inherited_env(mut self, key: impl Into<String>) -> Self {
        self.env.push(ContainerEnv::Inherit(key.into()));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(ContainerEnv::Set(key.into(), value.into()));
        self
    }

    /// Build `run -d ...` arguments
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
        ];

        if let Some(platform) = &self.platform {
            args.push("--platform".to_string());
            args.push(platform.clone());
        }

        for port in &self.ports {
            args.push("-p".to_string());
            args.push(format!("{}:{}", port.host, port.container));
        }

        for env in &self.env {
            args.push("-e".to_string());
            match env {
                ContainerEnv::Inherit(key) => args.push(key.clone()),
                ContainerEnv::Set(key, value) => args.push(format!("{}={}", key, value)),
            }
        }

        args.push(self.image.clone());
        args
    }
}

/// Captured container output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerLogs {
    pub stdout: String,
    pub stderr: String,
}

impl ContainerLogs {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }

    pub fn contains(&self, marker: &str) -> bool {
        self.stdout.contains(marker) || self.stderr.contains(marker)
    }

    /// Last `n` lines of stdout, then last `n` lines of stderr
    pub fn tail_per_stream(&self, n: usize) -> Vec<(&'static str, &str)> {
        let mut lines: Vec<(&'static str, &str)> =
            last_lines(&self.stdout, n).into_iter().map(|l| ("stdout", l)).collect();
        lines.extend(last_lines(&self.stderr, n).into_iter().map(|l| ("stderr", l)));
        lines
    }

    /// Last `n` lines of the combined output
    pub fn tail_combined(&self, n: usize) -> Vec<String> {
        last_lines(&self.combined(), n)
            .into_iter()
            .map(String::from)
            .collect()
    }
}

fn last_lines(text: &str, n: usize) -> Vec<&str> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].to_vec()
}

/// Container error types
#[derive(Debug, Clone)]
pub enum ContainerError {
    RuntimeNotFound,
    ImageNotFound(String),
    StartFailed(String),
    ExecutionFailed(String),
}

impl std::fmt::Display for ContainerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RuntimeNotFound => write!(f, "Container runtime not found"),
            Self::ImageNotFound(img) => write!(f, "Image not found: {}", img),
            Self::StartFailed(msg) => write!(f, "Failed to start container: {}", msg),
            Self::ExecutionFailed(msg) => write!(f, "Execution failed: {}", msg),
        }
    }
}

impl std::error::Error for ContainerError {}

impl From<ContainerError> for keeper_foundation::Error {
    fn from(e: ContainerError) -> Self {
        keeper_foundation::Error::Container(e.to_string())
    }
}

/// Container executor trait - the blocking runtime calls the supervisor depends on
#[async_trait]
pub trait ContainerExecutor: Send + Sync {
    /// Pull an image, returning the runtime's stdout
    async fn pull_image(&self, image: &str, platform: Option<&str>)
        -> Result<String, ContainerError>;

    /// Launch a detached container
    async fn run_detached(&self, spec: &ContainerSpec) -> Result<(), ContainerError>;

    /// Single running-state inspection
    async fn is_running(&self, name: &str) -> bool;

    /// Full stdout/stderr captured so far
    async fn logs(&self, name: &str) -> Result<ContainerLogs, ContainerError>;

    /// Follow logs (with timestamps) into `dest`, appending
    fn follow_logs(&self, name: &str, dest: &Path) -> Result<SupervisedProcess, ContainerError>;

    /// Stop a container
    async fn stop_container(&self, name: &str, timeout: Duration) -> Result<(), ContainerError>;

    /// Remove a container
    async fn remove_container(&self, name: &str, force: bool) -> Result<(), ContainerError>;
}

/// Docker/Podman executor implementation
pub struct DockerExecutor {
    runtime: ContainerRuntime,
}

impl DockerExecutor {
    pub fn new(runtime: ContainerRuntime) -> Self {
        Self { runtime }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(self.runtime.command());
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    async fn output(&self, args: &[&str]) -> Result<std::process::Output, ContainerError> {
        self.command()
            .args(args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ContainerError::RuntimeNotFound,
                _ => ContainerError::ExecutionFailed(e.to_string()),
            })
    }
}

#[async_trait]
impl ContainerExecutor for DockerExecutor {
    async fn pull_image(
        &self,
        image: &str,
        platform: Option<&str>,
    ) -> Result<String, ContainerError> {
        info!(image, "Pulling image");

        let mut args = vec!["pull"];
        if let Some(platform) = platform {
            args.extend(["--platform", platform]);
        }
        args.push(image);

        let output = self.output(&args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(ContainerError::ImageNotFound(image.to_string()))
        }
    }

    async fn run_detached(&self, spec: &ContainerSpec) -> Result<(), ContainerError> {
        let args = spec.build_args();
        debug!(name = %spec.name, image = %spec.image, "Running container");

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.output(&arg_refs).await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ContainerError::StartFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn is_running(&self, name: &str) -> bool {
        match self
            .output(&["inspect", "-f", "{{.State.Running}}", name])
            .await
        {
            Ok(output) => String::from_utf8_lossy(&output.stdout).contains("true"),
            Err(e) => {
                debug!(name, error = %e, "Inspect failed");
                false
            }
        }
    }

    async fn logs(&self, name: &str) -> Result<ContainerLogs, ContainerError> {
        let output = self.output(&["logs", name]).await?;
        Ok(ContainerLogs::new(
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        ))
    }

    fn follow_logs(&self, name: &str, dest: &Path) -> Result<SupervisedProcess, ContainerError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dest)
            .map_err(|e| ContainerError::ExecutionFailed(format!("{}: {}", dest.display(), e)))?;
        let stderr = file
            .try_clone()
            .map_err(|e| ContainerError::ExecutionFailed(e.to_string()))?;

        let mut cmd = self.command();
        cmd.args(["logs", "-f", "--timestamps", name])
            .stdout(Stdio::from(file))
            .stderr(Stdio::from(stderr));

        SupervisedProcess::spawn(format!("{}-logs", name), cmd)
            .map_err(|e| ContainerError::ExecutionFailed(e.to_string()))
    }

    async fn stop_container(&self, name: &str, timeout: Duration) -> Result<(), ContainerError> {
        info!(name, "Stopping container");

        let secs = timeout.as_secs().to_string();
        let output = self.output(&["stop", "-t", &secs, name]).await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ContainerError::ExecutionFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ))
        }
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<(), ContainerError> {
        debug!(name, force, "Removing container");

        let mut args = vec!["rm"];
        if force {
            args.push("-f");
        }
        args.push(name);

        let output = self.output(&args).await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ContainerError::ExecutionFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ))
        }
    }
}
