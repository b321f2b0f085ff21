//! Daemon wiring
//!
//! Startup sequence: image pull, container start, connectivity wait, log
//! stream, runtime MCP config, session initialization, poll loop. Any error
//! is returned to the caller, which owns teardown and the exit code.
//!
//! Container startup counts as in-flight work on the stop signal, so teardown
//! only stops the container once startup has noticed the stop request.

use crate::agent::{AgentRunner, CliAgent, INIT_PROMPT};
use crate::container::{ContainerSpec, DockerExecutor};
use crate::lifecycle::LifecycleController;
use crate::poll::{PollConfig, PollLoop};
use crate::process::StopSignal;
use crate::session::SessionManager;
use crate::supervisor::{ContainerSupervisor, STOP_TIMEOUT};
use chrono::Utc;
use keeper_foundation::config::REQUIRED_ENV;
use keeper_foundation::{Error, KeeperConfig, McpConfig, Result, SessionStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Port the daemon listens on inside the container
pub const DAEMON_CONTAINER_PORT: u16 = 8080;

/// Launch settings for the MCP daemon container
pub fn daemon_spec(config: &KeeperConfig) -> ContainerSpec {
    let mut spec = ContainerSpec::new(&config.container_name, &config.image)
        .with_port(config.mcp_port, DAEMON_CONTAINER_PORT);
    if let Some(platform) = &config.platform {
        spec = spec.with_platform(platform);
    }
    for key in REQUIRED_ENV {
        spec = spec.with_inherited_env(key);
    }
    spec
}

pub struct Daemon {
    config: KeeperConfig,
    container: Arc<ContainerSupervisor>,
    agent: Arc<dyn AgentRunner>,
    lifecycle: Arc<LifecycleController>,
}

impl Daemon {
    pub fn new(
        config: KeeperConfig,
        container: Arc<ContainerSupervisor>,
        agent: Arc<dyn AgentRunner>,
    ) -> Self {
        Self::with_stop_signal(config, container, agent, StopSignal::new())
    }

    /// `stop` must be the signal the agent observes
    pub fn with_stop_signal(
        config: KeeperConfig,
        container: Arc<ContainerSupervisor>,
        agent: Arc<dyn AgentRunner>,
        stop: StopSignal,
    ) -> Self {
        let lifecycle = Arc::new(
            LifecycleController::new(container.clone())
                .with_session_file(config.session_file())
                .with_stop_signal(stop),
        );
        Self {
            config,
            container,
            agent,
            lifecycle,
        }
    }

    /// Real container runtime and agent CLI
    pub fn from_config(config: KeeperConfig) -> Self {
        let executor = Arc::new(DockerExecutor::new(config.container_runtime));
        let container = Arc::new(ContainerSupervisor::new(executor, daemon_spec(&config)));
        let stop = StopSignal::new();
        let agent = Arc::new(
            CliAgent::new(
                &config.agent_bin,
                CliAgent::default_flags(&config.plugin_dir, &config.runtime_mcp_path()),
                config.log_dir(),
            )
            .with_stop_signal(stop.clone()),
        );
        Self::with_stop_signal(config, container, agent, stop)
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> Arc<LifecycleController> {
        self.lifecycle.clone()
    }

    pub async fn run(&self) -> Result<()> {
        let config = &self.config;
        let stop = self.lifecycle.stop_signal();
        std::fs::create_dir_all(config.log_dir())?;

        let startup = stop.enter();
        self.checkpoint("image pull")?;
        self.container.pull_images(&config.extra_images, &stop).await?;

        if let Err(e) = self.container.start(&stop).await {
            // Teardown may already be past its container step
            if stop.is_triggered() && self.container.state().is_launched() {
                warn!(container = %self.container.name(), "Container launched during shutdown, stopping it");
                self.container.stop(STOP_TIMEOUT).await;
            }
            return Err(e);
        }
        self.container.await_connectivity(&stop).await?;

        self.checkpoint("log stream")?;
        let stream = self.container.tail_logs(&config.mcp_log_file(Utc::now()))?;
        self.lifecycle.set_log_stream(stream).await;
        drop(startup);

        self.checkpoint("session init")?;
        McpConfig::for_daemon(config.mcp_url()).write_to(&config.runtime_mcp_path())?;

        let sessions = SessionManager::new(
            self.agent.clone(),
            SessionStore::new(config.session_file()),
        );
        let session_id = sessions.initialize(INIT_PROMPT).await?;
        info!(session_id = %session_id, "Session ready");

        self.lifecycle.mark_running();

        let poll = PollLoop::new(
            self.container.clone(),
            self.agent.clone(),
            self.lifecycle.clone(),
            PollConfig::new(config.poll_timeout(), config.max_failures, config.log_dir()),
        );
        poll.run(&session_id).await
    }

    fn checkpoint(&self, step: &str) -> Result<()> {
        if self.lifecycle.is_shutting_down() {
            info!(step, "Shutdown requested, abandoning startup");
            return Err(Error::Interrupted(step.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(extra: &[(&str, &str)]) -> KeeperConfig {
        let mut vars: HashMap<String, String> = HashMap::from([
            ("BOTKEEPER_DISCORD_TOKEN".to_string(), "token".to_string()),
            ("BOTKEEPER_DISCORD_GUILD_ID".to_string(), "42".to_string()),
        ]);
        for (k, v) in extra {
            vars.insert(k.to_string(), v.to_string());
        }
        KeeperConfig::from_lookup("/bot", move |key: &str| vars.get(key).cloned()).unwrap()
    }

    #[test]
    fn test_daemon_spec() {
        let args = daemon_spec(&config(&[("BOTKEEPER_MCP_PORT", "9191")])).build_args();
        assert_eq!(
            args,
            vec![
                "run",
                "-d",
                "--name",
                "botkeeper-mcp-daemon",
                "--platform",
                "linux/arm64",
                "-p",
                "9191:8080",
                "-e",
                "BOTKEEPER_DISCORD_TOKEN",
                "-e",
                "BOTKEEPER_DISCORD_GUILD_ID",
                "ghcr.io/jamesprial/claudebot-mcp:latest",
            ]
        );
    }

    #[test]
    fn test_daemon_spec_without_platform() {
        let spec = daemon_spec(&config(&[("BOTKEEPER_PLATFORM", "none")]));
        assert!(spec.platform.is_none());
    }
}
