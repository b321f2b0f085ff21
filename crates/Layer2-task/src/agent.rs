//! Agent CLI invocation
//!
//! One invocation = one child process bound to a session. The child never
//! reads stdin and its output is appended to the daily bot log.

use crate::process::{StopSignal, SupervisedProcess, DEFAULT_GRACE_PERIOD};
use async_trait::async_trait;
use chrono::Utc;
use keeper_foundation::config::daily_log_path;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Prompt for the first invocation of a session
pub const INIT_PROMPT: &str = "Session starting. Load the discord-bot skill and initialize. \
Read .claude/claudebot.local.md for channel config and .claude/memory/personality.md \
for current personality. Verify MCP connectivity by calling discord_get_guild.";

/// Prompt for one poll cycle
pub fn poll_prompt(poll_timeout_secs: u64) -> String {
    format!(
        "Poll for new Discord messages using discord_poll_messages with \
         timeout_seconds={} and limit=10. Process any messages received.",
        poll_timeout_secs
    )
}

/// How the invocation binds to a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionDirective {
    /// Continue an existing session
    Resume(String),
    /// Create a session with this fresh id
    Create(String),
}

impl SessionDirective {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Resume(id) | Self::Create(id) => id,
        }
    }

    pub fn args(&self) -> [&str; 2] {
        match self {
            Self::Resume(id) => ["--resume", id],
            Self::Create(id) => ["--session-id", id],
        }
    }
}

/// Result of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    /// Exit status zero
    Success,
    /// Non-zero exit (None when killed by a signal)
    Failed(Option<i32>),
    /// Ceiling reached; the child was terminated
    TimedOut,
    /// The child could not be started
    SpawnFailed(String),
    /// Shutdown was requested; the child (if any) was terminated
    Cancelled,
}

impl AgentOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for AgentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed(Some(code)) => write!(f, "exit code {}", code),
            Self::Failed(None) => write!(f, "killed by signal"),
            Self::TimedOut => write!(f, "timed out"),
            Self::SpawnFailed(msg) => write!(f, "spawn failed: {}", msg),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Runs one agent invocation to completion or timeout
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn invoke(
        &self,
        directive: &SessionDirective,
        prompt: &str,
        timeout: Duration,
    ) -> AgentOutcome;
}

/// Agent driven through its command-line interface
pub struct CliAgent {
    program: String,
    flags: Vec<String>,
    log_dir: PathBuf,
    grace: Duration,
    stop: Option<StopSignal>,
}

impl CliAgent {
    pub fn new(program: impl Into<String>, flags: Vec<String>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            flags,
            log_dir: log_dir.into(),
            grace: DEFAULT_GRACE_PERIOD,
            stop: None,
        }
    }

    /// Terminate the running child when `stop` is triggered
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Non-interactive flags: plugin dir, runtime MCP config, JSON output
    pub fn default_flags(plugin_dir: &Path, mcp_config: &Path) -> Vec<String> {
        vec![
            "-p".to_string(),
            "--plugin-dir".to_string(),
            plugin_dir.display().to_string(),
            "--mcp-config".to_string(),
            mcp_config.display().to_string(),
            "--dangerously-skip-permissions".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
        ]
    }

    pub fn build_args(&self, directive: &SessionDirective, prompt: &str) -> Vec<String> {
        let mut args = self.flags.clone();
        args.extend(directive.args().iter().map(|s| s.to_string()));
        args.push(prompt.to_string());
        args
    }

    /// stdout/stderr target; null when the log directory is unavailable
    fn output(&self) -> (Stdio, Stdio) {
        let path = daily_log_path(&self.log_dir, "bot", Utc::now());
        let opened = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|f| Ok((f.try_clone()?, f)));

        match opened {
            Ok((out, err)) => (Stdio::from(out), Stdio::from(err)),
            Err(e) => {
                debug!(file = %path.display(), error = %e, "Agent output discarded");
                (Stdio::null(), Stdio::null())
            }
        }
    }
}

#[async_trait]
impl AgentRunner for CliAgent {
    async fn invoke(
        &self,
        directive: &SessionDirective,
        prompt: &str,
        timeout: Duration,
    ) -> AgentOutcome {
        if self.stop.as_ref().is_some_and(StopSignal::is_triggered) {
            return AgentOutcome::Cancelled;
        }
        let _in_flight = self.stop.as_ref().map(StopSignal::enter);

        let (stdout, stderr) = self.output();

        let mut cmd = Command::new(&self.program);
        cmd.args(self.build_args(directive, prompt))
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        let mut child = match SupervisedProcess::spawn("agent", cmd) {
            Ok(child) => child,
            Err(e) => return AgentOutcome::SpawnFailed(e.to_string()),
        };
        debug!(
            session_id = directive.session_id(),
            pid = ?child.pid(),
            timeout_secs = timeout.as_secs(),
            "Agent invoked"
        );

        let stopped = async {
            match &self.stop {
                Some(stop) => stop.triggered().await,
                None => std::future::pending().await,
            }
        };

        let waited = tokio::select! {
            waited = child.wait_timeout(timeout) => waited,
            _ = stopped => {
                debug!(session_id = directive.session_id(), "Stopping agent for shutdown");
                child.terminate(self.grace).await;
                return AgentOutcome::Cancelled;
            }
        };

        match waited {
            Ok(Some(status)) if status.success() => AgentOutcome::Success,
            Ok(Some(status)) => AgentOutcome::Failed(status.code()),
            Ok(None) => {
                warn!(
                    session_id = directive.session_id(),
                    timeout_secs = timeout.as_secs(),
                    "Agent invocation timed out"
                );
                child.terminate(self.grace).await;
                AgentOutcome::TimedOut
            }
            Err(e) => {
                child.terminate(self.grace).await;
                AgentOutcome::SpawnFailed(e.to_string())
            }
        }
    }
}
