//! Poll loop
//!
//! Each cycle: container liveness, log-stream self-heal, one agent
//! invocation. Consecutive failures back off linearly (capped at the poll
//! timeout) and the loop gives up once the failure budget is spent.

use crate::agent::{poll_prompt, AgentOutcome, AgentRunner, SessionDirective};
use crate::lifecycle::LifecycleController;
use crate::process::StopSignal;
use crate::supervisor::ContainerSupervisor;
use chrono::Utc;
use keeper_foundation::config::daily_log_path;
use keeper_foundation::{Error, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Hard ceiling on a single poll invocation
pub const POLL_CYCLE_CEILING: Duration = Duration::from_secs(120);
/// Pause after a successful cycle
pub const SUCCESS_PAUSE: Duration = Duration::from_secs(2);
/// Backoff grows by this much per consecutive failure
pub const BACKOFF_STEP: Duration = Duration::from_secs(5);

/// `min(failures * step, cap)`
pub fn backoff_delay(failures: u32, step: Duration, cap: Duration) -> Duration {
    step.saturating_mul(failures).min(cap)
}

/// What to do after a failed cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    Backoff(Duration),
    Exhausted,
}

/// Consecutive failure counter
#[derive(Debug, Clone)]
pub struct FailureCounter {
    count: u32,
    max: u32,
}

impl FailureCounter {
    pub fn new(max: u32) -> Self {
        Self { count: 0, max }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn record_failure(&mut self, step: Duration, cap: Duration) -> FailureVerdict {
        self.count += 1;
        if self.count >= self.max {
            FailureVerdict::Exhausted
        } else {
            FailureVerdict::Backoff(backoff_delay(self.count, step, cap))
        }
    }
}

/// Poll loop settings
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Passed to the agent and used as the backoff cap
    pub poll_timeout: Duration,
    pub max_failures: u32,
    pub cycle_ceiling: Duration,
    pub success_pause: Duration,
    pub backoff_step: Duration,
    /// Directory for the restarted log stream's daily file
    pub log_dir: PathBuf,
}

impl PollConfig {
    pub fn new(poll_timeout: Duration, max_failures: u32, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            poll_timeout,
            max_failures,
            cycle_ceiling: POLL_CYCLE_CEILING,
            success_pause: SUCCESS_PAUSE,
            backoff_step: BACKOFF_STEP,
            log_dir: log_dir.into(),
        }
    }
}

pub struct PollLoop {
    container: Arc<ContainerSupervisor>,
    agent: Arc<dyn AgentRunner>,
    lifecycle: Arc<LifecycleController>,
    config: PollConfig,
    stop: StopSignal,
    log_restarts: AtomicU32,
}

impl PollLoop {
    pub fn new(
        container: Arc<ContainerSupervisor>,
        agent: Arc<dyn AgentRunner>,
        lifecycle: Arc<LifecycleController>,
        config: PollConfig,
    ) -> Self {
        let stop = lifecycle.stop_signal();
        Self {
            container,
            agent,
            lifecycle,
            config,
            stop,
            log_restarts: AtomicU32::new(0),
        }
    }

    /// Log stream restarts so far
    pub fn log_restarts(&self) -> u32 {
        self.log_restarts.load(Ordering::Relaxed)
    }

    /// Run until shutdown is requested or a fatal condition occurs.
    pub async fn run(&self, session_id: &str) -> Result<()> {
        info!(
            session_id,
            interval_secs = self.config.poll_timeout.as_secs(),
            "Starting message poll loop"
        );

        let directive = SessionDirective::Resume(session_id.to_string());
        let prompt = poll_prompt(self.config.poll_timeout.as_secs());
        let mut failures = FailureCounter::new(self.config.max_failures);

        while !self.lifecycle.is_shutting_down() {
            if !self.container.is_running().await {
                error!(container = %self.container.name(), "MCP daemon container died, exiting");
                return Err(Error::ContainerExited(self.container.name().to_string()));
            }

            self.heal_log_stream().await;

            let outcome = self
                .agent
                .invoke(&directive, &prompt, self.config.cycle_ceiling)
                .await;

            match outcome {
                AgentOutcome::Success => {
                    failures.reset();
                    self.stop.sleep(self.config.success_pause).await;
                    continue;
                }
                AgentOutcome::Cancelled => break,
                _ => {}
            }

            let verdict = failures.record_failure(self.config.backoff_step, self.config.poll_timeout);
            warn!(
                outcome = %outcome,
                consecutive = failures.count(),
                max = failures.max(),
                "Poll cycle failed"
            );

            match verdict {
                FailureVerdict::Exhausted => {
                    error!(
                        consecutive = failures.count(),
                        "Too many consecutive failures, exiting"
                    );
                    return Err(Error::TooManyFailures {
                        count: failures.count(),
                        max: failures.max(),
                    });
                }
                FailureVerdict::Backoff(delay) => {
                    info!(delay_secs = delay.as_secs(), "Backing off");
                    self.stop.sleep(delay).await;
                }
            }
        }

        info!("Poll loop stopped");
        Ok(())
    }

    /// One restart attempt per observed death
    async fn heal_log_stream(&self) {
        if !self.lifecycle.log_stream_exited().await {
            return;
        }

        let restarts = self.log_restarts.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(restarts, "Log streamer died, restarting");

        let dest = daily_log_path(&self.config.log_dir, "mcp", Utc::now());
        match self.container.tail_logs(&dest) {
            Ok(stream) => self.lifecycle.set_log_stream(stream).await,
            Err(e) => warn!(error = %e, "Failed to restart log streamer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerSpec;
    use crate::testing::{ScriptedAgent, ScriptedExecutor};
    use tokio::time::Instant;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_backoff_delay() {
        assert_eq!(backoff_delay(1, BACKOFF_STEP, secs(30)), secs(5));
        assert_eq!(backoff_delay(4, BACKOFF_STEP, secs(30)), secs(20));
        assert_eq!(backoff_delay(7, BACKOFF_STEP, secs(30)), secs(30));
        assert_eq!(backoff_delay(3, BACKOFF_STEP, secs(12)), secs(12));
    }

    #[test]
    fn test_failure_counter() {
        let mut counter = FailureCounter::new(3);
        assert_eq!(
            counter.record_failure(BACKOFF_STEP, secs(30)),
            FailureVerdict::Backoff(secs(5))
        );
        assert_eq!(
            counter.record_failure(BACKOFF_STEP, secs(30)),
            FailureVerdict::Backoff(secs(10))
        );
        assert_eq!(
            counter.record_failure(BACKOFF_STEP, secs(30)),
            FailureVerdict::Exhausted
        );

        counter.reset();
        assert_eq!(counter.count(), 0);
        assert_eq!(
            counter.record_failure(BACKOFF_STEP, secs(30)),
            FailureVerdict::Backoff(secs(5))
        );
    }

    #[test]
    fn test_single_failure_budget() {
        let mut counter = FailureCounter::new(1);
        assert_eq!(
            counter.record_failure(BACKOFF_STEP, secs(30)),
            FailureVerdict::Exhausted
        );
    }

    struct Harness {
        executor: Arc<ScriptedExecutor>,
        lifecycle: Arc<LifecycleController>,
        poll: PollLoop,
    }

    fn harness(executor: ScriptedExecutor, agent: Arc<ScriptedAgent>, config: PollConfig) -> Harness {
        let executor = Arc::new(executor);
        let container = Arc::new(ContainerSupervisor::new(
            executor.clone(),
            ContainerSpec::new("mcp-test", "mcp:latest"),
        ));
        let lifecycle = Arc::new(LifecycleController::new(container.clone()));
        agent.stop_via(lifecycle.clone());
        let poll = PollLoop::new(container, agent, lifecycle.clone(), config);
        Harness {
            executor,
            lifecycle,
            poll,
        }
    }

    fn config(poll_timeout: u64, max_failures: u32) -> PollConfig {
        PollConfig::new(secs(poll_timeout), max_failures, std::env::temp_dir())
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule_then_fatal() {
        let agent = Arc::new(ScriptedAgent::new().with_default(AgentOutcome::Failed(Some(1))));
        let h = harness(ScriptedExecutor::new(), agent.clone(), config(30, 3));

        let started = Instant::now();
        let err = h.poll.run("sess").await.unwrap_err();

        assert!(matches!(err, Error::TooManyFailures { count: 3, max: 3 }));
        let calls = agent.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].at - calls[0].at, secs(5));
        assert_eq!(calls[2].at - calls[1].at, secs(10));
        // No sleep after the fatal failure
        assert_eq!(started.elapsed(), secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_capped_by_poll_timeout() {
        let agent = Arc::new(ScriptedAgent::new().with_default(AgentOutcome::TimedOut));
        let h = harness(ScriptedExecutor::new(), agent.clone(), config(12, 5));

        h.poll.run("sess").await.unwrap_err();

        let gaps: Vec<Duration> = agent
            .calls()
            .windows(2)
            .map(|w| w[1].at - w[0].at)
            .collect();
        assert_eq!(gaps, vec![secs(5), secs(10), secs(12), secs(12)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failures() {
        let agent = Arc::new(
            ScriptedAgent::new()
                .then(AgentOutcome::Failed(Some(1)))
                .then(AgentOutcome::Failed(Some(1)))
                .then(AgentOutcome::Success)
                .then(AgentOutcome::Failed(Some(1)))
                .then(AgentOutcome::Success)
                .stop_after(5),
        );
        let h = harness(ScriptedExecutor::new(), agent.clone(), config(30, 3));

        h.poll.run("sess").await.unwrap();

        let calls = agent.calls();
        assert_eq!(calls.len(), 5);
        // Fresh count after the success: back to the first step
        assert_eq!(calls[3].at - calls[2].at, SUCCESS_PAUSE);
        assert_eq!(calls[4].at - calls[3].at, secs(5));
        assert!(calls
            .iter()
            .all(|c| c.directive == SessionDirective::Resume("sess".into())));
        assert_eq!(calls[0].timeout, POLL_CYCLE_CEILING);
        assert!(calls[0].prompt.contains("timeout_seconds=30"));
        assert!(h.lifecycle.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_container_death_is_fatal() {
        let agent = Arc::new(ScriptedAgent::new());
        let executor = ScriptedExecutor::new().with_running([true, true, false]);
        let h = harness(executor, agent.clone(), config(30, 3));

        let err = h.poll.run("sess").await.unwrap_err();

        assert!(matches!(err, Error::ContainerExited(_)));
        assert_eq!(agent.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_when_already_shutting_down() {
        let agent = Arc::new(ScriptedAgent::new());
        let h = harness(ScriptedExecutor::new(), agent.clone(), config(30, 3));
        h.lifecycle.shutdown().await;

        h.poll.run("sess").await.unwrap();
        assert!(agent.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cuts_backoff_short() {
        let agent = Arc::new(ScriptedAgent::new().with_default(AgentOutcome::Failed(Some(1))));
        let h = harness(ScriptedExecutor::new(), agent.clone(), config(30, 10));

        let lifecycle = h.lifecycle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            lifecycle.shutdown().await;
        });

        let started = Instant::now();
        h.poll.run("sess").await.unwrap();

        // Failures at 0s and 5s; the 10s backoff is interrupted at 7s
        assert_eq!(agent.calls().len(), 2);
        assert_eq!(started.elapsed(), secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_invocation_ends_loop() {
        let agent = Arc::new(ScriptedAgent::new().then(AgentOutcome::Cancelled));
        let h = harness(ScriptedExecutor::new(), agent.clone(), config(30, 3));

        h.poll.run("sess").await.unwrap();
        assert_eq!(agent.calls().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dead_log_stream_restarted_once() {
        let agent = Arc::new(ScriptedAgent::new().stop_after(3));
        let mut cfg = config(30, 3);
        cfg.success_pause = Duration::from_millis(10);
        let dir = tempfile::TempDir::new().unwrap();
        cfg.log_dir = dir.path().to_path_buf();
        let h = harness(ScriptedExecutor::new(), agent.clone(), cfg);

        h.lifecycle
            .set_log_stream(crate::testing::finished("logs").await)
            .await;

        h.poll.run("sess").await.unwrap();

        assert_eq!(h.poll.log_restarts(), 1);
        let follows = h
            .executor
            .calls()
            .iter()
            .filter(|c| c.starts_with("follow"))
            .count();
        assert_eq!(follows, 1);
    }
}
