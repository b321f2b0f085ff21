//! Supervised processes
//!
//! Owns a spawned child and knows how to stop it:
//! - Liveness probing without blocking (`try_wait`)
//! - Graceful shutdown with SIGTERM -> SIGKILL escalation
//! - Bounded waits for processes that must not block the controller
//! - A shared stop request that in-flight work can observe

use keeper_foundation::{Error, Result};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{watch, Notify};
use tracing::{debug, warn};

/// Grace period between SIGTERM and SIGKILL
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Liveness of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    /// Exited with the given code (None when killed by a signal)
    Exited(Option<i32>),
}

/// How a terminate request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Process had already exited
    AlreadyExited,
    /// Exited within the grace period after SIGTERM
    Graceful,
    /// Grace period expired, process was killed
    Killed,
}

/// A child process exclusively owned by its supervisor
#[derive(Debug)]
pub struct SupervisedProcess {
    name: String,
    pid: Option<u32>,
    child: Child,
}

impl SupervisedProcess {
    /// Spawn `cmd` under supervision. The child is killed if the handle is dropped.
    pub fn spawn(name: impl Into<String>, mut cmd: Command) -> Result<Self> {
        let name = name.into();
        cmd.kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| Error::Internal(format!("Failed to spawn {}: {}", name, e)))?;
        let pid = child.id();

        debug!(process = %name, pid = ?pid, "Spawned supervised process");
        Ok(Self { name, pid, child })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking liveness check
    pub fn liveness(&mut self) -> Liveness {
        match self.child.try_wait() {
            Ok(None) => Liveness::Running,
            Ok(Some(status)) => Liveness::Exited(status.code()),
            Err(e) => {
                warn!(process = %self.name, error = %e, "Failed to poll process status");
                Liveness::Exited(None)
            }
        }
    }

    pub fn is_running(&mut self) -> bool {
        self.liveness() == Liveness::Running
    }

    /// Wait for exit, giving up after `timeout`. `Ok(None)` means still running.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => Ok(Some(status)),
            Ok(Err(e)) => Err(Error::Internal(format!(
                "Failed to wait for {}: {}",
                self.name, e
            ))),
            Err(_) => Ok(None),
        }
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL. Never fails.
    pub async fn terminate(&mut self, grace: Duration) -> TerminateOutcome {
        if !self.is_running() {
            return TerminateOutcome::AlreadyExited;
        }

        self.send_sigterm();

        match self.wait_timeout(grace).await {
            Ok(Some(_)) => {
                debug!(process = %self.name, "Process exited after SIGTERM");
                TerminateOutcome::Graceful
            }
            _ => {
                warn!(
                    process = %self.name,
                    grace_secs = grace.as_secs_f64(),
                    "Grace period expired, killing process"
                );
                if let Err(e) = self.child.kill().await {
                    warn!(process = %self.name, error = %e, "Failed to kill process");
                }
                TerminateOutcome::Killed
            }
        }
    }

    /// Send graceful termination signal
    #[cfg(unix)]
    fn send_sigterm(&self) {
        if let Some(pid) = self.pid {
            // SAFETY: kill(2) has no memory-safety preconditions
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                debug!(process = %self.name, pid, "SIGTERM delivery failed");
            }
        }
    }

    #[cfg(not(unix))]
    fn send_sigterm(&self) {
        // No SIGTERM equivalent; the grace wait elapses and the process is killed
        debug!(process = %self.name, "Graceful signal unsupported on this platform");
    }
}

/// Shared stop request.
///
/// Triggered once by teardown. Children started under [`StopSignal::enter`]
/// are counted so teardown can wait for them to wind down.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the stop is requested (immediately if it already was)
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // Sender is held by self, so the channel cannot close here
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleep unless stopped first. Returns true when cut short.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.triggered() => true,
        }
    }

    /// Mark a unit of work in flight until the guard drops
    pub fn enter(&self) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight {
            signal: self.clone(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until nothing is in flight. False if `timeout` elapsed first.
    pub async fn drained(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.idle.notified();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

/// Guard returned by [`StopSignal::enter`]
#[derive(Debug)]
pub struct InFlight {
    signal: StopSignal,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.signal.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.signal.idle.notify_waiters();
        }
    }
}
