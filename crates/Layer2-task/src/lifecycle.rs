//! Lifecycle controller
//!
//! Holds every subordinate process and the container handle, and owns the
//! single teardown routine. Teardown order:
//! 1. Log stream (SIGTERM, 5s, SIGKILL)
//! 2. Stop request to in-flight agent invocations, other tracked children
//!    with the same escalation
//! 3. Container stop (10s grace) then forced remove
//! 4. Session record is left in place for the next start

use crate::process::{StopSignal, SupervisedProcess, DEFAULT_GRACE_PERIOD};
use crate::supervisor::{ContainerSupervisor, STOP_TIMEOUT};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Process lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Initializing,
    Running,
    ShuttingDown,
    Terminated,
}

/// Why the process is exiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Loop ended after a shutdown request
    Completed,
    /// Unrecoverable error
    Fatal,
    /// Terminated by signal `n`
    Signal(i32),
}

impl ExitReason {
    /// 0, 1 or 128 + signal number
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Fatal => 1,
            Self::Signal(n) => 128 + n,
        }
    }
}

pub struct LifecycleController {
    shutting_down: AtomicBool,
    stop: StopSignal,
    phase: Mutex<LifecyclePhase>,
    container: Arc<ContainerSupervisor>,
    log_stream: AsyncMutex<Option<SupervisedProcess>>,
    children: AsyncMutex<Vec<SupervisedProcess>>,
    session_file: Option<PathBuf>,
    process_grace: Duration,
    container_grace: Duration,
}

impl LifecycleController {
    pub fn new(container: Arc<ContainerSupervisor>) -> Self {
        Self {
            shutting_down: AtomicBool::new(false),
            stop: StopSignal::new(),
            phase: Mutex::new(LifecyclePhase::Initializing),
            container,
            log_stream: AsyncMutex::new(None),
            children: AsyncMutex::new(Vec::new()),
            session_file: None,
            process_grace: DEFAULT_GRACE_PERIOD,
            container_grace: STOP_TIMEOUT,
        }
    }

    /// Session record reported as preserved at shutdown
    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    /// Share a stop signal handed out before the controller existed
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn with_process_grace(mut self, grace: Duration) -> Self {
        self.process_grace = grace;
        self
    }

    pub fn container(&self) -> &Arc<ContainerSupervisor> {
        &self.container
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.lock()
    }

    pub fn mark_running(&self) {
        let mut phase = self.phase.lock();
        if *phase == LifecyclePhase::Initializing {
            *phase = LifecyclePhase::Running;
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Install the log stream. A replaced stream is dropped (and killed).
    pub async fn set_log_stream(&self, stream: SupervisedProcess) {
        if self.is_shutting_down() {
            debug!(process = %stream.name(), "Shutting down, discarding log stream");
            return;
        }
        let previous = self.log_stream.lock().await.replace(stream);
        if let Some(old) = previous {
            debug!(process = %old.name(), pid = ?old.pid(), "Replacing log stream");
        }
    }

    /// True when a log stream was installed and has since exited
    pub async fn log_stream_exited(&self) -> bool {
        match self.log_stream.lock().await.as_mut() {
            Some(stream) => !stream.is_running(),
            None => false,
        }
    }

    /// Register a child that teardown must stop.
    ///
    /// Agent invocations are not tracked here: they own their child and end it
    /// when the shared [`StopSignal`] fires, and teardown waits for them to
    /// drain. This is for helpers that outlive a single call.
    pub async fn track(&self, process: SupervisedProcess) {
        self.children.lock().await.push(process);
    }

    pub async fn tracked_count(&self) -> usize {
        self.children.lock().await.len()
    }

    /// Run teardown. Returns false if teardown already ran or is running.
    pub async fn shutdown(&self) -> bool {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Shutdown already in progress");
            return false;
        }
        *self.phase.lock() = LifecyclePhase::ShuttingDown;
        info!("Shutting down, stopping child processes");

        let stream = self.log_stream.lock().await.take();
        if let Some(mut stream) = stream {
            let outcome = stream.terminate(self.process_grace).await;
            debug!(process = %stream.name(), outcome = ?outcome, "Log stream stopped");
        }

        self.stop.trigger();

        let children = std::mem::take(&mut *self.children.lock().await);
        let mut stopping = JoinSet::new();
        for mut child in children {
            let grace = self.process_grace;
            stopping.spawn(async move {
                let outcome = child.terminate(grace).await;
                debug!(process = %child.name(), outcome = ?outcome, "Child stopped");
            });
        }
        while stopping.join_next().await.is_some() {}

        // In-flight invocations terminate their own child on the stop request
        if !self.stop.drained(self.process_grace * 2).await {
            warn!(
                in_flight = self.stop.in_flight(),
                "Agent invocations still running, continuing teardown"
            );
        }

        info!(container = %self.container.name(), "Stopping MCP daemon container");
        self.container.stop(self.container_grace).await;

        if let Some(path) = &self.session_file {
            if path.exists() {
                info!(file = %path.display(), "Session ID preserved for restart recovery");
            }
        }

        *self.phase.lock() = LifecyclePhase::Terminated;
        info!("Shutdown complete");
        true
    }
}
