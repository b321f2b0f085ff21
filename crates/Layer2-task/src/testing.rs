//! Scripted runtime and agent for unit tests

use crate::agent::{AgentOutcome, AgentRunner, SessionDirective};
use crate::container::{ContainerError, ContainerExecutor, ContainerLogs, ContainerSpec};
use crate::lifecycle::LifecycleController;
use crate::process::SupervisedProcess;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;

fn sh(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
}

/// Long-running child
pub fn sleeper(name: &str) -> SupervisedProcess {
    SupervisedProcess::spawn(name, sh("sleep 30")).unwrap()
}

/// Child that has already exited
pub async fn finished(name: &str) -> SupervisedProcess {
    let mut proc = SupervisedProcess::spawn(name, sh("true")).unwrap();
    proc.wait_timeout(Duration::from_secs(5)).await.unwrap();
    proc
}

/// Collects everything logged on the current thread while alive
pub struct CapturedLogs {
    buf: Arc<Mutex<Vec<u8>>>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl CapturedLogs {
    pub fn start() -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || LogBuffer(sink.clone()))
            .finish();
        Self {
            buf,
            _guard: tracing::subscriber::set_default(subscriber),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }
}

struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Container runtime with scripted answers. Every call is recorded.
#[derive(Default)]
pub struct ScriptedExecutor {
    calls: Mutex<Vec<String>>,
    running: Mutex<VecDeque<bool>>,
    default_not_running: bool,
    logs: Mutex<VecDeque<ContainerLogs>>,
    failing_pulls: HashSet<String>,
    fail_run: bool,
    fail_stop: bool,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers for successive `is_running` calls; afterwards the default applies
    pub fn with_running(self, answers: impl IntoIterator<Item = bool>) -> Self {
        self.running.lock().extend(answers);
        self
    }

    pub fn with_default_running(mut self, running: bool) -> Self {
        self.default_not_running = !running;
        self
    }

    /// Queue one `logs` answer; an empty capture is returned once drained
    pub fn with_logs(self, logs: ContainerLogs) -> Self {
        self.logs.lock().push_back(logs);
        self
    }

    pub fn failing_pull(mut self, image: &str) -> Self {
        self.failing_pulls.insert(image.to_string());
        self
    }

    pub fn failing_run(mut self) -> Self {
        self.fail_run = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ContainerExecutor for ScriptedExecutor {
    async fn pull_image(
        &self,
        image: &str,
        _platform: Option<&str>,
    ) -> Result<String, ContainerError> {
        self.record(format!("pull {}", image));
        if self.failing_pulls.contains(image) {
            Err(ContainerError::ImageNotFound(image.to_string()))
        } else {
            Ok(format!("Status: Image is up to date for {}\n", image))
        }
    }

    async fn run_detached(&self, spec: &ContainerSpec) -> Result<(), ContainerError> {
        self.record(format!("run {}", spec.name));
        if self.fail_run {
            Err(ContainerError::StartFailed("port is already allocated".into()))
        } else {
            Ok(())
        }
    }

    async fn is_running(&self, name: &str) -> bool {
        self.record(format!("inspect {}", name));
        self.running
            .lock()
            .pop_front()
            .unwrap_or(!self.default_not_running)
    }

    async fn logs(&self, name: &str) -> Result<ContainerLogs, ContainerError> {
        self.record(format!("logs {}", name));
        Ok(self.logs.lock().pop_front().unwrap_or_default())
    }

    fn follow_logs(&self, name: &str, _dest: &Path) -> Result<SupervisedProcess, ContainerError> {
        self.record(format!("follow {}", name));
        SupervisedProcess::spawn(format!("{}-logs", name), sh("sleep 30"))
            .map_err(|e| ContainerError::ExecutionFailed(e.to_string()))
    }

    async fn stop_container(&self, name: &str, timeout: Duration) -> Result<(), ContainerError> {
        self.record(format!("stop -t {} {}", timeout.as_secs(), name));
        if self.fail_stop {
            Err(ContainerError::ExecutionFailed("No such container".into()))
        } else {
            Ok(())
        }
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<(), ContainerError> {
        self.record(format!("rm {}{}", if force { "-f " } else { "" }, name));
        Ok(())
    }
}

/// One recorded agent invocation
#[derive(Debug, Clone)]
pub struct AgentCall {
    pub directive: SessionDirective,
    pub prompt: String,
    pub timeout: Duration,
    pub at: Instant,
}

/// Agent with scripted outcomes. Optionally requests shutdown after N calls.
pub struct ScriptedAgent {
    outcomes: Mutex<VecDeque<AgentOutcome>>,
    default: AgentOutcome,
    calls: Mutex<Vec<AgentCall>>,
    stop_after: Option<usize>,
    lifecycle: Mutex<Option<Arc<LifecycleController>>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            default: AgentOutcome::Success,
            calls: Mutex::new(Vec::new()),
            stop_after: None,
            lifecycle: Mutex::new(None),
        }
    }

    /// Queue the next outcome
    pub fn then(self, outcome: AgentOutcome) -> Self {
        self.outcomes.lock().push_back(outcome);
        self
    }

    /// Outcome once the queue is drained
    pub fn with_default(mut self, outcome: AgentOutcome) -> Self {
        self.default = outcome;
        self
    }

    pub fn stop_after(mut self, calls: usize) -> Self {
        self.stop_after = Some(calls);
        self
    }

    /// Controller to shut down when `stop_after` is reached
    pub fn stop_via(&self, lifecycle: Arc<LifecycleController>) {
        *self.lifecycle.lock() = Some(lifecycle);
    }

    pub fn calls(&self) -> Vec<AgentCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl AgentRunner for ScriptedAgent {
    async fn invoke(
        &self,
        directive: &SessionDirective,
        prompt: &str,
        timeout: Duration,
    ) -> AgentOutcome {
        let count = {
            let mut calls = self.calls.lock();
            calls.push(AgentCall {
                directive: directive.clone(),
                prompt: prompt.to_string(),
                timeout,
                at: Instant::now(),
            });
            calls.len()
        };

        if self.stop_after == Some(count) {
            let lifecycle = self.lifecycle.lock().clone();
            if let Some(lifecycle) = lifecycle {
                lifecycle.shutdown().await;
            }
        }

        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}
