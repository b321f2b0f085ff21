//! # keeper-task
//!
//! Supervision layer for Botkeeper.
//! Keeps the MCP daemon container alive, binds agent invocations to a
//! persistent session and drives the poll loop until shutdown.
//!
//! ## Features
//!
//! - Container start with two-phase readiness (running, connected)
//! - Resume-or-recreate session initialization
//! - Poll loop with capped linear backoff and a failure budget
//! - Ordered, idempotent teardown of every child process

pub mod agent;
pub mod container;
pub mod daemon;
pub mod lifecycle;
pub mod poll;
pub mod process;
pub mod session;
pub mod state;
pub mod supervisor;

#[cfg(test)]
mod testing;

// Container system
pub use container::{
    ContainerEnv, ContainerError, ContainerExecutor, ContainerLogs, ContainerSpec, DockerExecutor,
    PortMapping,
};
pub use state::{ContainerState, ProbeEvent};
pub use supervisor::{ContainerSupervisor, ReadinessConfig, CONNECTED_MARKER, STOP_TIMEOUT};

// Process system
pub use process::{
    InFlight, Liveness, StopSignal, SupervisedProcess, TerminateOutcome, DEFAULT_GRACE_PERIOD,
};

// Agent / session
pub use agent::{poll_prompt, AgentOutcome, AgentRunner, CliAgent, SessionDirective, INIT_PROMPT};
pub use session::{SessionManager, SESSION_INIT_TIMEOUT};

// Poll loop
pub use poll::{
    backoff_delay, FailureCounter, FailureVerdict, PollConfig, PollLoop, BACKOFF_STEP,
    POLL_CYCLE_CEILING, SUCCESS_PAUSE,
};

// Lifecycle
pub use daemon::{daemon_spec, Daemon, DAEMON_CONTAINER_PORT};
pub use lifecycle::{ExitReason, LifecycleController, LifecyclePhase};
