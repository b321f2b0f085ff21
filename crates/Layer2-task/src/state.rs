//! Container state machine
//!
//! Readiness is two independent polls: the container reaching "running", then
//! the service inside it reporting its upstream connection. Transitions are pure
//! so the supervisor's blocking calls can be scripted in tests.

use serde::{Deserialize, Serialize};

/// Possible states of the worker container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    /// No container with the logical name exists
    Absent,

    /// Stale instance removed, `run` issued
    Starting,

    /// Polling the runtime for the running flag
    WaitingRunning,

    /// Running; polling logs for the connection marker
    WaitingConnected,

    /// Marker observed, upstream connected
    Connected,

    /// Running but marker never observed within the bound (proceed with a warning)
    Degraded,

    /// Never reached running, or exited while we were waiting
    Dead,
}

/// Observation fed into the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeEvent {
    /// Stale container removed
    Cleaned,
    /// `run` succeeded
    Launched,
    /// Result of one running-state inspection
    RunningCheck { running: bool },
    /// Result of one log scan plus the liveness re-check
    LogCheck { marker_seen: bool, alive: bool },
}

impl ContainerState {
    /// Pure transition function.
    ///
    /// `attempt` is 1-based; a check that fails on `attempt == max_attempts`
    /// exhausts the bound.
    pub fn next(self, event: ProbeEvent, attempt: u32, max_attempts: u32) -> ContainerState {
        use ContainerState::*;
        use ProbeEvent::*;

        match (self, event) {
            (Absent, Cleaned) => Starting,
            (Starting, Launched) => WaitingRunning,

            (WaitingRunning, RunningCheck { running: true }) => WaitingConnected,
            (WaitingRunning, RunningCheck { running: false }) if attempt >= max_attempts => Dead,
            (WaitingRunning, RunningCheck { running: false }) => WaitingRunning,

            (WaitingConnected, LogCheck { marker_seen: true, .. }) => Connected,
            (WaitingConnected, LogCheck { alive: false, .. }) => Dead,
            (WaitingConnected, LogCheck { .. }) if attempt >= max_attempts => Degraded,
            (WaitingConnected, LogCheck { .. }) => WaitingConnected,

            (state, _) => state,
        }
    }

    /// `run` succeeded and the instance has not been declared dead
    pub fn is_launched(&self) -> bool {
        matches!(
            self,
            Self::WaitingRunning | Self::WaitingConnected | Self::Connected | Self::Degraded
        )
    }

    /// Container is usable by the poll loop
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Connected | Self::Degraded)
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Starting => "starting",
            Self::WaitingRunning => "waiting-running",
            Self::WaitingConnected => "waiting-connected",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Dead => "dead",
        }
    }
}

impl Default for ContainerState {
    fn default() -> Self {
        Self::Absent
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
