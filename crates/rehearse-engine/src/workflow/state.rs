use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Idle,
    Setup,
    Running,
    Completing,
    Failing,
    Restarting,
    Stopped,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowState::Idle => "idle",
            WorkflowState::Setup => "setup",
            WorkflowState::Running => "running",
            WorkflowState::Completing => "completing",
            WorkflowState::Failing => "failing",
            WorkflowState::Restarting => "restarting",
            WorkflowState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Mutable per-run counters, zeroed when a run starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleState {
    /// Running passes started so far. Observability only.
    pub iteration: u64,
    pub consecutive_failures: u32,
    pub last_completion_check: bool,
}

/// Why a run that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Cancelled,
    IterationLimit,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::IterationLimit => write!(f, "iteration limit reached"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    /// Step invocations per Running pass.
    pub max_steps_per_cycle: usize,
    pub max_consecutive_failures: u32,
    /// Stop after this many Running passes.
    pub max_iterations: Option<u64>,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            max_steps_per_cycle: 10,
            max_consecutive_failures: 3,
            max_iterations: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowSummary {
    pub workflow: String,
    pub iterations: u64,
    pub recoveries: u64,
    /// Items opened, when the workflow rotates over items.
    pub items_entered: u64,
    pub steps_executed: u64,
    pub step_failures: u64,
    pub stop_reason: StopReason,
}
