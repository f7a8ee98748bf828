//! Runner states and the snapshots published to query callers.

use crate::core::task::Task;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a [`crate::TaskRunner`].
///
/// `Idle` is both the initial state and where every run ends up; the
/// terminal states are only observed by listeners in `on_run_finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RunnerState {
    #[default]
    Idle,
    RunningTask,
    WaitingForCompletion,
    AllCompleted,
    Cancelled,
    Error,
}

impl RunnerState {
    /// A run is in progress; new runs are rejected.
    pub fn is_active(&self) -> bool {
        matches!(self, RunnerState::RunningTask | RunnerState::WaitingForCompletion)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerState::Idle => "idle",
            RunnerState::RunningTask => "running_task",
            RunnerState::WaitingForCompletion => "waiting_for_completion",
            RunnerState::AllCompleted => "all_completed",
            RunnerState::Cancelled => "cancelled",
            RunnerState::Error => "error",
        }
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 hex characters, for log lines.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Final counts of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Option<RunId>,
    pub completed: usize,
    pub skipped: usize,
    pub total: usize,
    pub final_state: RunnerState,
}

/// Point-in-time view of the runner, republished after every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSnapshot {
    pub state: RunnerState,
    pub run_id: Option<RunId>,
    pub current_task: Option<Task>,
    /// 0-based position of `current_task` in the execution order.
    pub current_index: Option<usize>,
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub last_run: Option<RunSummary>,
}

impl RunSnapshot {
    pub fn is_running(&self) -> bool {
        self.state.is_active()
    }
}

/// Result of asking the runner to start a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Started { run_id: RunId, total: usize },
    /// A run was already in progress; nothing changed.
    AlreadyRunning,
    /// Nothing schedulable was selected.
    EmptySelection,
}

impl RunOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, RunOutcome::Started { .. })
    }
}
