use thiserror::Error;

/// The selection could not be ordered because its dependency edges form a cycle.
///
/// `task_ids` lists every selected task still blocked when Kahn's algorithm
/// ran out of zero in-degree nodes: members of a cycle plus anything
/// downstream of one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("circular dependency among tasks: {}", task_ids.join(", "))]
pub struct CycleError {
    pub task_ids: Vec<String>,
}

impl CycleError {
    pub fn new(task_ids: Vec<String>) -> Self {
        Self { task_ids }
    }

    /// Whether the blocked set contains `id` (case-insensitive).
    pub fn contains(&self, id: &str) -> bool {
        self.task_ids.iter().any(|t| t.eq_ignore_ascii_case(id))
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    #[error("Task runner has been shut down")]
    RunnerStopped,
}

pub type Result<T> = std::result::Result<T, Error>;
