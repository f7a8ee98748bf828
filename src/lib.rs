pub mod config;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod log;
pub mod store;

// Serialized runner actor
pub mod runner;

pub use crate::core::{plan, sort, sort_layers, unsatisfied, ExecutionOrder, Task};
pub use config::RunnerConfig;
pub use dispatch::{render_instruction, AgentDispatcher};
pub use error::{CycleError, Error, Result};
pub use runner::{
    ListenerId, RunId, RunOutcome, RunSnapshot, RunSummary, RunnerListener, RunnerState,
    TaskRunner,
};
pub use store::{MemoryTaskStore, SubscriptionId, TaskStore};
