//! Run progress callbacks.

use super::state::RunnerState;
use crate::core::task::Task;
use std::sync::Arc;

/// Observer of run progress. Every method defaults to a no-op.
///
/// Calls are made on the runner's actor task, one at a time and in
/// registration order, so implementations must not block. `index` is the
/// 0-based position of the task in the execution order.
pub trait RunnerListener: Send + Sync {
    fn on_run_started(&self, _total: usize) {}

    fn on_task_started(&self, _task: &Task, _index: usize, _total: usize) {}

    fn on_task_completed(&self, _task: &Task, _index: usize, _total: usize) {}

    fn on_task_skipped(&self, _task: &Task, _index: usize, _total: usize, _reason: &str) {}

    fn on_run_finished(
        &self,
        _completed: usize,
        _skipped: usize,
        _total: usize,
        _final_state: RunnerState,
    ) {
    }
}

/// Handle returned by [`crate::TaskRunner::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    listeners: Vec<(ListenerId, Arc<dyn RunnerListener>)>,
}

impl ListenerRegistry {
    pub fn add(&mut self, id: ListenerId, listener: Arc<dyn RunnerListener>) {
        self.listeners.push((id, listener));
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn each(&self, mut f: impl FnMut(&dyn RunnerListener)) {
        for (_, listener) in &self.listeners {
            f(listener.as_ref());
        }
    }
}
