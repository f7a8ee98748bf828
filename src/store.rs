//! Task Store seam.
//!
//! The runner never owns tasks: it reads them from a [`TaskStore`] and learns
//! about edits through change callbacks. Callbacks carry no payload; the
//! runner re-reads whatever it cares about.

use crate::core::task::{normalize_id, Task};
use crate::{rlog_debug, Error, Result};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback invoked after any change to the store's contents.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by [`TaskStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Source of truth for tasks, shared between the runner and whatever edits
/// tasks (usually the agent, through its own tools).
///
/// Implementations must be safe to read concurrently. Callbacks may be
/// invoked from any thread and must not be invoked while holding a lock
/// that [`TaskStore::get_task`] needs.
pub trait TaskStore: Send + Sync {
    fn get_all_tasks(&self) -> Vec<Task>;

    /// Look up a task by id, case-insensitively.
    fn get_task(&self, id: &str) -> Option<Task>;

    /// Insert or replace the task with the same id.
    fn update_task(&self, task: Task) -> Result<()>;

    fn subscribe(&self, on_change: ChangeCallback) -> SubscriptionId;

    /// Stop delivering changes to a subscriber. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// In-memory [`TaskStore`] preserving insertion order.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<Vec<Task>>,
    subscribers: Mutex<Vec<(SubscriptionId, ChangeCallback)>>,
    next_id: AtomicU64,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with `tasks`; later duplicates of an id replace earlier ones.
    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let store = Self::new();
        {
            let mut guard = store.tasks.write();
            for task in tasks {
                upsert(&mut guard, task);
            }
        }
        store
    }

    /// Change a task's status and notify subscribers.
    pub fn set_status(&self, id: &str, status: &str) -> Result<()> {
        {
            let mut tasks = self.tasks.write();
            let task = tasks
                .iter_mut()
                .find(|t| t.has_id(id))
                .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
            task.status = status.to_string();
        }
        rlog_debug!("MemoryTaskStore: {} -> {}", id, status);
        self.notify();
        Ok(())
    }

    /// Remove a task, returning it if it existed.
    pub fn remove_task(&self, id: &str) -> Option<Task> {
        let removed = {
            let mut tasks = self.tasks.write();
            let pos = tasks.iter().position(|t| t.has_id(id))?;
            tasks.remove(pos)
        };
        self.notify();
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Run every callback outside the locks so a callback may read the store.
    fn notify(&self) {
        let callbacks: Vec<ChangeCallback> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in callbacks {
            cb();
        }
    }
}

fn upsert(tasks: &mut Vec<Task>, task: Task) {
    let key = normalize_id(&task.id);
    match tasks.iter_mut().find(|t| normalize_id(&t.id) == key) {
        Some(existing) => *existing = task,
        None => tasks.push(task),
    }
}

impl TaskStore for MemoryTaskStore {
    fn get_all_tasks(&self) -> Vec<Task> {
        self.tasks.read().clone()
    }

    fn get_task(&self, id: &str) -> Option<Task> {
        self.tasks.read().iter().find(|t| t.has_id(id)).cloned()
    }

    fn update_task(&self, task: Task) -> Result<()> {
        if task.key().is_none() {
            return Err(Error::Validation("task id must not be blank".to_string()));
        }
        upsert(&mut self.tasks.write(), task);
        self.notify();
        Ok(())
    }

    fn subscribe(&self, on_change: ChangeCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push((id, on_change));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().retain(|(sid, _)| *sid != id);
    }
}
