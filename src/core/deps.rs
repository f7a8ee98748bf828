//! Readiness check run just before a task is dispatched.

use crate::core::task::{normalize_id, Task};
use std::collections::{HashMap, HashSet};

/// Dependencies of `task` that are not yet satisfied, in declaration order
/// and with their original spelling. Empty means the task may run.
///
/// A dependency is satisfied when it is in `completed`, or when it lies
/// outside `selected` and its task in `universe` has `done_status`.
/// A selected dependency that has not completed in this run never counts,
/// whatever its stored status. Dependencies missing from `universe` are
/// unsatisfied.
///
/// `completed` and `selected` hold lowercase keys (see [`normalize_id`]).
pub fn unsatisfied(
    task: &Task,
    completed: &HashSet<String>,
    selected: &HashSet<String>,
    universe: &[Task],
    done_status: &str,
) -> Vec<String> {
    if task.dependencies.is_empty() {
        return Vec::new();
    }

    let by_key: HashMap<String, &Task> = universe
        .iter()
        .filter_map(|t| t.key().map(|k| (k, t)))
        .collect();

    task.dependencies
        .iter()
        .filter(|dep| {
            let key = normalize_id(dep);
            if completed.contains(&key) {
                return false;
            }
            if selected.contains(&key) {
                return true;
            }
            !by_key.get(&key).is_some_and(|ext| ext.is_done(done_status))
        })
        .cloned()
        .collect()
}
