//! Dependency ordering for a task selection.
//!
//! The selection is turned into a petgraph `DiGraph` with one node per
//! selected task and an edge `dep -> task` for every dependency that is also
//! selected. Dependencies outside the selection are not edges: they are
//! checked when the runner reaches the task (see [`crate::core::deps`]).
//!
//! Ordering is Kahn's algorithm processed one layer at a time. Each layer is
//! sorted by `(ordinal, numeric part of the id, insertion order)` so the
//! output never depends on hash iteration order.

use crate::core::task::{normalize_id, Task};
use crate::error::CycleError;
use crate::{rlog_debug, rlog_error};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

static ID_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// First run of digits in an id, used as a secondary sort key.
/// Ids without digits (or with an overflowing number) sort last.
pub fn id_number(id: &str) -> u64 {
    ID_NUMBER_RE
        .find(id)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(u64::MAX)
}

/// The order in which a run visits its tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOrder {
    /// One task after another.
    Sequential(Vec<Task>),
    /// Groups whose members only depend on earlier groups.
    Layered(Vec<Vec<Task>>),
}

impl ExecutionOrder {
    /// Total number of tasks across all layers.
    pub fn len(&self) -> usize {
        match self {
            ExecutionOrder::Sequential(tasks) => tasks.len(),
            ExecutionOrder::Layered(layers) => layers.iter().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of layers; a sequential order counts each task as its own layer.
    pub fn layer_count(&self) -> usize {
        match self {
            ExecutionOrder::Sequential(tasks) => tasks.len(),
            ExecutionOrder::Layered(layers) => layers.len(),
        }
    }

    /// Flattened view in execution order.
    pub fn tasks(&self) -> Vec<&Task> {
        match self {
            ExecutionOrder::Sequential(tasks) => tasks.iter().collect(),
            ExecutionOrder::Layered(layers) => layers.iter().flatten().collect(),
        }
    }

    pub fn into_tasks(self) -> Vec<Task> {
        match self {
            ExecutionOrder::Sequential(tasks) => tasks,
            ExecutionOrder::Layered(layers) => layers.into_iter().flatten().collect(),
        }
    }

    /// One-line rendering for logs, e.g. `L1: T1, T2 | L2: T3`.
    pub fn describe(&self) -> String {
        match self {
            ExecutionOrder::Sequential(tasks) => tasks
                .iter()
                .map(|t| t.display_id())
                .collect::<Vec<_>>()
                .join(" -> "),
            ExecutionOrder::Layered(layers) => layers
                .iter()
                .enumerate()
                .map(|(i, layer)| {
                    let ids: Vec<&str> = layer.iter().map(|t| t.display_id()).collect();
                    format!("L{}: {}", i + 1, ids.join(", "))
                })
                .collect::<Vec<_>>()
                .join(" | "),
        }
    }
}

/// Graph over the selected tasks only. Node weights are lowercase keys;
/// node indices follow first-seen selection order.
struct SelectionGraph<'a> {
    graph: DiGraph<String, ()>,
    tasks: HashMap<String, &'a Task>,
}

impl<'a> SelectionGraph<'a> {
    fn build(selected: &'a [Task], universe: &[Task]) -> Self {
        let mut graph = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();
        let mut tasks: HashMap<String, &'a Task> = HashMap::new();

        for task in selected {
            let Some(key) = task.key() else {
                rlog_debug!("sorter: ignoring selected task with blank id");
                continue;
            };
            if index.contains_key(&key) {
                rlog_debug!("sorter: duplicate selection of {}, keeping first", task.id);
                continue;
            }
            index.insert(key.clone(), graph.add_node(key.clone()));
            tasks.insert(key, task);
        }

        let known: HashSet<String> = universe.iter().filter_map(Task::key).collect();

        for (key, task) in &tasks {
            let to = index[key];
            for dep in &task.dependencies {
                let dep_key = normalize_id(dep);
                match index.get(&dep_key) {
                    // update_edge keeps a dependency listed twice from counting twice
                    Some(&from) => {
                        graph.update_edge(from, to, ());
                    }
                    None if !known.contains(&dep_key) => {
                        rlog_debug!(
                            "sorter: {} depends on unknown task {}",
                            task.display_id(),
                            dep
                        );
                    }
                    None => {}
                }
            }
        }

        Self { graph, tasks }
    }

    fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    fn task(&self, node: NodeIndex) -> Option<&'a Task> {
        self.tasks.get(&self.graph[node]).copied()
    }

    /// Resolve a node back to its task's original id, falling back to the key.
    fn original_id(&self, node: NodeIndex) -> String {
        self.task(node)
            .map(|t| t.id.clone())
            .unwrap_or_else(|| self.graph[node].clone())
    }

    fn sort_layer(&self, layer: &mut [NodeIndex]) {
        layer.sort_by_key(|&node| {
            let (ordinal, number) = self
                .task(node)
                .map(|t| (t.ordinal, id_number(&t.id)))
                .unwrap_or((i64::MAX, u64::MAX));
            (ordinal, number, node.index())
        });
    }

    fn layers(&self) -> Result<Vec<Vec<NodeIndex>>, CycleError> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();

        let mut queue: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| in_degree[n.index()] == 0)
            .collect();

        let mut layers = Vec::new();
        let mut emitted = 0;

        while !queue.is_empty() {
            let mut layer = std::mem::take(&mut queue);
            self.sort_layer(&mut layer);

            for &node in &layer {
                for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                    let degree = &mut in_degree[dependent.index()];
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push(dependent);
                    }
                }
            }

            emitted += layer.len();
            layers.push(layer);
        }

        if emitted < self.node_count() {
            let blocked: Vec<String> = self
                .graph
                .node_indices()
                .filter(|n| in_degree[n.index()] > 0)
                .map(|n| self.original_id(n))
                .collect();
            self.log_cycles();
            rlog_error!("Circular dependency detected: {}", blocked.join(", "));
            return Err(CycleError::new(blocked));
        }

        Ok(layers)
    }

    fn log_cycles(&self) {
        for component in tarjan_scc(&self.graph) {
            let is_cycle = component.len() > 1
                || component
                    .first()
                    .is_some_and(|&n| self.graph.contains_edge(n, n));
            if is_cycle {
                let ids: Vec<String> = component.iter().map(|&n| self.original_id(n)).collect();
                rlog_debug!("sorter: cycle through {}", ids.join(" <-> "));
            }
        }
    }
}

/// Order `selected` so every task comes after the selected tasks it depends on.
///
/// `universe` is every known task; it is only consulted to report
/// dependencies on tasks that no longer exist.
pub fn sort(selected: &[Task], universe: &[Task]) -> Result<Vec<Task>, CycleError> {
    Ok(sort_layers(selected, universe)?
        .into_iter()
        .flatten()
        .collect())
}

/// Group `selected` into layers; every task's selected dependencies live in
/// earlier layers. Flattening the result gives exactly [`sort`]'s order.
pub fn sort_layers(selected: &[Task], universe: &[Task]) -> Result<Vec<Vec<Task>>, CycleError> {
    if selected.is_empty() {
        return Ok(Vec::new());
    }

    let graph = SelectionGraph::build(selected, universe);
    let layers = graph.layers()?;

    Ok(layers
        .into_iter()
        .map(|layer| {
            layer
                .into_iter()
                .filter_map(|node| graph.task(node).cloned())
                .collect()
        })
        .collect())
}

/// Layered execution order for a selection.
pub fn plan(selected: &[Task], universe: &[Task]) -> Result<ExecutionOrder, CycleError> {
    Ok(ExecutionOrder::Layered(sort_layers(selected, universe)?))
}
