//! Task data model for the backlog.
//!
//! Tasks are owned by the task store; the runner only reads them. Identity
//! is the string `id`, compared case-insensitively everywhere, so lookups go
//! through [`normalize_id`].

use serde::{Deserialize, Serialize};

/// Ordinal assigned to tasks that never had one. Sorts after explicitly
/// ordered tasks with smaller values.
pub const DEFAULT_ORDINAL: i64 = 1000;

/// Lowercase lookup key for a task id.
pub fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase()
}

/// A checklist item the agent is expected to tick off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    pub text: String,
    #[serde(default)]
    pub checked: bool,
}

impl AcceptanceCriterion {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            checked: false,
        }
    }
}

/// A single backlog task.
///
/// Only `id`, `status`, `dependencies` and `ordinal` matter for ordering and
/// completion; the rest is payload rendered into the agent instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Identifier such as `TASK-12`. Blank ids are never scheduled.
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Free-form workflow status; the configured Done value ends the task.
    #[serde(default)]
    pub status: String,
    /// Ids this task waits on. May point outside the selection or at tasks
    /// that no longer exist.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Tie-breaker among tasks that become ready together; lower runs first.
    #[serde(default = "default_ordinal")]
    pub ordinal: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
}

fn default_ordinal() -> i64 {
    DEFAULT_ORDINAL
}

impl Task {
    /// Create a `To Do` task with no dependencies and the default ordinal.
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            status: "To Do".to_string(),
            dependencies: Vec::new(),
            ordinal: DEFAULT_ORDINAL,
            description: String::new(),
            labels: Vec::new(),
            acceptance_criteria: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_ordinal(mut self, ordinal: i64) -> Self {
        self.ordinal = ordinal;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.labels.push(label.to_string());
        self
    }

    pub fn with_criterion(mut self, text: &str) -> Self {
        self.acceptance_criteria.push(AcceptanceCriterion::new(text));
        self
    }

    /// Lowercase lookup key, or `None` for a blank id.
    pub fn key(&self) -> Option<String> {
        if self.id.trim().is_empty() {
            None
        } else {
            Some(normalize_id(&self.id))
        }
    }

    /// Case-insensitive id comparison.
    pub fn has_id(&self, id: &str) -> bool {
        self.key().is_some_and(|k| k == normalize_id(id))
    }

    /// Id for display, with a placeholder for blank ids.
    pub fn display_id(&self) -> &str {
        if self.id.trim().is_empty() {
            "?"
        } else {
            &self.id
        }
    }

    /// Whether this task's status equals `done_status` (case-insensitive).
    pub fn is_done(&self, done_status: &str) -> bool {
        self.status.trim().eq_ignore_ascii_case(done_status.trim())
    }
}
