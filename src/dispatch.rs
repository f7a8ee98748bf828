//! Agent Dispatcher seam and the instruction handed to the agent.

use crate::config::RunnerConfig;
use crate::core::task::Task;
use crate::Result;
use std::fmt::Write;

/// Hands a task to whatever executes it (an LLM agent, a CLI tool, ...).
///
/// `dispatch` is fire-and-forget and is called on the runner's actor task,
/// so it must return promptly. The outcome is reported later through
/// [`crate::TaskRunner::notify_execution_completed`] or
/// [`crate::TaskRunner::notify_execution_failed`]. Returning `Err` means the
/// task never started; the runner skips it and moves on.
pub trait AgentDispatcher: Send + Sync {
    fn dispatch(&self, task: &Task, instruction: String) -> Result<()>;

    /// Drop per-task conversation state. Called before every dispatch.
    fn reset_context(&self) {}
}

/// Preamble telling the agent which task it owns and how to report progress.
pub fn agent_preamble(task: &Task, config: &RunnerConfig) -> String {
    let mut out = format!("You are implementing task {}", task.display_id());
    if !task.title.is_empty() {
        let _ = write!(out, ": {}", task.title);
    }
    out.push_str(".\n\n");
    out.push_str("Follow the acceptance criteria exactly.\n\n");
    out.push_str("As you work, keep the task record up to date:\n");
    out.push_str("1. Set the status to 'In Progress' when you start.\n");
    out.push_str("2. Check off each acceptance criterion as you complete it.\n");
    out.push_str("3. Append notes describing what you changed and why.\n");
    out.push_str("4. When finished, write a final summary of what was done.\n");
    let _ = writeln!(out, "5. Set the status to '{}'.", config.done_status);
    out
}

/// Structured `<TaskSpec>` block; empty sections are left out.
pub fn task_context(task: &Task) -> String {
    let mut out = String::from("<TaskSpec>\n");
    let _ = writeln!(out, "Task ID: {}", task.display_id());
    if !task.title.is_empty() {
        let _ = writeln!(out, "Title: {}", task.title);
    }
    if !task.status.is_empty() {
        let _ = writeln!(out, "Status: {}", task.status);
    }
    if !task.labels.is_empty() {
        let _ = writeln!(out, "Labels: {}", task.labels.join(", "));
    }

    if !task.description.trim().is_empty() {
        let _ = writeln!(out, "\n## Description\n{}", task.description.trim_end());
    }

    if !task.acceptance_criteria.is_empty() {
        out.push_str("\n## Acceptance Criteria\n");
        for ac in &task.acceptance_criteria {
            let mark = if ac.checked { 'x' } else { ' ' };
            let _ = writeln!(out, "- [{}] {}", mark, ac.text);
        }
    }

    if !task.dependencies.is_empty() {
        out.push_str("\n## Dependencies\n");
        for dep in &task.dependencies {
            let _ = writeln!(out, "- {}", dep);
        }
    }

    out.push_str("</TaskSpec>");
    out
}

/// Full instruction: preamble, task block and closing request.
pub fn render_instruction(task: &Task, config: &RunnerConfig) -> String {
    format!(
        "{}\n\n{}\n\n{}",
        agent_preamble(task, config),
        task_context(task),
        config.effective_instruction_suffix()
    )
}
