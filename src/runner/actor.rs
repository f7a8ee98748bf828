//! The runner's state machine.
//!
//! A single tokio task owns every piece of run state and consumes one
//! mailbox. Public commands, store change callbacks, dispatcher callbacks
//! and grace timer expiries all arrive as [`Command`]s, so no two of them
//! can interleave a state transition.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::listener::{ListenerId, ListenerRegistry, RunnerListener};
use super::state::{RunId, RunOutcome, RunSnapshot, RunSummary, RunnerState};
use super::timer::GraceTimer;
use crate::config::RunnerConfig;
use crate::core::{deps, sorter, Task};
use crate::dispatch::{render_instruction, AgentDispatcher};
use crate::log::LogSampler;
use crate::store::{SubscriptionId, TaskStore};
use crate::{rlog, rlog_debug, rlog_trace, rlog_warn, Result};

pub(crate) const NOT_FOUND_REASON: &str = "task not found";
pub(crate) const NOT_MARKED_DONE_REASON: &str = "execution completed but task not marked Done";

/// Cancellation flag shared with every [`super::TaskRunner`] handle.
///
/// Tripped synchronously by `cancel()`, so the actor sees it before the next
/// dispatch even while the matching [`Command::Cancel`] is still queued.
/// Replaced with a fresh token when a run starts.
pub(crate) type CancelFlag = Arc<Mutex<CancellationToken>>;

pub(crate) enum Command {
    RunTasks {
        selection: Vec<Task>,
        reply: oneshot::Sender<Result<RunOutcome>>,
    },
    Cancel,
    ExecutionCompleted,
    ExecutionFailed(String),
    StoreChanged,
    GraceExpired {
        task_seq: u64,
    },
    AddListener(ListenerId, Arc<dyn RunnerListener>),
    RemoveListener(ListenerId),
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// State that only exists while a run is in progress.
struct ActiveRun {
    id: RunId,
    order: Vec<Task>,
    cursor: usize,
    current: Option<Task>,
    selected: HashSet<String>,
    completed: HashSet<String>,
    completed_count: usize,
    skipped_count: usize,
    subscription: Option<SubscriptionId>,
    grace: Option<GraceTimer>,
    /// Bumped on every dispatch; lets stale grace expiries be recognised.
    task_seq: u64,
    /// Store showed Done while the agent was still running.
    done_while_executing: bool,
    /// Agent reported completion; grace timer pending.
    execution_finished: bool,
    sampler: LogSampler,
}

impl ActiveRun {
    fn total(&self) -> usize {
        self.order.len()
    }

    fn stop_grace(&mut self) {
        if let Some(timer) = self.grace.take() {
            timer.cancel();
        }
    }

    fn clear_task_flags(&mut self) {
        self.stop_grace();
        self.done_while_executing = false;
        self.execution_finished = false;
    }
}

pub(crate) struct RunnerActor {
    store: Arc<dyn TaskStore>,
    dispatcher: Arc<dyn AgentDispatcher>,
    config: RunnerConfig,
    listeners: ListenerRegistry,
    snapshot_tx: watch::Sender<RunSnapshot>,
    mailbox: mpsc::WeakUnboundedSender<Command>,
    cancel: CancelFlag,
    state: RunnerState,
    run: Option<ActiveRun>,
    last_run: Option<RunSummary>,
}

impl RunnerActor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        dispatcher: Arc<dyn AgentDispatcher>,
        config: RunnerConfig,
        snapshot_tx: watch::Sender<RunSnapshot>,
        mailbox: mpsc::WeakUnboundedSender<Command>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            store,
            dispatcher,
            config,
            listeners: ListenerRegistry::default(),
            snapshot_tx,
            mailbox,
            cancel,
            state: RunnerState::Idle,
            run: None,
            last_run: None,
        }
    }

    pub fn spawn(self, rx: mpsc::UnboundedReceiver<Command>) {
        rlog_debug!("RunnerActor::spawn");
        tokio::spawn(self.run_loop(rx));
    }

    async fn run_loop(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            if let Command::Shutdown { reply } = cmd {
                rx.close();
                self.stop();
                let _ = reply.send(());
                break;
            }
            self.handle(cmd);
        }
        self.stop();
        rlog_debug!("RunnerActor stopped");
    }

    fn stop(&mut self) {
        if self.run.is_some() {
            rlog!("Runner stopping with a run in progress, cancelling");
            self.finish(RunnerState::Cancelled);
        }
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::RunTasks { selection, reply } => {
                let outcome = self.start_run(selection);
                let started = matches!(outcome, Ok(RunOutcome::Started { .. }));
                let _ = reply.send(outcome);
                if started {
                    self.submit_next();
                }
            }
            Command::Cancel => self.cancel(),
            Command::ExecutionCompleted => self.on_execution_completed(),
            Command::ExecutionFailed(reason) => self.on_execution_failed(&reason),
            Command::StoreChanged => self.on_store_changed(),
            Command::GraceExpired { task_seq } => self.on_grace_expired(task_seq),
            Command::AddListener(id, listener) => {
                self.listeners.add(id, listener);
                rlog_debug!("Listener {:?} added ({} total)", id, self.listeners.len());
            }
            Command::RemoveListener(id) => {
                if self.listeners.remove(id) {
                    rlog_debug!("Listener {:?} removed", id);
                }
            }
            Command::Shutdown { .. } => {}
        }
    }

    // ===== Run lifecycle =====

    fn start_run(&mut self, selection: Vec<Task>) -> Result<RunOutcome> {
        if self.state.is_active() {
            rlog!("run_tasks ignored: a run is already in progress");
            return Ok(RunOutcome::AlreadyRunning);
        }
        if selection.is_empty() {
            rlog_debug!("run_tasks ignored: empty selection");
            return Ok(RunOutcome::EmptySelection);
        }

        let universe = self.store.get_all_tasks();
        let order = match sorter::plan(&selection, &universe) {
            Ok(order) => order,
            Err(err) => {
                let total = selection
                    .iter()
                    .filter_map(Task::key)
                    .collect::<HashSet<_>>()
                    .len();
                self.state = RunnerState::Error;
                self.publish();
                self.listeners
                    .each(|l| l.on_run_finished(0, 0, total, RunnerState::Error));
                self.last_run = Some(RunSummary {
                    run_id: None,
                    completed: 0,
                    skipped: 0,
                    total,
                    final_state: RunnerState::Error,
                });
                self.state = RunnerState::Idle;
                self.publish();
                return Err(err.into());
            }
        };

        if order.is_empty() {
            rlog_debug!("run_tasks ignored: no schedulable tasks in selection");
            return Ok(RunOutcome::EmptySelection);
        }

        *self.cancel.lock() = CancellationToken::new();
        let id = RunId::new();
        rlog!("Run {} order: {}", id.short(), order.describe());

        let order = order.into_tasks();
        let selected: HashSet<String> = order.iter().filter_map(Task::key).collect();
        let total = order.len();
        let subscription = self.subscribe_store();

        self.run = Some(ActiveRun {
            id,
            order,
            cursor: 0,
            current: None,
            selected,
            completed: HashSet::new(),
            completed_count: 0,
            skipped_count: 0,
            subscription: Some(subscription),
            grace: None,
            task_seq: 0,
            done_while_executing: false,
            execution_finished: false,
            sampler: LogSampler::new(self.config.log_sample_first, self.config.log_sample_every),
        });
        self.state = RunnerState::RunningTask;
        self.publish();
        self.listeners.each(|l| l.on_run_started(total));

        rlog!("Run {} started with {} tasks", id.short(), total);
        Ok(RunOutcome::Started { run_id: id, total })
    }

    /// Route store changes into the mailbox for the duration of the run.
    fn subscribe_store(&self) -> SubscriptionId {
        let mailbox = self.mailbox.clone();
        self.store.subscribe(Arc::new(move || {
            if let Some(tx) = mailbox.upgrade() {
                let _ = tx.send(Command::StoreChanged);
            }
        }))
    }

    /// Advance through the order until a task is dispatched or the run ends.
    fn submit_next(&mut self) {
        loop {
            let cancelled = self.cancel_requested();
            let Some(run) = self.run.as_mut() else {
                return;
            };
            if run.cursor >= run.order.len() {
                self.finish(RunnerState::AllCompleted);
                return;
            }
            if cancelled {
                rlog!("Cancel requested, nothing more is dispatched");
                self.finish(RunnerState::Cancelled);
                return;
            }

            let planned = run.order[run.cursor].clone();
            run.current = Some(planned.clone());
            run.clear_task_flags();
            self.state = RunnerState::RunningTask;

            let Some(fresh) = self.store.get_task(&planned.id) else {
                self.skip_current(planned, NOT_FOUND_REASON.to_string());
                continue;
            };

            if self.config.is_done(&fresh.status) {
                rlog_debug!("{} already Done, no dispatch needed", fresh.id);
                self.complete_current(fresh);
                continue;
            }

            let Some(run) = self.run.as_ref() else {
                return;
            };
            let universe = self.store.get_all_tasks();
            let unmet = deps::unsatisfied(
                &fresh,
                &run.completed,
                &run.selected,
                &universe,
                &self.config.done_status,
            );
            if !unmet.is_empty() {
                self.skip_current(fresh, format!("unsatisfied dependencies: {}", unmet.join(", ")));
                continue;
            }

            if self.dispatch(fresh) {
                return;
            }
        }
    }

    /// Hand `task` to the dispatcher. Returns false if it was skipped instead,
    /// true if it went out or the run ended.
    fn dispatch(&mut self, task: Task) -> bool {
        let Some(run) = self.run.as_mut() else {
            return false;
        };
        run.task_seq += 1;
        run.current = Some(task.clone());
        let (index, total) = (run.cursor, run.total());

        self.dispatcher.reset_context();
        self.state = RunnerState::WaitingForCompletion;
        self.publish();
        self.listeners.each(|l| l.on_task_started(&task, index, total));

        if self.cancel_requested() {
            rlog!("Cancel requested before {} reached the agent", task.id);
            self.finish(RunnerState::Cancelled);
            return true;
        }

        let instruction = render_instruction(&task, &self.config);
        rlog!("Dispatching {} ({}/{})", task.id, index + 1, total);
        rlog_trace!("Instruction for {}:\n{}", task.id, instruction);

        match self.dispatcher.dispatch(&task, instruction) {
            Ok(()) => true,
            Err(err) => {
                rlog_warn!("Dispatch of {} failed: {}", task.id, err);
                self.skip_current(task, err.to_string());
                false
            }
        }
    }

    fn complete_current(&mut self, task: Task) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        run.clear_task_flags();
        if let Some(key) = task.key() {
            run.completed.insert(key);
        }
        run.completed_count += 1;
        let (index, total) = (run.cursor, run.total());
        run.cursor += 1;
        run.current = None;

        rlog!("Task {} completed ({}/{})", task.id, index + 1, total);
        self.state = RunnerState::RunningTask;
        self.publish();
        self.listeners.each(|l| l.on_task_completed(&task, index, total));
    }

    fn skip_current(&mut self, task: Task, reason: String) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        run.clear_task_flags();
        run.skipped_count += 1;
        let (index, total) = (run.cursor, run.total());
        run.cursor += 1;
        run.current = None;

        rlog!("Task {} skipped: {}", task.display_id(), reason);
        self.state = RunnerState::RunningTask;
        self.publish();
        self.listeners
            .each(|l| l.on_task_skipped(&task, index, total, &reason));
    }

    fn finish(&mut self, final_state: RunnerState) {
        let Some(mut run) = self.run.take() else {
            return;
        };
        if let Some(sub) = run.subscription.take() {
            self.store.unsubscribe(sub);
        }
        run.stop_grace();

        let summary = RunSummary {
            run_id: Some(run.id),
            completed: run.completed_count,
            skipped: run.skipped_count,
            total: run.total(),
            final_state,
        };
        rlog!(
            "Run {} finished: {} ({} completed, {} skipped, {} total, {} store events)",
            run.id.short(),
            final_state,
            summary.completed,
            summary.skipped,
            summary.total,
            run.sampler.seen()
        );

        self.state = final_state;
        self.publish();
        self.listeners.each(|l| {
            l.on_run_finished(summary.completed, summary.skipped, summary.total, final_state)
        });

        self.last_run = Some(summary);
        self.state = RunnerState::Idle;
        self.publish();
    }

    fn cancel_requested(&self) -> bool {
        self.cancel.lock().is_cancelled()
    }

    fn cancel(&mut self) {
        if self.run.is_none() {
            rlog_debug!("cancel ignored: no run in progress");
            return;
        }
        if let Some(task) = self.run.as_ref().and_then(|r| r.current.as_ref()) {
            rlog!("Cancelling run, abandoning {}", task.id);
        }
        self.finish(RunnerState::Cancelled);
    }

    // ===== Completion signals =====

    /// Current task if the runner is waiting on it.
    fn waiting_task(&self) -> Option<&Task> {
        if self.state != RunnerState::WaitingForCompletion {
            return None;
        }
        self.run.as_ref().and_then(|r| r.current.as_ref())
    }

    /// Fresh copy of the waiting task, if the store now shows it Done.
    fn waiting_task_done(&self) -> Option<Task> {
        let id = &self.waiting_task()?.id;
        self.store
            .get_task(id)
            .filter(|t| self.config.is_done(&t.status))
    }

    fn on_store_changed(&mut self) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        if run.sampler.admit() {
            rlog_debug!("Store change event #{} (state={})", run.sampler.seen(), self.state);
        }

        let Some(fresh) = self.waiting_task_done() else {
            return;
        };
        let Some(run) = self.run.as_mut() else {
            return;
        };

        if run.execution_finished {
            rlog!("Task {} marked Done during grace period, advancing", fresh.id);
            self.complete_current(fresh);
            self.submit_next();
        } else if !run.done_while_executing {
            rlog!("Task {} marked Done while executing, deferring advance", fresh.id);
            run.done_while_executing = true;
            run.stop_grace();
        }
    }

    fn on_execution_completed(&mut self) {
        let Some(task_id) = self.waiting_task().map(|t| t.id.clone()) else {
            rlog_debug!("execution completed ignored (state={})", self.state);
            return;
        };
        let Some(run) = self.run.as_ref() else {
            return;
        };
        if run.execution_finished {
            rlog_debug!("duplicate execution completed for {} ignored", task_id);
            return;
        }

        if run.done_while_executing {
            let current = run.current.clone();
            rlog!("Execution completed for {} (already Done), advancing", task_id);
            if let Some(task) = self.waiting_task_done().or(current) {
                self.complete_current(task);
            }
            self.submit_next();
            return;
        }

        if let Some(fresh) = self.waiting_task_done() {
            rlog!("Execution completed for {} (Done), advancing", task_id);
            self.complete_current(fresh);
            self.submit_next();
            return;
        }

        let delay = self.config.grace_period();
        let mailbox = self.mailbox.clone();
        let Some(run) = self.run.as_mut() else {
            return;
        };
        let task_seq = run.task_seq;
        run.execution_finished = true;
        run.grace = Some(GraceTimer::start(delay, move || {
            if let Some(tx) = mailbox.upgrade() {
                let _ = tx.send(Command::GraceExpired { task_seq });
            }
        }));
        rlog!(
            "Execution completed for {}, waiting {}ms for Done",
            task_id,
            delay.as_millis()
        );
    }

    fn on_grace_expired(&mut self, task_seq: u64) {
        let Some(current) = self.waiting_task().cloned() else {
            return;
        };
        let Some(run) = self.run.as_mut() else {
            return;
        };
        if run.task_seq != task_seq || !run.execution_finished {
            rlog_debug!("stale grace expiry for seq {} ignored", task_seq);
            return;
        }
        run.grace = None;

        match self.waiting_task_done() {
            Some(fresh) => {
                rlog!("Task {} Done at grace expiry", fresh.id);
                self.complete_current(fresh);
            }
            None => {
                rlog_warn!("Grace period expired for {}", current.id);
                self.skip_current(current, NOT_MARKED_DONE_REASON.to_string());
            }
        }
        self.submit_next();
    }

    fn on_execution_failed(&mut self, reason: &str) {
        let Some(current) = self.waiting_task().cloned() else {
            rlog_debug!("execution failure ignored (state={})", self.state);
            return;
        };
        let first_line = reason
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("unknown error");
        rlog_warn!("Execution of {} failed: {}", current.id, first_line);
        self.skip_current(current, format!("execution failed: {}", first_line));
        self.submit_next();
    }

    // ===== Snapshot =====

    fn publish(&self) {
        let snapshot = match &self.run {
            Some(run) => RunSnapshot {
                state: self.state,
                run_id: Some(run.id),
                current_task: run.current.clone(),
                current_index: run.current.as_ref().map(|_| run.cursor),
                total: run.total(),
                completed: run.completed_count,
                skipped: run.skipped_count,
                last_run: self.last_run.clone(),
            },
            None => RunSnapshot {
                state: self.state,
                last_run: self.last_run.clone(),
                ..Default::default()
            },
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}
