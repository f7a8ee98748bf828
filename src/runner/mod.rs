//! Sequential task runner.
//!
//! [`TaskRunner`] is a cheap, cloneable handle to a background actor that
//! walks a dependency-ordered selection one task at a time: dispatch to the
//! agent, wait for the agent to finish and for the task to be marked Done,
//! then move on. The state machine itself lives in the private `actor` module.

mod actor;
pub mod listener;
pub mod state;
pub mod timer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::config::RunnerConfig;
use crate::core::Task;
use crate::dispatch::AgentDispatcher;
use crate::store::TaskStore;
use crate::{rlog_debug, Error, Result};

use actor::{CancelFlag, Command, RunnerActor};

pub use listener::{ListenerId, RunnerListener};
pub use state::{RunId, RunOutcome, RunSnapshot, RunSummary, RunnerState};
pub use timer::GraceTimer;

/// Handle to a runner actor.
///
/// All clones talk to the same actor. Must be created inside a tokio
/// runtime. The actor stops once [`TaskRunner::shutdown`] is called or every
/// handle has been dropped.
#[derive(Clone)]
pub struct TaskRunner {
    tx: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<RunSnapshot>,
    store: Arc<dyn TaskStore>,
    cancel: CancelFlag,
    next_listener: Arc<AtomicU64>,
}

impl TaskRunner {
    pub fn new(
        store: Arc<dyn TaskStore>,
        dispatcher: Arc<dyn AgentDispatcher>,
        config: RunnerConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(RunSnapshot::default());
        let cancel: CancelFlag = Arc::new(Mutex::new(CancellationToken::new()));

        RunnerActor::new(
            Arc::clone(&store),
            dispatcher,
            config,
            snapshot_tx,
            tx.downgrade(),
            Arc::clone(&cancel),
        )
        .spawn(rx);

        Self {
            tx,
            snapshot,
            store,
            cancel,
            next_listener: Arc::new(AtomicU64::new(0)),
        }
    }

    // ===== Commands =====

    /// Sort `selection` and start running it.
    ///
    /// Returns once the run has started (or been rejected); progress is
    /// reported through listeners. A dependency cycle is returned as
    /// [`Error::Cycle`] and no task runs.
    pub async fn run_tasks(&self, selection: Vec<Task>) -> Result<RunOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RunTasks { selection, reply })?;
        rx.await.map_err(|_| Error::RunnerStopped)?
    }

    /// Run every stored task whose status matches `status` (case-insensitive).
    pub async fn run_status(&self, status: &str) -> Result<RunOutcome> {
        let selection: Vec<Task> = self
            .store
            .get_all_tasks()
            .into_iter()
            .filter(|t| t.status.trim().eq_ignore_ascii_case(status.trim()))
            .collect();
        rlog_debug!("run_status({:?}) selected {} tasks", status, selection.len());
        self.run_tasks(selection).await
    }

    /// Stop the current run. The task being waited on is abandoned and no
    /// further task is dispatched, even one the actor is about to advance to.
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
        let _ = self.send(Command::Cancel);
    }

    /// The agent finished its turn for the current task.
    pub fn notify_execution_completed(&self) {
        let _ = self.send(Command::ExecutionCompleted);
    }

    /// The agent could not execute the current task; it is skipped.
    pub fn notify_execution_failed(&self, reason: &str) {
        let _ = self.send(Command::ExecutionFailed(reason.to_string()));
    }

    pub fn add_listener(&self, listener: Arc<dyn RunnerListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        let _ = self.send(Command::AddListener(id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        let _ = self.send(Command::RemoveListener(id));
    }

    /// Cancel any active run and stop the actor. Idempotent.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).map_err(|_| Error::RunnerStopped)
    }

    // ===== Queries =====

    pub fn snapshot(&self) -> RunSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that sees every published snapshot, for awaiting changes.
    pub fn watch(&self) -> watch::Receiver<RunSnapshot> {
        self.snapshot.clone()
    }

    pub fn state(&self) -> RunnerState {
        self.snapshot.borrow().state
    }

    pub fn is_running(&self) -> bool {
        self.snapshot.borrow().is_running()
    }

    pub fn current_task(&self) -> Option<Task> {
        self.snapshot.borrow().current_task.clone()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.snapshot.borrow().current_index
    }

    pub fn total_tasks(&self) -> usize {
        self.snapshot.borrow().total
    }

    pub fn completed_count(&self) -> usize {
        self.snapshot.borrow().completed
    }

    pub fn skipped_count(&self) -> usize {
        self.snapshot.borrow().skipped
    }

    pub fn last_run(&self) -> Option<RunSummary> {
        self.snapshot.borrow().last_run.clone()
    }
}
