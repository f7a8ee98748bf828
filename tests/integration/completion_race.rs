//! Completion signal race tests.
//!
//! A task finishes only once the agent has reported completion AND the
//! store shows it Done. These tests deliver the two signals in both orders,
//! with and without the grace period running out.

use std::time::Duration;

use tokio::time::Instant;

use backlog_runner::{RunnerConfig, RunnerState};

use crate::fixtures::{chain, task, RunEvent, RunnerHarness};

async fn start_first(h: &mut RunnerHarness, total: usize, id: &str) {
    h.runner.run_tasks(h.all_tasks()).await.unwrap();
    assert_eq!(h.next_event().await, RunEvent::RunStarted { total });
    assert_eq!(h.next_event().await, RunEvent::started(id, 0, total));
}

/// Test: Done before completion
/// Given T1 is in flight
/// When the store shows T1 Done before the agent reports completion
/// Then the runner waits, and completes T1 only once the agent reports
#[tokio::test(start_paused = true)]
async fn test_done_before_completion_defers_advance() {
    let mut h = RunnerHarness::new(chain(2));
    start_first(&mut h, 2, "T1").await;

    h.store.set_status("T1", "Done").unwrap();
    h.assert_quiet(Duration::from_secs(30)).await;
    assert_eq!(h.runner.state(), RunnerState::WaitingForCompletion);
    assert_eq!(h.runner.current_task().unwrap().id, "T1");

    h.runner.notify_execution_completed();
    assert_eq!(h.next_event().await, RunEvent::completed("T1", 0, 2));
    assert_eq!(h.next_event().await, RunEvent::started("T2", 1, 2));
}

/// Test: Grace period expiry
/// Given T1 is in flight
/// When the agent reports completion but T1 never becomes Done
/// Then T1 is skipped once the grace period has elapsed
#[tokio::test(start_paused = true)]
async fn test_completion_without_done_skips_after_grace() {
    let mut h = RunnerHarness::new(vec![task("T1")]);
    start_first(&mut h, 1, "T1").await;

    let start = Instant::now();
    h.runner.notify_execution_completed();

    match h.next_event().await {
        RunEvent::TaskSkipped { id, reason, .. } => {
            assert_eq!(id, "T1");
            assert!(reason.contains("not marked Done"), "reason: {reason}");
        }
        other => panic!("expected skip, got {other:?}"),
    }
    assert!(start.elapsed() >= Duration::from_secs(3));
    assert_eq!(
        h.next_event().await,
        RunEvent::finished(0, 1, 1, RunnerState::AllCompleted)
    );
}

/// Test: Done during grace period
/// Given the agent reported completion for T1
/// When T1 becomes Done before the grace period ends
/// Then T1 completes right away and the stale timer never skips T2
#[tokio::test(start_paused = true)]
async fn test_done_during_grace_completes_immediately() {
    let mut h = RunnerHarness::new(chain(2));
    start_first(&mut h, 2, "T1").await;

    let start = Instant::now();
    h.runner.notify_execution_completed();
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.store.set_status("T1", "Done").unwrap();

    assert_eq!(h.next_event().await, RunEvent::completed("T1", 0, 2));
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(h.next_event().await, RunEvent::started("T2", 1, 2));

    h.assert_quiet(Duration::from_secs(10)).await;
    assert_eq!(h.runner.state(), RunnerState::WaitingForCompletion);
    assert_eq!(h.runner.current_task().unwrap().id, "T2");
}

/// Test: Back-to-back signals
/// Given T1 is Done by the time the agent reports
/// When the store event and the completion report arrive together
/// Then T1 completes without a grace wait
#[tokio::test(start_paused = true)]
async fn test_done_and_completion_back_to_back() {
    let mut h = RunnerHarness::new(vec![task("T1")]);
    start_first(&mut h, 1, "T1").await;

    // Both messages are queued together; the actor sees the store event first
    h.store.set_status("T1", "Done").unwrap();
    h.runner.notify_execution_completed();

    let start = Instant::now();
    assert_eq!(h.next_event().await, RunEvent::completed("T1", 0, 1));
    assert!(start.elapsed() < Duration::from_secs(3));
}

/// Test: Duplicate completion
/// Given the agent reports completion twice for T1
/// When the grace period expires
/// Then T1 is skipped exactly once
#[tokio::test(start_paused = true)]
async fn test_duplicate_completion_skips_once() {
    let mut h = RunnerHarness::new(vec![task("T1")]);
    start_first(&mut h, 1, "T1").await;

    h.runner.notify_execution_completed();
    tokio::time::sleep(Duration::from_secs(2)).await;
    h.runner.notify_execution_completed();

    let events = h.events_until_finished().await;
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], RunEvent::TaskSkipped { .. }));
    assert_eq!(
        events[1],
        RunEvent::finished(0, 1, 1, RunnerState::AllCompleted)
    );
}

/// Test: Cancel during grace period
/// Given the grace timer is running for T1
/// When the run is cancelled
/// Then it finishes Cancelled and the timer never fires a skip
#[tokio::test(start_paused = true)]
async fn test_cancel_stops_grace_timer() {
    let mut h = RunnerHarness::new(vec![task("T1")]);
    start_first(&mut h, 1, "T1").await;

    h.runner.notify_execution_completed();
    h.runner.cancel();

    assert_eq!(
        h.next_event().await,
        RunEvent::finished(0, 0, 1, RunnerState::Cancelled)
    );
    h.assert_quiet(Duration::from_secs(10)).await;
}

/// Test: Signals outside a run
#[tokio::test(start_paused = true)]
async fn test_signals_while_idle_are_ignored() {
    let mut h = RunnerHarness::new(vec![task("T1")]);
    h.runner.notify_execution_completed();
    h.runner.notify_execution_failed("boom");
    h.runner.cancel();
    h.store.set_status("T1", "Done").unwrap();

    h.assert_quiet(Duration::from_secs(10)).await;
    assert_eq!(h.runner.state(), RunnerState::Idle);
    assert!(h.runner.last_run().is_none());
}

/// Test: Configured grace period and Done status
/// Given a 500ms grace period and "Complete" as the Done status
/// When one task is marked Complete and the other is left alone
/// Then the first completes and the second is skipped after 500ms
#[tokio::test(start_paused = true)]
async fn test_configured_grace_and_done_status() {
    let config = RunnerConfig {
        done_status: "Complete".to_string(),
        ..RunnerConfig::default()
    }
    .with_grace_period(Duration::from_millis(500));
    let mut h = RunnerHarness::with_config(vec![task("T1"), task("T2")], config);
    start_first(&mut h, 2, "T1").await;

    h.store.set_status("T1", "complete").unwrap();
    h.runner.notify_execution_completed();
    assert_eq!(h.next_event().await, RunEvent::completed("T1", 0, 2));
    assert_eq!(h.next_event().await, RunEvent::started("T2", 1, 2));

    // "Done" is not the configured status, so it does not count
    h.store.set_status("T2", "Done").unwrap();
    let start = Instant::now();
    h.runner.notify_execution_completed();

    match h.next_event().await {
        RunEvent::TaskSkipped { id, .. } => assert_eq!(id, "T2"),
        other => panic!("expected skip, got {other:?}"),
    }
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(500));
    assert!(waited < Duration::from_secs(3));
}
