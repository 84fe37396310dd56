//! Integration tests for the time cursor, stepping and simulation control.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

mod common;

use std::time::Duration;

use common::{FakeServer, connect, eventually, fs, test_config};
use rtldebug_core::{PauseReason, RunOptions, Session, SessionError};
use rtldebug_types::{Command, DiagnosticKind, SimulationState, TimeInterval};
use tokio::time::timeout;

#[tokio::test]
async fn cursor_rejects_times_past_latest() {
    let (_server, endpoint) = FakeServer::builder().at(0, &[]).at(100, &[]).build();
    let session = connect(endpoint).await;

    let err = session.set_time_cursor(fs(101)).unwrap_err();
    assert!(matches!(
        err,
        SessionError::CursorOutOfRange { requested, latest }
            if requested == fs(101) && latest == fs(100)
    ));
    assert_eq!(session.time_cursor(), fs(0));
}

#[tokio::test]
async fn every_accepted_assignment_notifies() {
    let (_server, endpoint) = FakeServer::builder().at(0, &[]).at(100, &[]).build();
    let session = connect(endpoint).await;
    let mut changes = session.signals().time_cursor_changed.listen();

    session.set_time_cursor(fs(40)).unwrap();
    session.set_time_cursor(fs(40)).unwrap();
    let _ = session.set_time_cursor(fs(500));

    assert_eq!(changes.try_next(), Some(fs(40)));
    assert_eq!(changes.try_next(), Some(fs(40)));
    assert_eq!(changes.try_next(), None);
}

#[tokio::test]
async fn step_forward_widens_the_window_until_a_sample_appears() {
    let (server, endpoint) = FakeServer::builder()
        .at(0, &[])
        .at(1000, &[])
        .at(2000, &[])
        .build();
    let session = connect(endpoint).await;
    server.clear_log();

    assert_eq!(session.step_forward().await.unwrap(), fs(1000));
    // Windows of 1, 10, 100 and 1000 fs.
    assert_eq!(server.count("query_interval"), 4);

    server.clear_log();
    assert_eq!(session.step_forward().await.unwrap(), fs(2000));
    // The widened step is remembered.
    assert_eq!(server.count("query_interval"), 1);
}

#[tokio::test]
async fn step_forward_gives_up_after_the_growth_bound() {
    let (server, endpoint) = FakeServer::builder()
        .at(0, &[])
        .at(10_u128.pow(31), &[])
        .build();
    let session = connect(endpoint).await;
    server.clear_log();

    let err = session.step_forward().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::StepSearchExhausted { from, probes: 31 } if from == fs(0)
    ));
    assert_eq!(server.count("query_interval"), 31);
    assert_eq!(session.time_cursor(), fs(0));
}

#[tokio::test]
async fn growth_bound_is_configurable() {
    let (server, endpoint) = FakeServer::builder()
        .at(0, &[])
        .at(10_000, &[])
        .build();
    let mut config = test_config();
    config.navigation.max_step_growths = 2;
    let session = Session::connect(endpoint, config).await.unwrap();
    server.clear_log();

    let err = session.step_forward().await.unwrap_err();
    assert!(matches!(err, SessionError::StepSearchExhausted { probes: 3, .. }));
    assert_eq!(server.count("query_interval"), 3);
}

#[tokio::test]
async fn step_backward_moves_to_the_previous_sample() {
    let (_server, endpoint) = FakeServer::builder()
        .at(0, &[])
        .at(50, &[])
        .at(100, &[])
        .build();
    let session = connect(endpoint).await;
    session.set_time_cursor(fs(100)).unwrap();

    assert_eq!(session.step_backward().await.unwrap(), fs(50));
    assert_eq!(session.step_backward().await.unwrap(), fs(0));
    assert_eq!(session.step_backward().await.unwrap(), fs(0));
}

#[tokio::test]
async fn step_forward_at_the_end_runs_one_sample() {
    let (server, endpoint) = FakeServer::builder()
        .at(0, &[])
        .at(100, &[])
        .at(150, &[])
        .at(300, &[])
        .latest(100)
        .build();
    let session = connect(endpoint).await;
    assert_eq!(session.simulation_status().next_sample_time, Some(fs(150)));
    session.set_time_cursor(fs(100)).unwrap();

    assert_eq!(session.step_forward().await.unwrap(), fs(150));
    assert_eq!(session.time_cursor(), fs(150));
    assert_eq!(server.latest(), fs(150));
    assert!(server.commands().iter().any(|command| matches!(
        command,
        Command::RunSimulation { until_time: Some(time), sample_item_values: true, .. }
            if *time == fs(150)
    )));
}

#[tokio::test]
async fn step_forward_waits_for_a_running_simulation() {
    let (_server, endpoint) = FakeServer::builder()
        .at(0, &[])
        .at(100, &[])
        .at(150, &[])
        .at(300, &[])
        .latest(100)
        .run_polls(3)
        .build();
    let session = connect(endpoint).await;
    session.set_time_cursor(fs(100)).unwrap();

    let time = timeout(Duration::from_secs(2), session.step_forward())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(time, fs(150));
    assert_eq!(session.simulation_status().state, SimulationState::Paused);
}

#[tokio::test]
async fn step_forward_past_a_finished_simulation_does_nothing() {
    let (server, endpoint) = FakeServer::builder().at(0, &[]).at(100, &[]).build();
    let session = connect(endpoint).await;
    let mut finished = session.signals().simulation_finished.listen();

    session.run_simulation(RunOptions::default()).await.unwrap();
    timeout(Duration::from_secs(1), finished.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.simulation_status().state, SimulationState::Finished);

    session.set_time_cursor(fs(100)).unwrap();
    server.clear_log();
    assert_eq!(session.step_forward().await.unwrap(), fs(100));
    assert!(server.commands().is_empty());
}

#[tokio::test]
async fn continue_forward_jumps_to_a_recorded_diagnostic() {
    let (server, endpoint) = FakeServer::builder()
        .at(0, &[])
        .at(50, &[])
        .at(60, &[])
        .diagnostic(DiagnosticKind::Print, "hello")
        .at(80, &[])
        .diagnostic(DiagnosticKind::Assert, "overflow")
        .at(200, &[])
        .build();
    let session = connect(endpoint).await;
    session.set_time_cursor(fs(50)).unwrap();

    assert_eq!(session.continue_forward().await.unwrap(), fs(80));
    assert_eq!(session.time_cursor(), fs(80));
    assert_eq!(server.count("run_simulation"), 0);
}

#[tokio::test]
async fn continue_forward_runs_until_a_breakpoint() {
    let (server, endpoint) = FakeServer::builder()
        .at(0, &[])
        .at(100, &[])
        .at(250, &[])
        .diagnostic(DiagnosticKind::Print, "not a breakpoint")
        .at(300, &[])
        .diagnostic(DiagnosticKind::Break, "stop here")
        .at(400, &[])
        .latest(100)
        .build();
    let session = connect(endpoint).await;
    let mut paused = session.signals().simulation_paused.listen();

    session.continue_forward().await.unwrap();
    let reason = timeout(Duration::from_secs(1), paused.next())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(reason, PauseReason::DiagnosticsReached);
    assert_eq!(session.time_cursor(), fs(300));
    assert!(server.commands().iter().any(|command| matches!(
        command,
        Command::RunSimulation { until_diagnostics, .. }
            if until_diagnostics.len() == 3 && !until_diagnostics.contains(&DiagnosticKind::Print)
    )));
}

#[tokio::test]
async fn continue_forward_on_a_finished_simulation_goes_to_the_end() {
    let (_server, endpoint) = FakeServer::builder().at(0, &[]).at(100, &[]).latest(0).build();
    let session = connect(endpoint).await;
    let mut finished = session.signals().simulation_finished.listen();
    session.run_simulation(RunOptions::default()).await.unwrap();
    timeout(Duration::from_secs(1), finished.next())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(session.continue_forward().await.unwrap(), fs(100));
}

#[tokio::test]
async fn diagnostic_search_only_looks_after_the_start() {
    let (_server, endpoint) = FakeServer::builder()
        .at(0, &[])
        .diagnostic(DiagnosticKind::Break, "at the start")
        .at(10, &[])
        .diagnostic(DiagnosticKind::Print, "just a print")
        .at(20, &[])
        .diagnostic(DiagnosticKind::Assume, "assumption")
        .build();
    let session = connect(endpoint).await;

    let interval = TimeInterval::new(fs(0), fs(20)).unwrap();
    assert_eq!(session.search_for_diagnostic(interval).await.unwrap(), Some(fs(20)));

    let interval = TimeInterval::new(fs(0), fs(15)).unwrap();
    assert_eq!(session.search_for_diagnostic(interval).await.unwrap(), None);
}

#[tokio::test]
async fn run_until_time_reports_the_pause() {
    let (_server, endpoint) = FakeServer::builder()
        .at(0, &[])
        .at(100, &[])
        .at(200, &[])
        .latest(0)
        .build();
    let session = connect(endpoint).await;
    let mut paused = session.signals().simulation_paused.listen();
    let mut ran = session.signals().simulation_ran.listen();

    session
        .run_simulation(RunOptions {
            until_time: Some(fs(150)),
            ..RunOptions::default()
        })
        .await
        .unwrap();

    assert_eq!(ran.try_next(), Some(()));
    let reason = timeout(Duration::from_secs(1), paused.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reason, PauseReason::TimeReached);
    assert_eq!(session.simulation_status().latest_time, fs(150));
    assert_eq!(session.simulation_status().next_sample_time, Some(fs(200)));
}

#[tokio::test]
async fn status_is_polled_while_running() {
    let (_server, endpoint) = FakeServer::builder()
        .at(0, &[])
        .at(100, &[])
        .latest(0)
        .run_polls(2)
        .build();
    let session = connect(endpoint).await;

    session.run_simulation(RunOptions::default()).await.unwrap();
    assert!(session.is_simulation_running());

    eventually(|| session.simulation_status().state == SimulationState::Finished).await;
    assert_eq!(session.simulation_status().latest_time, fs(100));
}

#[tokio::test]
async fn pause_returns_the_server_time() {
    let (_server, endpoint) = FakeServer::builder()
        .at(0, &[])
        .at(100, &[])
        .latest(40)
        .run_polls(1000)
        .build();
    let session = connect(endpoint).await;

    session.run_simulation(RunOptions::default()).await.unwrap();
    assert!(session.is_simulation_running());

    assert_eq!(session.pause_simulation().await.unwrap(), fs(40));
    assert_eq!(session.simulation_status().state, SimulationState::Paused);
}

#[tokio::test]
async fn diagnostics_pause_without_a_breakpoint_leaves_the_cursor() {
    let (server, endpoint) = FakeServer::builder()
        .at(0, &[])
        .at(50, &[])
        .diagnostic(DiagnosticKind::Print, "only a print")
        .at(100, &[])
        .latest(0)
        .build();
    let session = connect(endpoint).await;
    let mut paused = session.signals().simulation_paused.listen();
    let mut cursor = session.signals().time_cursor_changed.listen();

    session
        .run_simulation(RunOptions {
            until_time: None,
            until_diagnostics: vec![DiagnosticKind::Print],
        })
        .await
        .unwrap();
    eventually(|| {
        server.commands().iter().any(|command| {
            matches!(
                command,
                Command::QueryInterval { interval, diagnostics: true, .. }
                    if interval.begin() == fs(0) && interval.end() == fs(50)
            )
        })
    })
    .await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(session.simulation_status().latest_time, fs(50));
    assert_eq!(session.time_cursor(), fs(0));
    assert_eq!(cursor.try_next(), None);
    assert_eq!(paused.try_next(), None);
}
