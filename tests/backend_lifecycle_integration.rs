//! Integration tests for backend lifecycle
//!
//! These tests validate the threaded backend workflow:
//! - Spawning and shutting down the dispatch thread
//! - Switching sessions at runtime
//! - Backend message handling

mod common;

use common::builders::{race_session, SessionBuilder};
use common::wait_for;
use livetiming_rs::backend::{BackendMessage, TimingBackend};
use livetiming_rs::config::AppConfig;
use livetiming_rs::session::MemorySource;
use livetiming_rs::types::Topic;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.playback.tick_interval_ms = 2;
    config
}

#[test]
fn test_backend_creation_and_shutdown() {
    let (points, snapshot) = race_session(10);
    let (backend, control) = TimingBackend::new(&fast_config(), Box::new(MemorySource::new(points, snapshot)));

    // Spawn backend thread
    let handle = backend.spawn().unwrap();

    // Give it a moment to initialize
    thread::sleep(Duration::from_millis(20));

    // Shutdown
    assert!(control.shutdown());

    // Backend should exit cleanly
    let result = handle.join();
    assert!(result.is_ok(), "Backend thread should exit cleanly");
    assert!(control.drain().iter().any(|m| matches!(m, BackendMessage::Shutdown)));
}

#[test]
fn test_stop_handle_stops_worker() {
    let (backend, _control) = TimingBackend::new(&fast_config(), Box::new(MemorySource::default()));
    let stop = backend.stop_handle();
    let handle = backend.spawn().unwrap();

    stop.store(false, Ordering::SeqCst);
    assert!(handle.join().is_ok());
}

#[test]
fn test_dropping_control_stops_worker() {
    let (backend, control) = TimingBackend::new(&fast_config(), Box::new(MemorySource::default()));
    let handle = backend.spawn().unwrap();
    drop(control);
    assert!(handle.join().is_ok());
}

#[test]
fn test_snapshot_visible_before_any_delivery() {
    let (points, snapshot) = race_session(10);
    let (backend, control) = TimingBackend::new(&fast_config(), Box::new(MemorySource::new(points, snapshot)));

    // Views can be handed out before the worker starts
    let view = backend.view();
    let worker = backend.into_worker();

    assert_eq!(worker.delivered(), 0);
    assert_eq!(view.lap_count().total_laps, Some(57));
    assert_eq!(view.driver_list().get("16").and_then(|d| d.tla.clone()).as_deref(), Some("LEC"));
    assert_eq!(
        control.view().session_info().meeting.as_ref().and_then(|m| m.location.clone()).as_deref(),
        Some("Sakhir")
    );
}

#[test]
fn test_scrub_and_finish() {
    let (points, snapshot) = race_session(25);
    let (backend, control) = TimingBackend::new(&fast_config(), Box::new(MemorySource::new(points, snapshot)));
    let handle = backend.spawn().unwrap();

    assert!(control.seek_cursor(25));
    wait_for(&control, |m| matches!(m, BackendMessage::SourceFinished));
    assert_eq!(control.view().lap_count().current_lap, Some(5));

    assert!(control.seek_cursor(8));
    wait_for(&control, |m| matches!(m, BackendMessage::Rewound { target: 8 }));
    wait_for(&control, |m| matches!(m, BackendMessage::Progress { delivered: 8, .. }));
    assert_eq!(control.view().lap_count().current_lap, Some(2));

    control.shutdown();
    handle.join().unwrap();
}

#[test]
fn test_load_session_switches_source() {
    let (points, snapshot) = race_session(10);
    let (backend, control) = TimingBackend::new(&fast_config(), Box::new(MemorySource::new(points, snapshot)));
    let handle = backend.spawn().unwrap();

    control.seek_cursor(10);
    wait_for(&control, |m| matches!(m, BackendMessage::SourceFinished));

    let (points, snapshot) = SessionBuilder::new()
        .snapshot(Topic::TrackStatus, json!({"Status": "1", "Message": "AllClear"}))
        .point(0, Topic::TrackStatus, json!({"Status": "5", "Message": "Red"}))
        .build();
    assert!(control.load_session(Box::new(MemorySource::new(points, snapshot))));
    wait_for(&control, |m| matches!(m, BackendMessage::SourceFinished));

    let view = control.view();
    assert_eq!(view.track_status().status.as_deref(), Some("5"));
    assert_eq!(view.lap_count().current_lap, None);
    assert!(view.driver_list().0.is_empty());

    control.shutdown();
    handle.join().unwrap();
}

#[test]
fn test_stats_request() {
    let (points, snapshot) = race_session(30);
    let (backend, control) = TimingBackend::new(&fast_config(), Box::new(MemorySource::new(points, snapshot)));
    let handle = backend.spawn().unwrap();

    control.seek_cursor(30);
    wait_for(&control, |m| matches!(m, BackendMessage::SourceFinished));
    control.request_stats();
    let BackendMessage::Stats(stats) = wait_for(&control, |m| matches!(m, BackendMessage::Stats(_))) else {
        unreachable!()
    };
    assert!(stats.ticks > 0);
    assert!(stats.delivered_total >= 30);

    control.shutdown();
    handle.join().unwrap();
}
