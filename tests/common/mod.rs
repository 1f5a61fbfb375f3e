//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod fixtures;

use chrono::{DateTime, TimeZone, Utc};
use livetiming_rs::backend::{BackendMessage, ControlHandle};
use livetiming_rs::processor::RegistryView;
use livetiming_rs::types::Topic;
use serde_json::Value;
use std::time::{Duration, Instant};

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Green flag of the fixture race
pub fn session_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 2, 15, 0, 0).unwrap()
}

/// Every topic's state as JSON, for whole-registry comparisons
pub fn registry_json(view: &RegistryView) -> Vec<(Topic, Value)> {
    Topic::ALL
        .iter()
        .map(|topic| (*topic, view.to_json(*topic)))
        .collect()
}

/// Wait for the first message matching `predicate`, failing after the test timeout
pub fn wait_for(control: &ControlHandle, mut predicate: impl FnMut(&BackendMessage) -> bool) -> BackendMessage {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if let Some(msg) = control.recv_timeout(Duration::from_millis(20)) {
            if predicate(&msg) {
                return msg;
            }
        }
    }
    panic!("timed out waiting for backend message");
}
