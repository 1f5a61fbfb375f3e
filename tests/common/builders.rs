//! Test data builders for sessions and captures

use chrono::{DateTime, TimeDelta, Utc};
use livetiming_rs::session::InitialSnapshot;
use livetiming_rs::types::{RawDataPoint, Topic};
use serde_json::{json, Value};

use super::session_start;

/// Builder for an ordered point stream plus its snapshot
pub struct SessionBuilder {
    start: DateTime<Utc>,
    points: Vec<RawDataPoint>,
    snapshot: InitialSnapshot,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            start: session_start(),
            points: Vec::new(),
            snapshot: InitialSnapshot::new(),
        }
    }

    pub fn snapshot(mut self, topic: Topic, payload: Value) -> Self {
        self.snapshot.insert(topic, payload);
        self
    }

    /// Add a point `millis` after the session start; callers add points in time order
    pub fn point(mut self, millis: i64, topic: Topic, payload: Value) -> Self {
        self.points.push(RawDataPoint::new(
            topic,
            payload,
            self.start + TimeDelta::milliseconds(millis),
        ));
        self
    }

    pub fn build(self) -> (Vec<RawDataPoint>, InitialSnapshot) {
        (self.points, self.snapshot)
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A short race: two cars trading the lead, weather drifting, a safety car
///
/// One point every 250ms, cycling through timing, weather, lap count, track
/// status and race control so every interesting merge path is hit.
pub fn race_session(points: usize) -> (Vec<RawDataPoint>, InitialSnapshot) {
    let mut builder = SessionBuilder::new()
        .snapshot(
            Topic::SessionInfo,
            json!({
                "Meeting": {"Name": "Bahrain Grand Prix", "Location": "Sakhir"},
                "Type": "Race",
                "Name": "Race",
                "StartDate": "2024-03-02T18:00:00"
            }),
        )
        .snapshot(Topic::Heartbeat, json!({"Utc": "2024-03-02T15:00:00Z"}))
        .snapshot(Topic::LapCount, json!({"CurrentLap": 1, "TotalLaps": 57}))
        .snapshot(
            Topic::DriverList,
            json!({
                "1": {"RacingNumber": "1", "Tla": "VER", "Line": 1},
                "16": {"RacingNumber": "16", "Tla": "LEC", "Line": 2}
            }),
        );

    for i in 0..points {
        let millis = i as i64 * 250;
        let step = i / 5;
        let (topic, payload) = match i % 5 {
            0 => {
                let leader = if step % 2 == 0 { "1" } else { "16" };
                let other = if leader == "1" { "16" } else { "1" };
                (
                    Topic::TimingData,
                    json!({"Lines": {
                        leader: {"Line": 1, "Position": "1"},
                        other: {"Line": 2, "Position": "2",
                                "LastLapTime": {"Value": format!("1:3{}.{:03}", step % 10, i % 1000)}}
                    }}),
                )
            }
            1 => (
                Topic::WeatherData,
                json!({"AirTemp": format!("{}.{}", 20 + step % 7, step % 10), "TrackTemp": format!("{}", 30 + step % 11)}),
            ),
            2 => (Topic::LapCount, json!({"CurrentLap": 1 + step})),
            3 => {
                let status = if step % 4 == 3 { "4" } else { "1" };
                (Topic::TrackStatus, json!({"Status": status, "Message": null}))
            }
            _ => (
                Topic::RaceControlMessages,
                json!({"Messages": {step.to_string(): {"Utc": "2024-03-02T15:00:00", "Category": "Other", "Message": format!("MESSAGE {}", step)}}}),
            ),
        };
        builder = builder.point(millis, topic, payload);
    }
    builder.build()
}
