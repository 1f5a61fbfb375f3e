//! Core data types for the live-timing engine
//!
//! This module contains the transport-level structures shared by every other
//! part of the crate.
//!
//! # Main Types
//!
//! - [`Topic`] - The closed set of feed topics, with wire names and ordering rank
//! - [`RawDataPoint`] - One timestamped, topic-tagged partial update
//! - [`SessionType`] - Race vs. non-race sessions (they subscribe to different topics)
//! - [`OrderingKey`] - Total order used when merging per-topic streams
//!
//! # Ordering
//!
//! The merged stream is sorted by timestamp. Points with equal timestamps are
//! ordered by the topic's declaration rank, then by their position within the
//! topic's own stream.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A named category of live-timing data
///
/// Declaration order is significant: it is the tie-break rank for points that
/// share a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Topic {
    Heartbeat,
    #[serde(rename = "CarData.z")]
    CarData,
    #[serde(rename = "Position.z")]
    Position,
    ExtrapolatedClock,
    TopThree,
    TimingStats,
    TimingAppData,
    WeatherData,
    TrackStatus,
    DriverList,
    RaceControlMessages,
    SessionData,
    LapCount,
    TimingData,
    ChampionshipPrediction,
    TeamRadio,
    TyreStintSeries,
    PitStopSeries,
    /// Snapshot-only: fetched once per session, never part of the delta log
    SessionInfo,
}

impl Topic {
    /// Every topic, in declaration order
    pub const ALL: [Topic; 19] = [
        Topic::Heartbeat,
        Topic::CarData,
        Topic::Position,
        Topic::ExtrapolatedClock,
        Topic::TopThree,
        Topic::TimingStats,
        Topic::TimingAppData,
        Topic::WeatherData,
        Topic::TrackStatus,
        Topic::DriverList,
        Topic::RaceControlMessages,
        Topic::SessionData,
        Topic::LapCount,
        Topic::TimingData,
        Topic::ChampionshipPrediction,
        Topic::TeamRadio,
        Topic::TyreStintSeries,
        Topic::PitStopSeries,
        Topic::SessionInfo,
    ];

    /// Topics streamed for race sessions
    pub const RACE: [Topic; 18] = [
        Topic::Heartbeat,
        Topic::CarData,
        Topic::Position,
        Topic::ExtrapolatedClock,
        Topic::TopThree,
        Topic::TimingStats,
        Topic::TimingAppData,
        Topic::WeatherData,
        Topic::TrackStatus,
        Topic::DriverList,
        Topic::RaceControlMessages,
        Topic::SessionData,
        Topic::LapCount,
        Topic::TimingData,
        Topic::ChampionshipPrediction,
        Topic::TeamRadio,
        Topic::TyreStintSeries,
        Topic::PitStopSeries,
    ];

    /// Topics streamed for practice and qualifying sessions
    pub const NON_RACE: [Topic; 16] = [
        Topic::Heartbeat,
        Topic::CarData,
        Topic::Position,
        Topic::ExtrapolatedClock,
        Topic::TopThree,
        Topic::TimingStats,
        Topic::TimingAppData,
        Topic::WeatherData,
        Topic::TrackStatus,
        Topic::DriverList,
        Topic::RaceControlMessages,
        Topic::SessionData,
        Topic::TimingData,
        Topic::TeamRadio,
        Topic::TyreStintSeries,
        Topic::PitStopSeries,
    ];

    /// Topics whose first data point is stored in the initial snapshot
    pub const SNAPSHOT_ONLY: [Topic; 2] = [Topic::SessionInfo, Topic::Heartbeat];

    /// Name used on the wire and in capture files
    pub fn wire_name(&self) -> &'static str {
        match self {
            Topic::Heartbeat => "Heartbeat",
            Topic::CarData => "CarData.z",
            Topic::Position => "Position.z",
            Topic::ExtrapolatedClock => "ExtrapolatedClock",
            Topic::TopThree => "TopThree",
            Topic::TimingStats => "TimingStats",
            Topic::TimingAppData => "TimingAppData",
            Topic::WeatherData => "WeatherData",
            Topic::TrackStatus => "TrackStatus",
            Topic::DriverList => "DriverList",
            Topic::RaceControlMessages => "RaceControlMessages",
            Topic::SessionData => "SessionData",
            Topic::LapCount => "LapCount",
            Topic::TimingData => "TimingData",
            Topic::ChampionshipPrediction => "ChampionshipPrediction",
            Topic::TeamRadio => "TeamRadio",
            Topic::TyreStintSeries => "TyreStintSeries",
            Topic::PitStopSeries => "PitStopSeries",
            Topic::SessionInfo => "SessionInfo",
        }
    }

    /// Resolve a wire name to a topic
    pub fn from_wire(name: &str) -> Option<Topic> {
        Topic::ALL.iter().copied().find(|t| t.wire_name() == name)
    }

    /// Declaration rank, used as the tie-break for equal timestamps
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    /// Topics to fetch or subscribe to for a session type
    pub fn for_session(session_type: SessionType) -> &'static [Topic] {
        match session_type {
            SessionType::Race => &Topic::RACE,
            SessionType::Other => &Topic::NON_RACE,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::from_wire(s).ok_or_else(|| format!("unknown topic '{}'", s))
    }
}

/// Race sessions carry extra topics (lap count, championship prediction)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionType {
    Race,
    #[default]
    Other,
}

impl SessionType {
    /// Classify the `Type` field of a session in the meetings index
    pub fn from_index_type(value: &str) -> Self {
        if value.eq_ignore_ascii_case("Race") {
            SessionType::Race
        } else {
            SessionType::Other
        }
    }
}

/// One timestamped, topic-tagged partial-update fragment
///
/// The payload is a partial update, not necessarily a full object. Points are
/// never modified after construction; buffers only hand out shared references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDataPoint {
    /// Which merge engine consumes this point
    #[serde(rename = "type")]
    pub topic: Topic,
    /// Partial JSON document
    #[serde(rename = "json")]
    pub payload: Value,
    /// Absolute instant, derived from the session anchor
    #[serde(rename = "dateTime")]
    pub timestamp: DateTime<Utc>,
}

impl RawDataPoint {
    /// Create a new data point
    pub fn new(topic: Topic, payload: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            topic,
            payload,
            timestamp,
        }
    }

    /// Ordering key for this point given its position within its topic stream
    pub fn ordering_key(&self, seq: u64) -> OrderingKey {
        OrderingKey {
            timestamp: self.timestamp,
            rank: self.topic.rank(),
            seq,
        }
    }
}

/// Parse a feed timestamp
///
/// The feed mixes RFC 3339 (`2024-03-02T15:00:00.123Z`) with naive timestamps
/// that carry no offset; naive values are taken as UTC.
pub fn parse_utc(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Total order over data points from multiple topic streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderingKey {
    /// Primary: absolute timestamp
    pub timestamp: DateTime<Utc>,
    /// Secondary: topic declaration rank
    pub rank: u8,
    /// Tertiary: sequence number within the topic stream
    pub seq: u64,
}
