//! Typed schemas for every feed topic
//!
//! Each topic's state type implements [`Merge`] (almost always through
//! [`merge_struct!`](crate::merge_struct)) and [`TopicState`]. Field names follow
//! Rust conventions; the JSON key each field is fed from is declared next to
//! the struct.
//!
//! Every leaf is optional so that an explicit `null` in a payload can be
//! represented as `None`.

pub mod race_control;
pub mod session;
pub mod timing;

pub use race_control::{RaceControlMessage, RaceControlMessages, TeamRadio, TeamRadioCapture};
pub use session::{
    ExtrapolatedClock, Heartbeat, LapCount, MeetingInfo, SessionData, SessionInfo, TrackStatus,
    WeatherData,
};
pub use timing::{
    ChampionshipPrediction, Driver, DriverList, FastestLap, PitStopSeries, TimingAppData,
    TimingData, TimingDataLine, TimingStats, TopThree, TyreStintSeries,
};

use serde::Serialize;
use serde_json::Value;

use crate::merge::{deep_merge, Merge, MergeContext};

/// State type for one topic
///
/// The structural merge is shared by every topic; `derive` is the optional
/// topic-specific step that runs after each merge to recompute fields that
/// depend on more than one merged value.
pub trait TopicState: Merge + Default + Clone + Serialize + Send + Sync + 'static {
    /// Recompute derived fields after a merge
    fn derive(&mut self) {}
}

/// Opaque payload for the compressed telemetry topics (`CarData.z`, `Position.z`)
///
/// These carry a base64 deflate blob; the engine keeps the latest document as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CompressedPayload(pub Value);

impl Merge for CompressedPayload {
    fn merge(&mut self, patch: &Value, _ctx: &mut MergeContext) {
        deep_merge(&mut self.0, patch);
    }
}

impl TopicState for CompressedPayload {}

/// Longest time `parse_lap_time` accepts
const MAX_LAP_TIME: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

/// Parse a lap or sector time such as `1:31.447` or `29.870`
///
/// Returns `None` for anything that is not a time or exceeds a day.
pub fn parse_lap_time(value: &str) -> Option<std::time::Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let (minutes, seconds) = match value.split_once(':') {
        Some((m, s)) => (m.parse::<u64>().ok()?, s),
        None => (0, value),
    };
    let seconds: f64 = seconds.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 || seconds > MAX_LAP_TIME.as_secs_f64() {
        return None;
    }
    let millis = (seconds * 1000.0).round() as u64;
    let total = minutes.checked_mul(60_000)?.checked_add(millis)?;
    let time = std::time::Duration::from_millis(total);
    (time <= MAX_LAP_TIME).then_some(time)
}
