//! Per-driver timing topics
//!
//! Most of these are keyed by racing number (`"1"`, `"44"`, ...). Derived
//! fields are recomputed in [`TopicState::derive`] after each merge and are
//! never fed from the payload.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{parse_lap_time, TopicState};
use crate::merge::{Merge, MergeContext};
use crate::merge_struct;

// ==================== DriverList ====================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Driver {
    pub racing_number: Option<String>,
    pub broadcast_name: Option<String>,
    pub full_name: Option<String>,
    pub tla: Option<String>,
    pub line: Option<u32>,
    pub team_name: Option<String>,
    pub team_colour: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub headshot_url: Option<String>,
}

merge_struct!(Driver {
    racing_number: "RacingNumber",
    broadcast_name: "BroadcastName",
    full_name: "FullName",
    tla: "Tla",
    line: "Line",
    team_name: "TeamName",
    team_colour: "TeamColour",
    first_name: "FirstName",
    last_name: "LastName",
    headshot_url: "HeadshotUrl",
});

/// Drivers keyed by racing number; the payload is the map itself
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DriverList(pub BTreeMap<String, Driver>);

impl Merge for DriverList {
    fn merge(&mut self, patch: &Value, ctx: &mut MergeContext) {
        self.0.merge(patch, ctx);
    }
}

impl TopicState for DriverList {}

impl DriverList {
    pub fn get(&self, racing_number: &str) -> Option<&Driver> {
        self.0.get(racing_number)
    }

    /// Drivers sorted by their current line on the timing tower
    pub fn by_line(&self) -> Vec<&Driver> {
        let mut drivers: Vec<_> = self.0.values().collect();
        drivers.sort_by_key(|d| d.line.unwrap_or(u32::MAX));
        drivers
    }
}

// ==================== TimingData ====================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Interval {
    pub value: Option<String>,
    pub catching: Option<bool>,
}

merge_struct!(Interval {
    value: "Value",
    catching: "Catching",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Segment {
    pub status: Option<u32>,
}

merge_struct!(Segment { status: "Status" });

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SectorTime {
    pub value: Option<String>,
    pub previous_value: Option<String>,
    pub personal_fastest: Option<bool>,
    pub overall_fastest: Option<bool>,
    pub stopped: Option<bool>,
    pub segments: Vec<Segment>,
}

merge_struct!(SectorTime {
    value: "Value",
    previous_value: "PreviousValue",
    personal_fastest: "PersonalFastest",
    overall_fastest: "OverallFastest",
    stopped: "Stopped",
    segments: "Segments",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BestLapTime {
    pub value: Option<String>,
    pub lap: Option<u32>,
}

merge_struct!(BestLapTime {
    value: "Value",
    lap: "Lap",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LastLapTime {
    pub value: Option<String>,
    pub personal_fastest: Option<bool>,
    pub overall_fastest: Option<bool>,
}

merge_struct!(LastLapTime {
    value: "Value",
    personal_fastest: "PersonalFastest",
    overall_fastest: "OverallFastest",
});

/// Speed trap reading
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Speed {
    pub value: Option<String>,
    pub personal_fastest: Option<bool>,
    pub overall_fastest: Option<bool>,
    pub position: Option<u32>,
}

merge_struct!(Speed {
    value: "Value",
    personal_fastest: "PersonalFastest",
    overall_fastest: "OverallFastest",
    position: "Position",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Speeds {
    pub i1: Option<Speed>,
    pub i2: Option<Speed>,
    pub fl: Option<Speed>,
    pub st: Option<Speed>,
}

merge_struct!(Speeds {
    i1: "I1",
    i2: "I2",
    fl: "FL",
    st: "ST",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimingDataLine {
    pub racing_number: Option<String>,
    pub line: Option<u32>,
    pub position: Option<String>,
    pub gap_to_leader: Option<String>,
    pub interval_to_position_ahead: Option<Interval>,
    /// Qualifying only
    pub time_diff_to_fastest: Option<String>,
    pub in_pit: Option<bool>,
    pub pit_out: Option<bool>,
    pub number_of_pit_stops: Option<u32>,
    pub number_of_laps: Option<u32>,
    pub retired: Option<bool>,
    pub stopped: Option<bool>,
    pub knocked_out: Option<bool>,
    pub cutoff: Option<bool>,
    pub sectors: Vec<SectorTime>,
    pub speeds: Option<Speeds>,
    pub best_lap_time: Option<BestLapTime>,
    pub last_lap_time: Option<LastLapTime>,
}

merge_struct!(TimingDataLine {
    racing_number: "RacingNumber",
    line: "Line",
    position: "Position",
    gap_to_leader: "GapToLeader",
    interval_to_position_ahead: "IntervalToPositionAhead",
    time_diff_to_fastest: "TimeDiffToFastest",
    in_pit: "InPit",
    pit_out: "PitOut",
    number_of_pit_stops: "NumberOfPitStops",
    number_of_laps: "NumberOfLaps",
    retired: "Retired",
    stopped: "Stopped",
    knocked_out: "KnockedOut",
    cutoff: "Cutoff",
    sectors: "Sectors",
    speeds: "Speeds",
    best_lap_time: "BestLapTime",
    last_lap_time: "LastLapTime",
});

impl TimingDataLine {
    pub fn best_lap(&self) -> Option<Duration> {
        self.best_lap_time
            .as_ref()
            .and_then(|b| b.value.as_deref())
            .and_then(parse_lap_time)
    }
}

/// Session-wide fastest lap
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FastestLap {
    pub racing_number: String,
    pub time: Duration,
    pub lap: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimingData {
    pub lines: BTreeMap<String, TimingDataLine>,
    pub session_part: Option<u32>,
    /// Derived from every line's best lap
    pub fastest_lap: Option<FastestLap>,
}

merge_struct!(TimingData {
    lines: "Lines",
    session_part: "SessionPart",
});

impl TopicState for TimingData {
    fn derive(&mut self) {
        self.fastest_lap = self
            .lines
            .iter()
            .filter_map(|(number, line)| {
                let time = line.best_lap()?;
                Some(FastestLap {
                    racing_number: number.clone(),
                    time,
                    lap: line.best_lap_time.as_ref().and_then(|b| b.lap),
                })
            })
            .min_by_key(|f| f.time);
    }
}

impl TimingData {
    /// Lines ordered by tower position
    pub fn by_line(&self) -> Vec<(&str, &TimingDataLine)> {
        let mut lines: Vec<_> = self.lines.iter().map(|(k, v)| (k.as_str(), v)).collect();
        lines.sort_by_key(|(_, l)| l.line.unwrap_or(u32::MAX));
        lines
    }
}

// ==================== TimingAppData ====================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stint {
    pub compound: Option<String>,
    pub new: Option<String>,
    pub tyres_not_changed: Option<String>,
    pub total_laps: Option<u32>,
    pub start_laps: Option<u32>,
    pub lap_time: Option<String>,
    pub lap_number: Option<u32>,
    pub lap_flags: Option<u32>,
}

merge_struct!(Stint {
    compound: "Compound",
    new: "New",
    tyres_not_changed: "TyresNotChanged",
    total_laps: "TotalLaps",
    start_laps: "StartLaps",
    lap_time: "LapTime",
    lap_number: "LapNumber",
    lap_flags: "LapFlags",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppLine {
    pub racing_number: Option<String>,
    pub line: Option<u32>,
    pub grid_pos: Option<String>,
    pub stints: Vec<Stint>,
    /// Derived: compound of the latest stint
    pub current_compound: Option<String>,
}

merge_struct!(AppLine {
    racing_number: "RacingNumber",
    line: "Line",
    grid_pos: "GridPos",
    stints: "Stints",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimingAppData {
    pub lines: BTreeMap<String, AppLine>,
}

merge_struct!(TimingAppData { lines: "Lines" });

impl TopicState for TimingAppData {
    fn derive(&mut self) {
        for line in self.lines.values_mut() {
            line.current_compound = line.stints.iter().rev().find_map(|s| s.compound.clone());
        }
    }
}

// ==================== TimingStats ====================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PersonalBest {
    pub value: Option<String>,
    pub lap: Option<u32>,
    pub position: Option<u32>,
}

merge_struct!(PersonalBest {
    value: "Value",
    lap: "Lap",
    position: "Position",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsLine {
    pub racing_number: Option<String>,
    pub line: Option<u32>,
    pub personal_best_lap_time: Option<PersonalBest>,
    pub best_sectors: Vec<PersonalBest>,
    pub best_speeds: Option<Speeds>,
}

merge_struct!(StatsLine {
    racing_number: "RacingNumber",
    line: "Line",
    personal_best_lap_time: "PersonalBestLapTime",
    best_sectors: "BestSectors",
    best_speeds: "BestSpeeds",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimingStats {
    pub withheld: Option<bool>,
    pub lines: BTreeMap<String, StatsLine>,
    pub session_type: Option<String>,
}

merge_struct!(TimingStats {
    withheld: "Withheld",
    lines: "Lines",
    session_type: "SessionType",
});

impl TopicState for TimingStats {}

// ==================== TopThree ====================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TopThreeLine {
    pub position: Option<String>,
    pub racing_number: Option<String>,
    pub tla: Option<String>,
    pub broadcast_name: Option<String>,
    pub team: Option<String>,
    pub team_colour: Option<String>,
    pub lap_time: Option<String>,
    pub lap_state: Option<u32>,
    pub diff_to_ahead: Option<String>,
    pub diff_to_leader: Option<String>,
    pub overall_fastest: Option<bool>,
    pub personal_fastest: Option<bool>,
}

merge_struct!(TopThreeLine {
    position: "Position",
    racing_number: "RacingNumber",
    tla: "Tla",
    broadcast_name: "BroadcastName",
    team: "Team",
    team_colour: "TeamColour",
    lap_time: "LapTime",
    lap_state: "LapState",
    diff_to_ahead: "DiffToAhead",
    diff_to_leader: "DiffToLeader",
    overall_fastest: "OverallFastest",
    personal_fastest: "PersonalFastest",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TopThree {
    pub withheld: Option<bool>,
    pub lines: Vec<TopThreeLine>,
}

merge_struct!(TopThree {
    withheld: "Withheld",
    lines: "Lines",
});

impl TopicState for TopThree {}

// ==================== Series ====================

/// Stints per racing number
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TyreStintSeries {
    pub stints: BTreeMap<String, Vec<Stint>>,
}

merge_struct!(TyreStintSeries { stints: "Stints" });

impl TopicState for TyreStintSeries {}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PitStop {
    pub racing_number: Option<String>,
    pub pit_stop_time: Option<String>,
    pub pit_lane_time: Option<String>,
    pub lap: Option<String>,
}

merge_struct!(PitStop {
    racing_number: "RacingNumber",
    pit_stop_time: "PitStopTime",
    pit_lane_time: "PitLaneTime",
    lap: "Lap",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PitStopEntry {
    pub timestamp: Option<DateTime<Utc>>,
    pub pit_stop: Option<PitStop>,
}

merge_struct!(PitStopEntry {
    timestamp: "Timestamp",
    pit_stop: "PitStop",
});

/// Pit stops per racing number
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PitStopSeries {
    pub pit_times: BTreeMap<String, Vec<PitStopEntry>>,
}

merge_struct!(PitStopSeries { pit_times: "PitTimes" });

impl TopicState for PitStopSeries {}

// ==================== ChampionshipPrediction ====================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriverPrediction {
    pub racing_number: Option<String>,
    pub current_position: Option<u32>,
    pub predicted_position: Option<u32>,
    pub current_points: Option<f64>,
    pub predicted_points: Option<f64>,
}

merge_struct!(DriverPrediction {
    racing_number: "RacingNumber",
    current_position: "CurrentPosition",
    predicted_position: "PredictedPosition",
    current_points: "CurrentPoints",
    predicted_points: "PredictedPoints",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TeamPrediction {
    pub team_name: Option<String>,
    pub current_position: Option<u32>,
    pub predicted_position: Option<u32>,
    pub current_points: Option<f64>,
    pub predicted_points: Option<f64>,
}

merge_struct!(TeamPrediction {
    team_name: "TeamName",
    current_position: "CurrentPosition",
    predicted_position: "PredictedPosition",
    current_points: "CurrentPoints",
    predicted_points: "PredictedPoints",
});

/// Race sessions only
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChampionshipPrediction {
    pub drivers: BTreeMap<String, DriverPrediction>,
    pub teams: BTreeMap<String, TeamPrediction>,
}

merge_struct!(ChampionshipPrediction {
    drivers: "Drivers",
    teams: "Teams",
});

impl TopicState for ChampionshipPrediction {}
