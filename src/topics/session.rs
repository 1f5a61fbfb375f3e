//! Session-level topics: heartbeat, session metadata, clock, lap count,
//! track status and weather

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::TopicState;
use crate::merge_struct;

/// Periodic keep-alive carrying the feed's UTC time; anchors session timestamps
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Heartbeat {
    pub utc: Option<DateTime<Utc>>,
}

merge_struct!(Heartbeat { utc: "Utc" });

impl TopicState for Heartbeat {}

/// Country or circuit reference inside the meeting block
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NamedRef {
    pub key: Option<i64>,
    pub code: Option<String>,
    pub name: Option<String>,
    pub short_name: Option<String>,
}

merge_struct!(NamedRef {
    key: "Key",
    code: "Code",
    name: "Name",
    short_name: "ShortName",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MeetingInfo {
    pub key: Option<i64>,
    pub name: Option<String>,
    pub official_name: Option<String>,
    pub location: Option<String>,
    pub country: Option<NamedRef>,
    pub circuit: Option<NamedRef>,
}

merge_struct!(MeetingInfo {
    key: "Key",
    name: "Name",
    official_name: "OfficialName",
    location: "Location",
    country: "Country",
    circuit: "Circuit",
});

/// Static description of the session; lives only in the initial snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionInfo {
    pub meeting: Option<MeetingInfo>,
    pub key: Option<i64>,
    pub session_type: Option<String>,
    pub name: Option<String>,
    pub path: Option<String>,
    /// Local start time; combine with `gmt_offset` for UTC
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub gmt_offset: Option<String>,
}

merge_struct!(SessionInfo {
    meeting: "Meeting",
    key: "Key",
    session_type: "Type",
    name: "Name",
    path: "Path",
    start_date: "StartDate",
    end_date: "EndDate",
    gmt_offset: "GmtOffset",
});

impl TopicState for SessionInfo {}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LapSeriesEntry {
    pub utc: Option<DateTime<Utc>>,
    pub lap: Option<u32>,
    pub qualifying_part: Option<u32>,
}

merge_struct!(LapSeriesEntry {
    utc: "Utc",
    lap: "Lap",
    qualifying_part: "QualifyingPart",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSeriesEntry {
    pub utc: Option<DateTime<Utc>>,
    pub track_status: Option<String>,
    pub session_status: Option<String>,
}

merge_struct!(StatusSeriesEntry {
    utc: "Utc",
    track_status: "TrackStatus",
    session_status: "SessionStatus",
});

/// Lap and session status history
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionData {
    pub series: Vec<LapSeriesEntry>,
    pub status_series: Vec<StatusSeriesEntry>,
}

merge_struct!(SessionData {
    series: "Series",
    status_series: "StatusSeries",
});

impl TopicState for SessionData {}

/// Session clock as extrapolated by the feed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtrapolatedClock {
    pub utc: Option<DateTime<Utc>>,
    /// `HH:MM:SS` remaining at `utc`
    pub remaining: Option<String>,
    pub extrapolating: Option<bool>,
}

merge_struct!(ExtrapolatedClock {
    utc: "Utc",
    remaining: "Remaining",
    extrapolating: "Extrapolating",
});

impl TopicState for ExtrapolatedClock {}

/// Race sessions only
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LapCount {
    pub current_lap: Option<u32>,
    pub total_laps: Option<u32>,
}

merge_struct!(LapCount {
    current_lap: "CurrentLap",
    total_laps: "TotalLaps",
});

impl TopicState for LapCount {}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackStatus {
    /// Numeric status code as sent (`"1"` green, `"4"` safety car, ...)
    pub status: Option<String>,
    pub message: Option<String>,
}

merge_struct!(TrackStatus {
    status: "Status",
    message: "Message",
});

impl TopicState for TrackStatus {}

/// Weather readings; the feed sends every value as a string
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeatherData {
    pub air_temp: Option<String>,
    pub humidity: Option<String>,
    pub pressure: Option<String>,
    pub rainfall: Option<String>,
    pub track_temp: Option<String>,
    pub wind_direction: Option<String>,
    pub wind_speed: Option<String>,
}

merge_struct!(WeatherData {
    air_temp: "AirTemp",
    humidity: "Humidity",
    pressure: "Pressure",
    rainfall: "Rainfall",
    track_temp: "TrackTemp",
    wind_direction: "WindDirection",
    wind_speed: "WindSpeed",
});

impl TopicState for WeatherData {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::apply;
    use serde_json::json;

    #[test]
    fn test_weather_partial_update() {
        let mut weather = WeatherData::default();
        apply(
            &mut weather,
            &json!({"AirTemp": "18.5", "TrackTemp": "27.1", "Rainfall": "0", "_kf": true}),
        );
        apply(&mut weather, &json!({"TrackTemp": "28.0"}));
        assert_eq!(weather.air_temp.as_deref(), Some("18.5"));
        assert_eq!(weather.track_temp.as_deref(), Some("28.0"));
    }

    #[test]
    fn test_session_data_series_deltas() {
        let mut data = SessionData::default();
        apply(
            &mut data,
            &json!({"Series": [], "StatusSeries": [{"Utc": "2024-03-02T14:00:00.000Z", "SessionStatus": "Started"}]}),
        );
        apply(&mut data, &json!({"Series": {"0": {"Utc": "2024-03-02T15:03:00Z", "Lap": 2}}}));
        apply(&mut data, &json!({"StatusSeries": {"1": {"TrackStatus": "Yellow"}}}));
        assert_eq!(data.series.len(), 1);
        assert_eq!(data.series[0].lap, Some(2));
        assert_eq!(data.status_series.len(), 2);
        assert_eq!(data.status_series[1].track_status.as_deref(), Some("Yellow"));
    }

    #[test]
    fn test_session_info_nested() {
        let mut info = SessionInfo::default();
        apply(
            &mut info,
            &json!({
                "Meeting": {"Key": 1229, "Name": "Bahrain Grand Prix", "Location": "Sakhir",
                            "Country": {"Key": 36, "Code": "BRN", "Name": "Bahrain"}},
                "Key": 9472, "Type": "Race", "Name": "Race",
                "Path": "2024/2024-03-02_Bahrain_Grand_Prix/2024-03-02_Race/"
            }),
        );
        let meeting = info.meeting.as_ref().unwrap();
        assert_eq!(meeting.location.as_deref(), Some("Sakhir"));
        assert_eq!(meeting.country.as_ref().unwrap().code.as_deref(), Some("BRN"));
        assert_eq!(info.session_type.as_deref(), Some("Race"));
    }

    #[test]
    fn test_lap_count_numeric_strings() {
        let mut laps = LapCount::default();
        apply(&mut laps, &json!({"CurrentLap": 1, "TotalLaps": 57}));
        apply(&mut laps, &json!({"CurrentLap": "2"}));
        assert_eq!(laps.current_lap, Some(2));
        assert_eq!(laps.total_laps, Some(57));
    }
}
