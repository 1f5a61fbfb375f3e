//! Race control messages and team radio captures

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::TopicState;
use crate::merge_struct;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RaceControlMessage {
    pub utc: Option<DateTime<Utc>>,
    pub lap: Option<u32>,
    pub category: Option<String>,
    pub flag: Option<String>,
    pub scope: Option<String>,
    pub sector: Option<u32>,
    pub racing_number: Option<String>,
    pub status: Option<String>,
    pub message: Option<String>,
}

merge_struct!(RaceControlMessage {
    utc: "Utc",
    lap: "Lap",
    category: "Category",
    flag: "Flag",
    scope: "Scope",
    sector: "Sector",
    racing_number: "RacingNumber",
    status: "Status",
    message: "Message",
});

/// Messages arrive as a list in the initial state and as index-keyed deltas after
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RaceControlMessages {
    pub messages: Vec<RaceControlMessage>,
}

merge_struct!(RaceControlMessages { messages: "Messages" });

impl TopicState for RaceControlMessages {}

impl RaceControlMessages {
    /// Newest first
    pub fn latest(&self, count: usize) -> impl Iterator<Item = &RaceControlMessage> {
        self.messages.iter().rev().take(count)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TeamRadioCapture {
    pub utc: Option<DateTime<Utc>>,
    pub racing_number: Option<String>,
    /// Relative to the session path
    pub path: Option<String>,
}

merge_struct!(TeamRadioCapture {
    utc: "Utc",
    racing_number: "RacingNumber",
    path: "Path",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TeamRadio {
    pub captures: Vec<TeamRadioCapture>,
}

merge_struct!(TeamRadio { captures: "Captures" });

impl TopicState for TeamRadio {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::apply;
    use serde_json::json;

    #[test]
    fn test_messages_list_then_indexed_delta() {
        let mut rcm = RaceControlMessages::default();
        apply(
            &mut rcm,
            &json!({"Messages": [
                {"Utc": "2024-03-02T14:50:00", "Category": "Flag", "Flag": "GREEN", "Message": "GREEN LIGHT - PIT EXIT OPEN"}
            ]}),
        );
        apply(
            &mut rcm,
            &json!({"Messages": {"1": {"Utc": "2024-03-02T15:01:12", "Lap": 1, "Category": "Drs", "Status": "DISABLED", "Message": "DRS DISABLED"}}}),
        );
        assert_eq!(rcm.messages.len(), 2);
        let newest: Vec<_> = rcm.latest(1).collect();
        assert_eq!(newest[0].message.as_deref(), Some("DRS DISABLED"));
        assert_eq!(newest[0].lap, Some(1));
    }

    #[test]
    fn test_team_radio_captures() {
        let mut radio = TeamRadio::default();
        apply(
            &mut radio,
            &json!({"Captures": {"0": {"Utc": "2024-03-02T15:20:00.5Z", "RacingNumber": "1", "Path": "TeamRadio/MAXVER01_1_20240302_152000.mp3"}}}),
        );
        assert_eq!(radio.captures.len(), 1);
        assert_eq!(radio.captures[0].racing_number.as_deref(), Some("1"));
    }
}
