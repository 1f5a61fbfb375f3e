//! Static feed stream parsing, session anchoring and multi-topic merge-sort
//!
//! A topic stream is a sequence of lines, each a 12-character `HH:MM:SS.fff`
//! offset from the start of the stream followed by a JSON fragment:
//!
//! ```text
//! 00:00:01.373{"Utc":"2024-03-02T14:03:49.1Z","_kf":true}
//! ```

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use std::time::Duration;

use crate::error::{LiveTimingError, Result};
use crate::types::{parse_utc, OrderingKey, RawDataPoint, Topic};

/// Width of the relative offset prefix
pub const OFFSET_WIDTH: usize = 12;

/// One parsed line of a topic stream
#[derive(Debug, Clone, PartialEq)]
pub struct FeedLine {
    /// Offset from the start of the stream
    pub offset: Duration,
    pub payload: Value,
}

/// Parse an `HH:MM:SS.fff` offset
pub fn parse_offset(text: &str) -> Option<Duration> {
    let mut parts = text.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds = parts.next()?;
    if parts.next().is_some() || minutes >= 60 {
        return None;
    }
    let (secs, millis) = seconds.split_once('.').unwrap_or((seconds, "0"));
    let secs: u64 = secs.parse().ok()?;
    if secs >= 60 || millis.is_empty() || millis.len() > 3 {
        return None;
    }
    // Right-pad so ".5" reads as 500ms
    let millis: u64 = format!("{:0<3}", millis).parse().ok()?;
    Some(Duration::from_millis(
        ((hours * 60 + minutes) * 60 + secs) * 1000 + millis,
    ))
}

/// Parse a single stream line
pub fn parse_line(line: &str) -> Result<FeedLine> {
    let Some((prefix, json)) = line.get(..OFFSET_WIDTH).zip(line.get(OFFSET_WIDTH..)) else {
        return Err(LiveTimingError::MalformedLine(format!(
            "line shorter than the {} character offset",
            OFFSET_WIDTH
        )));
    };
    let offset = parse_offset(prefix)
        .ok_or_else(|| LiveTimingError::MalformedLine(format!("bad offset '{}'", prefix)))?;
    let payload = serde_json::from_str(json)
        .map_err(|e| LiveTimingError::MalformedLine(format!("bad payload at {}: {}", prefix, e)))?;
    Ok(FeedLine { offset, payload })
}

/// Parse a whole topic stream body, skipping malformed lines with a warning
pub fn parse_stream(topic: Topic, body: &str) -> Vec<FeedLine> {
    let body = body.trim_start_matches('\u{feff}');
    let mut lines = Vec::new();
    for (number, raw) in body.lines().enumerate() {
        let raw = raw.trim_end_matches('\r');
        if raw.trim().is_empty() {
            continue;
        }
        match parse_line(raw) {
            Ok(line) => lines.push(line),
            Err(e) => {
                tracing::warn!(topic = %topic, line = number + 1, error = %e, "Skipping malformed feed line");
            }
        }
    }
    lines
}

/// Session start instant: the first heartbeat's advertised UTC minus its offset
pub fn compute_anchor(heartbeats: &[FeedLine]) -> Result<DateTime<Utc>> {
    let first = heartbeats.first().ok_or(LiveTimingError::MissingAnchor)?;
    let utc = first
        .payload
        .get("Utc")
        .and_then(Value::as_str)
        .and_then(parse_utc)
        .ok_or(LiveTimingError::MissingAnchor)?;
    let offset = TimeDelta::from_std(first.offset).map_err(|_| LiveTimingError::MissingAnchor)?;
    Ok(utc - offset)
}

/// Absolute timestamp for an offset against the anchor
pub fn at_offset(anchor: DateTime<Utc>, offset: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(offset)
        .ok()
        .and_then(|delta| anchor.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Turn one topic's lines into data points
pub fn stamp(topic: Topic, lines: Vec<FeedLine>, anchor: DateTime<Utc>) -> Vec<RawDataPoint> {
    lines
        .into_iter()
        .map(|line| RawDataPoint::new(topic, line.payload, at_offset(anchor, line.offset)))
        .collect()
}

/// Merge per-topic streams into one globally ordered stream
///
/// Sorted by timestamp, then topic declaration rank, then position within the
/// topic's own stream. The order the streams are passed in does not matter.
pub fn merge_streams(streams: Vec<Vec<RawDataPoint>>) -> Vec<RawDataPoint> {
    let total = streams.iter().map(Vec::len).sum();
    let mut keyed: Vec<(OrderingKey, RawDataPoint)> = Vec::with_capacity(total);
    for stream in streams {
        for (seq, point) in stream.into_iter().enumerate() {
            keyed.push((point.ordering_key(seq as u64), point));
        }
    }
    keyed.sort_by_key(|(key, _)| *key);
    keyed.into_iter().map(|(_, point)| point).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("00:00:01.373"), Some(Duration::from_millis(1373)));
        assert_eq!(parse_offset("01:02:03.004"), Some(Duration::from_millis(3_723_004)));
        assert_eq!(parse_offset("00:00:01.5"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_offset("00:61:00.000"), None);
        assert_eq!(parse_offset("garbage"), None);
    }

    #[test]
    fn test_parse_stream_skips_malformed() {
        let body = "\u{feff}00:00:01.000{\"Status\":\"1\"}\r\n\
                    00:00:02.000{not json}\r\n\
                    \r\n\
                    short\n\
                    00:00:03.500{\"Status\":\"2\",\"Message\":\"Yellow\"}";
        let lines = parse_stream(Topic::TrackStatus, body);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].payload, json!({"Status": "1"}));
        assert_eq!(lines[1].offset, Duration::from_millis(3500));
    }

    #[test]
    fn test_anchor_is_heartbeat_utc_minus_offset() {
        let heartbeats = parse_stream(
            Topic::Heartbeat,
            "00:00:10.250{\"Utc\":\"2024-03-02T14:03:50.250Z\"}\n00:00:15.250{\"Utc\":\"2024-03-02T14:03:55.250Z\"}",
        );
        let anchor = compute_anchor(&heartbeats).unwrap();
        assert_eq!(anchor, Utc.with_ymd_and_hms(2024, 3, 2, 14, 3, 40).unwrap());

        let points = stamp(Topic::Heartbeat, heartbeats, anchor);
        assert_eq!(points[1].timestamp, Utc.with_ymd_and_hms(2024, 3, 2, 14, 3, 55).unwrap() + TimeDelta::milliseconds(250));
    }

    #[test]
    fn test_missing_anchor() {
        assert!(matches!(compute_anchor(&[]), Err(LiveTimingError::MissingAnchor)));
        let no_utc = vec![FeedLine { offset: Duration::ZERO, payload: json!({"_kf": true}) }];
        assert!(matches!(compute_anchor(&no_utc), Err(LiveTimingError::MissingAnchor)));
    }

    #[test]
    fn test_merge_streams_tie_break() {
        let t = Utc.with_ymd_and_hms(2024, 3, 2, 15, 0, 0).unwrap();
        let later = t + TimeDelta::seconds(1);
        let timing = vec![
            RawDataPoint::new(Topic::TimingData, json!({"n": 0}), t),
            RawDataPoint::new(Topic::TimingData, json!({"n": 1}), t),
        ];
        let weather = vec![
            RawDataPoint::new(Topic::WeatherData, json!({"n": 2}), t),
            RawDataPoint::new(Topic::WeatherData, json!({"n": 3}), later),
        ];
        let heartbeat = vec![RawDataPoint::new(Topic::Heartbeat, json!({"n": 4}), later)];

        let merged = merge_streams(vec![timing, weather, heartbeat]);
        let order: Vec<_> = merged.iter().map(|p| p.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![2, 0, 1, 4, 3]);
    }

    fn arb_streams() -> impl Strategy<Value = Vec<Vec<(usize, i64)>>> {
        // Per-topic streams of (topic index, non-decreasing millisecond offsets)
        prop::collection::vec(
            (0usize..Topic::ALL.len(), prop::collection::vec(0i64..50, 0..20)),
            1..6,
        )
        .prop_map(|streams| {
            streams
                .into_iter()
                .map(|(topic, mut offsets)| {
                    offsets.sort_unstable();
                    offsets.into_iter().map(|o| (topic, o)).collect()
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_merged_stream_is_stable_sort(streams in arb_streams()) {
            let base = Utc.with_ymd_and_hms(2024, 3, 2, 15, 0, 0).unwrap();
            let mut expected = Vec::new();
            let mut inputs = Vec::new();
            for (stream_index, stream) in streams.iter().enumerate() {
                let points: Vec<_> = stream
                    .iter()
                    .enumerate()
                    .map(|(seq, (topic, offset))| {
                        let topic = Topic::ALL[*topic];
                        let point = RawDataPoint::new(
                            topic,
                            json!({"stream": stream_index, "seq": seq}),
                            base + TimeDelta::milliseconds(*offset),
                        );
                        expected.push((point.timestamp, topic.rank(), seq, stream_index));
                        point
                    })
                    .collect();
                inputs.push(points);
            }
            expected.sort_by_key(|(t, rank, seq, _)| (*t, *rank, *seq));

            let merged = merge_streams(inputs);
            prop_assert_eq!(merged.len(), expected.len());
            for window in merged.windows(2) {
                prop_assert!(window[0].timestamp <= window[1].timestamp);
            }
            for (point, (t, rank, _, _)) in merged.iter().zip(&expected) {
                prop_assert_eq!(point.timestamp, *t);
                prop_assert_eq!(point.topic.rank(), *rank);
            }
        }
    }
}
