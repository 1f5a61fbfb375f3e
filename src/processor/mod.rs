//! Per-topic state holders and the closed topic registry
//!
//! The dispatch worker owns the [`TopicRegistry`] and is the only writer.
//! Readers hold a [`RegistryView`], which hands out `Arc` snapshots of each
//! topic's [`Latest`] value.
//!
//! # Reader/writer discipline
//!
//! `Latest<T>` keeps its value behind a `parking_lot::RwLock<Arc<T>>`. A merge
//! runs under the write lock through `Arc::make_mut`: if a reader still holds
//! the previous snapshot the writer merges into a private copy, otherwise it
//! mutates in place. Either way a reader only ever sees the state before or
//! after a complete merge step.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::merge::{apply, MergeContext};
use crate::topics::{
    ChampionshipPrediction, CompressedPayload, DriverList, ExtrapolatedClock, Heartbeat,
    LapCount, PitStopSeries, RaceControlMessages, SessionData, SessionInfo, TeamRadio,
    TimingAppData, TimingData, TimingStats, TopThree, TopicState, TrackStatus, TyreStintSeries,
    WeatherData,
};
use crate::types::{RawDataPoint, Topic};

/// Shared, always-consistent current state of one topic
#[derive(Debug, Default)]
pub struct Latest<T> {
    value: RwLock<Arc<T>>,
    version: AtomicU64,
}

impl<T: TopicState> Latest<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: RwLock::new(Arc::new(value)),
            version: AtomicU64::new(0),
        }
    }

    /// Current state; never a partially merged value
    pub fn snapshot(&self) -> Arc<T> {
        Arc::clone(&self.value.read())
    }

    /// Number of completed updates
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.value.write();
        let result = f(Arc::make_mut(&mut guard));
        self.version.fetch_add(1, Ordering::Release);
        result
    }

    fn replace(&self, value: T) {
        *self.value.write() = Arc::new(value);
        self.version.fetch_add(1, Ordering::Release);
    }
}

/// The single writer for one topic
#[derive(Debug)]
pub struct Processor<T: TopicState> {
    topic: Topic,
    latest: Arc<Latest<T>>,
    initial: Option<Value>,
    applied: u64,
    skipped_fields: u64,
}

impl<T: TopicState> Processor<T> {
    pub fn new(topic: Topic) -> Self {
        Self {
            topic,
            latest: Arc::new(Latest::default()),
            initial: None,
            applied: 0,
            skipped_fields: 0,
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Fold one payload into the state and run the topic's derivation
    pub fn apply(&mut self, payload: &Value) -> MergeContext {
        let ctx = self.latest.update(|state| {
            let ctx = apply(state, payload);
            state.derive();
            ctx
        });
        self.applied += 1;
        if !ctx.is_clean() {
            self.skipped_fields += ctx.skipped().len() as u64;
            tracing::debug!(
                topic = %self.topic,
                skipped = ctx.skipped().len(),
                "Payload applied with skipped fields"
            );
        }
        ctx
    }

    /// Record the session's initial payload and rebuild state from it
    pub fn load_initial(&mut self, payload: Value) {
        self.initial = Some(payload);
        self.reset();
    }

    /// Back to the initial snapshot, or the zero value if there is none
    pub fn reset(&mut self) {
        let mut state = T::default();
        if let Some(initial) = &self.initial {
            let ctx = apply(&mut state, initial);
            if !ctx.is_clean() {
                tracing::warn!(topic = %self.topic, skipped = ctx.skipped().len(), "Initial snapshot did not fully apply");
            }
            state.derive();
        }
        self.latest.replace(state);
        self.applied = 0;
    }

    /// Drop the initial snapshot too; used when switching sessions
    pub fn clear(&mut self) {
        self.initial = None;
        self.reset();
        self.skipped_fields = 0;
    }

    /// Points applied since the last reset
    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn skipped_fields(&self) -> u64 {
        self.skipped_fields
    }

    pub fn latest(&self) -> Arc<Latest<T>> {
        Arc::clone(&self.latest)
    }
}

macro_rules! topic_registry {
    ($($topic:ident => $field:ident : $state:ty),* $(,)?) => {
        /// One processor per topic, resolved at compile time
        #[derive(Debug)]
        pub struct TopicRegistry {
            $($field: Processor<$state>,)*
        }

        impl TopicRegistry {
            pub fn new() -> Self {
                Self {
                    $($field: Processor::new(Topic::$topic),)*
                }
            }

            /// Route a point to its topic's processor
            pub fn apply(&mut self, point: &RawDataPoint) -> MergeContext {
                match point.topic {
                    $(Topic::$topic => self.$field.apply(&point.payload),)*
                }
            }

            /// Reset every topic to the initial snapshot
            pub fn reset(&mut self) {
                $(self.$field.reset();)*
            }

            /// Forget the current session entirely
            pub fn clear(&mut self) {
                $(self.$field.clear();)*
            }

            /// Install a session's initial snapshot; topics absent from it start empty
            pub fn load_initial(&mut self, snapshot: &BTreeMap<Topic, Value>) {
                $(
                    match snapshot.get(&Topic::$topic) {
                        Some(payload) => self.$field.load_initial(payload.clone()),
                        None => self.$field.clear(),
                    }
                )*
            }

            /// Total points applied since the last reset
            pub fn applied(&self) -> u64 {
                0 $(+ self.$field.applied())*
            }

            pub fn skipped_fields(&self) -> u64 {
                0 $(+ self.$field.skipped_fields())*
            }

            pub fn view(&self) -> RegistryView {
                RegistryView {
                    $($field: self.$field.latest(),)*
                }
            }
        }

        /// Read-only access to every topic's latest state
        #[derive(Debug, Clone)]
        pub struct RegistryView {
            $($field: Arc<Latest<$state>>,)*
        }

        impl RegistryView {
            $(
                pub fn $field(&self) -> Arc<$state> {
                    self.$field.snapshot()
                }
            )*

            /// Update count for a topic
            pub fn version(&self, topic: Topic) -> u64 {
                match topic {
                    $(Topic::$topic => self.$field.version(),)*
                }
            }

            /// Current state of a topic as JSON, for consumers that do not know its type
            pub fn to_json(&self, topic: Topic) -> Value {
                let encoded = match topic {
                    $(Topic::$topic => serde_json::to_value(&*self.$field.snapshot()),)*
                };
                encoded.unwrap_or(Value::Null)
            }
        }
    };
}

topic_registry! {
    Heartbeat => heartbeat: Heartbeat,
    CarData => car_data: CompressedPayload,
    Position => position: CompressedPayload,
    ExtrapolatedClock => extrapolated_clock: ExtrapolatedClock,
    TopThree => top_three: TopThree,
    TimingStats => timing_stats: TimingStats,
    TimingAppData => timing_app_data: TimingAppData,
    WeatherData => weather_data: WeatherData,
    TrackStatus => track_status: TrackStatus,
    DriverList => driver_list: DriverList,
    RaceControlMessages => race_control_messages: RaceControlMessages,
    SessionData => session_data: SessionData,
    LapCount => lap_count: LapCount,
    TimingData => timing_data: TimingData,
    ChampionshipPrediction => championship_prediction: ChampionshipPrediction,
    TeamRadio => team_radio: TeamRadio,
    TyreStintSeries => tyre_stint_series: TyreStintSeries,
    PitStopSeries => pit_stop_series: PitStopSeries,
    SessionInfo => session_info: SessionInfo,
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    fn point(topic: Topic, payload: Value) -> RawDataPoint {
        RawDataPoint::new(topic, payload, Utc.with_ymd_and_hms(2024, 3, 2, 15, 0, 0).unwrap())
    }

    #[test]
    fn test_registry_routes_by_topic() {
        let mut registry = TopicRegistry::new();
        let view = registry.view();
        registry.apply(&point(Topic::TrackStatus, json!({"Status": "4", "Message": "SCDeployed"})));
        registry.apply(&point(Topic::LapCount, json!({"CurrentLap": 12})));

        assert_eq!(view.track_status().status.as_deref(), Some("4"));
        assert_eq!(view.lap_count().current_lap, Some(12));
        assert_eq!(view.weather_data().air_temp, None);
        assert_eq!(registry.applied(), 2);
        assert_eq!(view.version(Topic::TrackStatus), 1);
        assert_eq!(view.version(Topic::WeatherData), 0);
    }

    #[test]
    fn test_reset_restores_initial_snapshot() {
        let mut registry = TopicRegistry::new();
        let mut initial = BTreeMap::new();
        initial.insert(Topic::SessionInfo, json!({"Name": "Race", "Type": "Race"}));
        initial.insert(Topic::WeatherData, json!({"AirTemp": "20.1"}));
        registry.load_initial(&initial);

        let view = registry.view();
        registry.apply(&point(Topic::WeatherData, json!({"AirTemp": "21.0", "Rainfall": "1"})));
        assert_eq!(view.weather_data().air_temp.as_deref(), Some("21.0"));

        registry.reset();
        assert_eq!(view.weather_data().air_temp.as_deref(), Some("20.1"));
        assert_eq!(view.weather_data().rainfall, None);
        assert_eq!(view.session_info().name.as_deref(), Some("Race"));
        assert_eq!(registry.applied(), 0);
    }

    #[test]
    fn test_clear_forgets_session() {
        let mut registry = TopicRegistry::new();
        let mut initial = BTreeMap::new();
        initial.insert(Topic::TrackStatus, json!({"Status": "1"}));
        registry.load_initial(&initial);
        registry.clear();
        assert_eq!(registry.view().track_status().status, None);
    }

    #[test]
    fn test_derivation_runs_after_merge() {
        let mut registry = TopicRegistry::new();
        registry.apply(&point(
            Topic::TimingData,
            json!({"Lines": {"44": {"BestLapTime": {"Value": "1:30.000"}}}}),
        ));
        let fastest = registry.view().timing_data().fastest_lap.clone();
        assert_eq!(fastest.map(|f| f.racing_number), Some("44".to_string()));
    }

    #[test]
    fn test_held_snapshot_is_not_mutated() {
        let mut registry = TopicRegistry::new();
        let view = registry.view();
        registry.apply(&point(Topic::TrackStatus, json!({"Status": "1"})));
        let before = view.track_status();
        registry.apply(&point(Topic::TrackStatus, json!({"Status": "2"})));
        assert_eq!(before.status.as_deref(), Some("1"));
        assert_eq!(view.track_status().status.as_deref(), Some("2"));
    }

    #[test]
    fn test_to_json_uses_serialized_state() {
        let mut registry = TopicRegistry::new();
        registry.apply(&point(Topic::CarData, json!("opaque")));
        assert_eq!(registry.view().to_json(Topic::CarData), json!("opaque"));
    }

    #[test]
    fn test_concurrent_reader_never_sees_torn_state() {
        let mut registry = TopicRegistry::new();
        let view = registry.view();
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut samples = 0u64;
                while !done.load(Ordering::Acquire) {
                    let weather = view.weather_data();
                    // Every complete merge step writes both fields together
                    assert_eq!(weather.air_temp, weather.track_temp);
                    samples += 1;
                }
                samples
            })
        };

        for i in 0..5_000 {
            let value = i.to_string();
            registry.apply(&point(
                Topic::WeatherData,
                json!({"AirTemp": value, "TrackTemp": value}),
            ));
        }
        done.store(true, Ordering::Release);
        let samples = reader.join().expect("reader panicked");
        assert!(samples > 0);
    }
}
