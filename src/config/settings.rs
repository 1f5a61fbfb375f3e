//! Tunable sections of the application config

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default lag behind real time for live playback
pub const DEFAULT_DELAY_MS: u64 = 0;

/// Default dispatch tick
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 100;

/// Static archive root
pub const DEFAULT_STATIC_BASE_URL: &str = "https://livetiming.formula1.com/static/";

/// Host of the streaming hub; `signalr/negotiate` and `signalr/connect` resolve against it
pub const DEFAULT_LIVE_BASE_URL: &str = "https://livetiming.formula1.com/";

/// Playback and dispatch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// How far behind real time the live boundary trails
    pub delay_ms: u64,
    /// Dispatch loop interval
    pub tick_interval_ms: u64,
    /// Backlog size above which the worker delivers everything due in one tick
    pub catch_up_threshold: usize,
    /// Per-tick delivery cap while under the catch-up threshold
    pub max_points_per_tick: usize,
    /// Lines read from a capture per poll
    pub replay_chunk_size: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_DELAY_MS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            catch_up_threshold: 500,
            max_points_per_tick: 200,
            replay_chunk_size: 4096,
        }
    }
}

impl PlaybackConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Tick interval, never zero
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Remote feed endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub static_base_url: String,
    pub live_base_url: String,
    pub request_timeout_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            static_base_url: DEFAULT_STATIC_BASE_URL.to_string(),
            live_base_url: DEFAULT_LIVE_BASE_URL.to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

impl FeedConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Channel capacities between the worker and its consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub command_buffer: usize,
    pub message_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer: 256,
            message_buffer: 10_000,
        }
    }
}
